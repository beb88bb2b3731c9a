//! Canonical fingerprint encoding.
//!
//! A fingerprint is the family name followed by the labels sorted by name,
//! name and value interleaved, every element separated by a single NUL byte:
//!
//! ```text
//! sonar_cpu\0cpu\0cpu0\0mode\0user
//! ```
//!
//! The encoded form is the aggregation key and the wire key sent to sonar.
//! Encoding never reads the clock.

use std::collections::BTreeMap;
use thiserror::Error;

pub const SEPARATOR: char = '\0';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FingerprintError {
    #[error("metric name is empty")]
    EmptyName,

    #[error("{0:?} contains a NUL byte")]
    ContainsSeparator(String),
}

/// Encodes a name and an unordered label set. When a label name repeats
/// the last value wins.
pub fn encode<'a, I>(name: &str, labels: I) -> Result<String, FingerprintError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let sorted: BTreeMap<&str, &str> = labels.into_iter().collect();
    encode_sorted(name, &sorted)
}

/// Encodes an already sorted label map.
pub fn encode_sorted<K, V>(name: &str, labels: &BTreeMap<K, V>) -> Result<String, FingerprintError>
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if name.is_empty() {
        return Err(FingerprintError::EmptyName);
    }
    check(name)?;

    let mut out = String::with_capacity(
        name.len()
            + labels
                .iter()
                .map(|(k, v)| k.as_ref().len() + v.as_ref().len() + 2)
                .sum::<usize>(),
    );
    out.push_str(name);
    for (k, v) in labels {
        let (k, v) = (k.as_ref(), v.as_ref());
        check(k)?;
        check(v)?;
        out.push(SEPARATOR);
        out.push_str(k);
        out.push(SEPARATOR);
        out.push_str(v);
    }
    Ok(out)
}

/// Splits an encoded fingerprint back into its name and labels.
pub fn decode(encoded: &str) -> (String, BTreeMap<String, String>) {
    let mut parts = encoded.split(SEPARATOR);
    let name = parts.next().unwrap_or_default().to_string();
    let mut labels = BTreeMap::new();
    while let (Some(k), Some(v)) = (parts.next(), parts.next()) {
        labels.insert(k.to_string(), v.to_string());
    }
    (name, labels)
}

fn check(s: &str) -> Result<(), FingerprintError> {
    if s.contains(SEPARATOR) {
        return Err(FingerprintError::ContainsSeparator(s.to_string()));
    }
    Ok(())
}
