//! Metric definitions: a name, labels shared by every value, and the keys of
//! labels supplied per value.

use super::ClientError;
use crate::fingerprint;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    name: String,
    common_labels: BTreeMap<String, String>,
    measured_label_keys: Vec<String>,
}

impl Definition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            common_labels: BTreeMap::new(),
            measured_label_keys: Vec::new(),
        }
    }

    pub fn with_common_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.common_labels.extend(labels);
        self
    }

    pub fn with_measured_labels<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.measured_label_keys
            .extend(keys.into_iter().map(Into::into));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Encodes the fingerprint for one value. `values` pairs positionally
    /// with the measured label keys.
    pub fn lfm(&self, values: &[&str]) -> Result<String, ClientError> {
        if values.len() != self.measured_label_keys.len() {
            return Err(ClientError::LabelMismatch {
                expected: self.measured_label_keys.len(),
                actual: values.len(),
            });
        }

        let labels = self
            .common_labels
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .chain(
                self.measured_label_keys
                    .iter()
                    .map(String::as_str)
                    .zip(values.iter().copied()),
            );
        fingerprint::encode(&self.name, labels).map_err(|e| {
            ClientError::WriteFailure(std::io::Error::new(std::io::ErrorKind::InvalidInput, e))
        })
    }
}
