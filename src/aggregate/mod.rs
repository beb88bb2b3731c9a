//! Label-dropping aggregation.
//!
//! Collapses samples that share a fingerprint after removing a per-family set
//! of labels, summing their values. Output is a flat list of
//! [`MetricWithValue`] rows ordered by encoded fingerprint, so the result is
//! deterministic for a given input regardless of sample order.

pub mod specs;

use crate::fingerprint::{self, FingerprintError};
use crate::model::MetricFamily;
use ahash::AHashMap as HashMap;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;
use tracing::debug;

pub use specs::{dbaas_spec, host_spec, k8s_spec};

#[derive(Debug, Error)]
pub enum AggregateError {
    #[error("failed to encode {family}: {source}")]
    Encoding {
        family: String,
        #[source]
        source: FingerprintError,
    },
}

impl AggregateError {
    pub fn kind(&self) -> &'static str {
        "aggregation_failed"
    }
}

/// Per-family label names to drop before grouping. Immutable once built.
#[derive(Debug, Clone, Default)]
pub struct AggregationSpec {
    drops: HashMap<String, BTreeSet<String>>,
}

impl AggregationSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_drop<I, S>(mut self, family: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.drops
            .entry(family.into())
            .or_default()
            .extend(labels.into_iter().map(Into::into));
        self
    }

    /// Unions two specs by appending drop lists per family.
    pub fn union(mut self, other: AggregationSpec) -> Self {
        for (family, labels) in other.drops {
            self.drops.entry(family).or_default().extend(labels);
        }
        self
    }

    pub fn drops_for(&self, family: &str) -> Option<&BTreeSet<String>> {
        self.drops.get(family)
    }

    pub fn len(&self) -> usize {
        self.drops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drops.is_empty()
    }
}

/// One aggregated row: a family name, the reduced label set and the summed
/// value.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricWithValue {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub value: f64,
}

impl MetricWithValue {
    pub fn fingerprint(&self) -> Result<String, FingerprintError> {
        fingerprint::encode_sorted(&self.name, &self.labels)
    }
}

/// Removes every label listed in `drop` from `labels`.
pub fn reduce(
    mut labels: BTreeMap<String, String>,
    drop: Option<&BTreeSet<String>>,
) -> BTreeMap<String, String> {
    if let Some(drop) = drop {
        labels.retain(|name, _| !drop.contains(name));
    }
    labels
}

/// Aggregates the numeric samples of `families`. Summaries and histograms
/// carry no single value and are skipped. A `None` spec aggregates purely
/// by identical fingerprint.
pub fn aggregate(
    families: &[MetricFamily],
    spec: Option<&AggregationSpec>,
) -> Result<Vec<MetricWithValue>, AggregateError> {
    let mut acc: BTreeMap<String, MetricWithValue> = BTreeMap::new();

    for family in families {
        let drop = spec.and_then(|s| s.drops_for(&family.name));

        for sample in &family.samples {
            let Some(value) = sample.value().scalar() else {
                continue;
            };

            let labels: BTreeMap<String, String> = sample
                .labels()
                .iter()
                .map(|l| (l.name.clone(), l.value.clone()))
                .collect();
            let labels = reduce(labels, drop);

            let key = fingerprint::encode_sorted(&family.name, &labels).map_err(|source| {
                AggregateError::Encoding {
                    family: family.name.clone(),
                    source,
                }
            })?;

            acc.entry(key)
                .and_modify(|row| row.value += value)
                .or_insert_with(|| MetricWithValue {
                    name: family.name.clone(),
                    labels,
                    value,
                });
        }
    }

    debug!(
        "Aggregated {} families into {} series",
        families.len(),
        acc.len()
    );
    Ok(acc.into_values().collect())
}
