//! Label decorators.

use super::Decorator;
use crate::model::{Label, MetricFamily};
use std::collections::HashSet;

/// Appends a fixed list of label pairs to every sample. Applying it twice
/// appends twice.
pub struct LabelAppender {
    labels: Vec<Label>,
}

impl LabelAppender {
    pub fn new(labels: Vec<Label>) -> Self {
        Self { labels }
    }
}

impl Decorator for LabelAppender {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            for sample in mf.samples.iter_mut() {
                sample.labels_mut().extend(self.labels.iter().cloned());
            }
        }
    }

    fn name(&self) -> &str {
        "LabelsAppender"
    }
}

/// Within a namespace, drops samples that lack a required label or carry it
/// empty, and strips every label that is not required from the survivors.
///
/// Not part of [`standard_chain`](super::standard_chain); callers that
/// scrape namespaced workloads append it to their own [`Chain`](super::Chain).
pub struct NamespaceLabelRequired {
    namespace: String,
    required: HashSet<String>,
}

impl NamespaceLabelRequired {
    pub fn new<I, S>(namespace: impl Into<String>, required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            namespace: namespace.into(),
            required: required.into_iter().map(Into::into).collect(),
        }
    }
}

impl Decorator for NamespaceLabelRequired {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            if !mf.name.starts_with(&self.namespace) {
                continue;
            }

            mf.samples.retain_mut(|sample| {
                let present = sample
                    .labels()
                    .iter()
                    .filter(|l| self.required.contains(&l.name) && !l.value.is_empty())
                    .count();
                let has_empty = sample
                    .labels()
                    .iter()
                    .any(|l| self.required.contains(&l.name) && l.value.is_empty());
                if has_empty || present < self.required.len() {
                    return false;
                }
                sample
                    .labels_mut()
                    .retain(|l| self.required.contains(&l.name));
                true
            });
        }
    }

    fn name(&self) -> &str {
        "NamespaceLabelRequired"
    }
}
