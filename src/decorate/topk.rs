//! Keeps only the K highest valued samples of matching families.

use super::Decorator;
use crate::model::{MetricFamily, Sample};
use regex::Regex;
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

pub struct TopK {
    k: usize,
    pattern: Regex,
}

impl TopK {
    pub fn new(k: usize, pattern: Regex) -> Self {
        Self { k, pattern }
    }

    /// Returns the K highest samples in descending order. A bounded min-heap
    /// keeps this at O(n log k).
    fn top(&self, samples: Vec<Sample>) -> Vec<Sample> {
        let mut heap: BinaryHeap<Reverse<Ranked>> = BinaryHeap::with_capacity(self.k + 1);
        for (idx, sample) in samples.iter().enumerate() {
            heap.push(Reverse(Ranked {
                rank: sample.value().rank(),
                idx,
            }));
            if heap.len() > self.k {
                heap.pop();
            }
        }

        let mut keep: Vec<Ranked> = heap.into_iter().map(|Reverse(r)| r).collect();
        keep.sort_unstable_by(|a, b| b.cmp(a));

        let mut slots: Vec<Option<Sample>> = samples.into_iter().map(Some).collect();
        keep.iter().filter_map(|r| slots[r.idx].take()).collect()
    }
}

impl Decorator for TopK {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for mf in families.iter_mut() {
            if mf.samples.len() <= self.k || !self.pattern.is_match(&mf.name) {
                continue;
            }
            let samples = std::mem::take(&mut mf.samples);
            mf.samples = self.top(samples);
        }
    }

    fn name(&self) -> &str {
        "TopK"
    }
}

#[derive(Debug, Clone, Copy)]
struct Ranked {
    rank: f64,
    idx: usize,
}

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank
            .total_cmp(&other.rank)
            .then_with(|| other.idx.cmp(&self.idx))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricKind, Value};

    fn topk(k: usize) -> TopK {
        TopK::new(k, Regex::new("^sonar_process_").unwrap())
    }

    fn values(mf: &MetricFamily) -> Vec<f64> {
        mf.samples.iter().map(|s| s.value().rank()).collect()
    }

    #[test]
    fn test_keeps_highest_k_descending() {
        let mut mf = MetricFamily::new("sonar_process_cpu_seconds_total", "", MetricKind::Counter);
        for v in [3.0, 10.0, 1.0, 7.0, 5.0] {
            mf.samples.push(Sample::counter(v));
        }
        let mut mfs = vec![mf];
        topk(3).decorate(&mut mfs);
        assert_eq!(values(&mfs[0]), vec![10.0, 7.0, 5.0]);
    }

    #[test]
    fn test_non_matching_family_untouched() {
        let mut mf = MetricFamily::new("sonar_cpu", "", MetricKind::Counter);
        for v in [1.0, 2.0, 3.0] {
            mf.samples.push(Sample::counter(v));
        }
        let mut mfs = vec![mf];
        topk(1).decorate(&mut mfs);
        assert_eq!(mfs[0].samples.len(), 3);
    }

    #[test]
    fn test_fewer_than_k_samples_untouched() {
        let mut mfs = vec![MetricFamily::new("sonar_process_open_fds", "", MetricKind::Gauge)
            .with_sample(Sample::gauge(1.0))
            .with_sample(Sample::gauge(2.0))];
        topk(5).decorate(&mut mfs);
        assert_eq!(values(&mfs[0]), vec![1.0, 2.0]);
    }

    #[test]
    fn test_summary_ranked_by_sum() {
        let summary = |sum: f64| {
            Sample::new(Value::Summary {
                sum,
                count: 1,
                quantiles: vec![],
            })
        };
        let mut mfs = vec![MetricFamily::new("sonar_process_latency", "", MetricKind::Summary)
            .with_sample(summary(1.0))
            .with_sample(summary(8.0))
            .with_sample(summary(4.0))];
        topk(1).decorate(&mut mfs);
        assert_eq!(values(&mfs[0]), vec![8.0]);
    }

    #[test]
    fn test_topk_is_idempotent() {
        let mut mf = MetricFamily::new("sonar_process_open_fds", "", MetricKind::Gauge);
        for v in [4.0, 4.0, 2.0, 9.0] {
            mf.samples.push(Sample::gauge(v));
        }
        let mut mfs = vec![mf];
        topk(2).decorate(&mut mfs);
        let once = mfs.clone();
        topk(2).decorate(&mut mfs);
        assert_eq!(once, mfs);
    }
}
