//! Registry of collectors gathered concurrently each cycle.
//!
//! A failing collector is logged and contributes nothing; the remaining
//! collectors still report. Output is concatenated in registration order
//! without deduplication.

use crate::collectors::Collector;
use crate::model::MetricFamily;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinSet;
use tracing::{debug, error, warn};

#[derive(Default, Clone)]
pub struct Registry {
    collectors: Vec<Arc<dyn Collector>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, collector: Arc<dyn Collector>) {
        debug!("registered collector {}", collector.name());
        self.collectors.push(collector);
    }

    pub fn names(&self) -> Vec<&str> {
        self.collectors.iter().map(|c| c.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.collectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.collectors.is_empty()
    }

    /// Gathers every collector concurrently and joins the results.
    pub async fn gather(&self) -> Vec<MetricFamily> {
        let start = Instant::now();
        let mut set = JoinSet::new();
        for (idx, collector) in self.collectors.iter().enumerate() {
            let collector = Arc::clone(collector);
            set.spawn(async move { (idx, collector.collect().await) });
        }

        let mut results = Vec::with_capacity(self.collectors.len());
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, Ok(families))) => results.push((idx, families)),
                Ok((idx, Err(e))) => {
                    error!("collector {} failed: {}", self.collectors[idx].name(), e)
                }
                Err(e) => warn!("collector task aborted: {}", e),
            }
        }
        results.sort_by_key(|(idx, _)| *idx);

        let families: Vec<MetricFamily> = results
            .into_iter()
            .flat_map(|(_, families)| families)
            .collect();
        debug!(
            "gathered {} families from {} collectors in {:?}",
            families.len(),
            self.collectors.len(),
            start.elapsed()
        );
        families
    }
}
