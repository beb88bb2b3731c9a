//! Exposes the agent's own diagnostics registry as a collector.

use super::{CollectError, Collector};
use crate::diagnostics::Diagnostics;
use crate::model::MetricFamily;
use async_trait::async_trait;
use std::sync::Arc;

pub struct InternalCollector {
    diagnostics: Arc<Diagnostics>,
}

impl InternalCollector {
    pub fn new(diagnostics: Arc<Diagnostics>) -> Self {
        Self { diagnostics }
    }
}

#[async_trait]
impl Collector for InternalCollector {
    fn name(&self) -> &str {
        "internal"
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        Ok(self.diagnostics.gather())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{BUILD_INFO_METRIC, DIAGNOSTIC_METRIC};

    #[tokio::test]
    async fn test_collects_build_info_and_diagnostics() {
        let diag = Arc::new(Diagnostics::new().unwrap());
        let collector = InternalCollector::new(Arc::clone(&diag));

        let names: Vec<String> = collector
            .collect()
            .await
            .unwrap()
            .into_iter()
            .map(|mf| mf.name)
            .collect();
        assert_eq!(names, vec![BUILD_INFO_METRIC.to_string()]);

        diag.record("circuit_breaker");
        let families = collector.collect().await.unwrap();
        assert!(families.iter().any(|mf| mf.name == DIAGNOSTIC_METRIC));
    }
}
