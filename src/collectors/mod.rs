//! Metric sources gathered once per cycle.
//!
//! The node collector reads host statistics from procfs, the scraper pulls
//! Prometheus text from local exporters, and the internal collector exposes
//! the agent's own diagnostics registry.

pub mod diskstats;
pub mod filesystem;
pub mod internal;
pub mod netdev;
pub mod node;
pub mod scraper;

pub use internal::InternalCollector;
pub use node::NodeCollector;
pub use scraper::Scraper;

use crate::model::MetricFamily;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error("{collector}: {message}")]
    Gather { collector: String, message: String },

    #[error("{collector}: request failed: {source}")]
    Http {
        collector: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{collector}: {source}")]
    Io {
        collector: String,
        #[source]
        source: std::io::Error,
    },
}

impl CollectError {
    pub fn kind(&self) -> &'static str {
        "gather_failed"
    }

    pub fn gather(collector: &str, message: impl Into<String>) -> Self {
        CollectError::Gather {
            collector: collector.to_string(),
            message: message.into(),
        }
    }
}

/// A source of metric families.
#[async_trait]
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError>;
}
