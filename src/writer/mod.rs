//! Metric writers: the final stage of a cycle.

pub mod sonar;
pub mod stdout;

pub use sonar::Sonar;
pub use stdout::Stdout;

use crate::aggregate::MetricWithValue;
use crate::client::ClientError;
use crate::fingerprint::FingerprintError;
use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("too many metrics to send: {count} exceeds the limit of {max}")]
    TooManyMetrics { count: usize, max: usize },

    #[error("metric {fingerprint:?} exceeds the max length of {max}")]
    MetricTooLong { fingerprint: String, max: usize },

    #[error("failed to encode metric: {0}")]
    Encoding(#[from] FingerprintError),

    #[error("failed to write metrics: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Client(#[from] ClientError),
}

impl WriteError {
    pub fn kind(&self) -> &'static str {
        match self {
            WriteError::TooManyMetrics { .. } => "too_many_metrics",
            WriteError::MetricTooLong { .. } => "metric_too_long",
            WriteError::Encoding(_) | WriteError::Io(_) => "write_failure",
            WriteError::Client(e) => e.kind(),
        }
    }

    /// Refusals caused by client-side pacing. No diagnostics are sent for
    /// these.
    pub fn is_pacing(&self) -> bool {
        matches!(self, WriteError::Client(e) if e.is_pacing())
    }
}

#[async_trait]
pub trait MetricWriter: Send {
    async fn write(&mut self, metrics: &[MetricWithValue]) -> Result<(), WriteError>;
    fn name(&self) -> &str;
}
