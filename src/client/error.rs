//! Error types of the sonar push client.

use thiserror::Error;

/// Failures of the push path. [`ClientError::kind`] is the label written to
/// `sonar_diagnostic{error=...}`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("metric sent too frequently")]
    SendTooFrequent,

    #[error("flush called too frequently")]
    FlushTooFrequent,

    #[error("circuit breaker is open, too many consecutive failures")]
    CircuitBreaker,

    #[error("label mismatch: definition has {expected} measured labels, got {actual}")]
    LabelMismatch { expected: usize, actual: usize },

    #[error("zero-time and timestamped metrics cannot share a buffer")]
    TimestampModeMismatch,

    #[error("failed to write metric to buffer: {0}")]
    WriteFailure(#[from] std::io::Error),

    #[error("unexpected HTTP status {status}")]
    UnexpectedHttpStatus { status: u16 },

    #[error("http request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("identity bootstrap failed: {0}")]
    AuthBootstrapFailed(#[from] BootstrapError),

    #[error("invalid client options: {0}")]
    InvalidOptions(String),
}

impl ClientError {
    pub fn kind(&self) -> &'static str {
        match self {
            ClientError::SendTooFrequent => "send_too_frequent",
            ClientError::FlushTooFrequent => "flush_too_frequent",
            ClientError::CircuitBreaker => "circuit_breaker",
            ClientError::LabelMismatch { .. } => "label_mismatch",
            ClientError::TimestampModeMismatch => "timestamp_mode_mismatch",
            ClientError::WriteFailure(_) => "write_failure",
            ClientError::UnexpectedHttpStatus { .. } => "unexpected_http_status",
            ClientError::Transport(_) => "http_request_failed",
            ClientError::AuthBootstrapFailed(_) => "auth_bootstrap_failed",
            ClientError::InvalidOptions(_) => "fatal_config",
        }
    }

    /// Client-side pacing refusals. The driver skips diagnostics for these.
    pub fn is_pacing(&self) -> bool {
        matches!(
            self,
            ClientError::SendTooFrequent | ClientError::FlushTooFrequent | ClientError::CircuitBreaker
        )
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::UnexpectedHttpStatus { status } => Some(*status),
            _ => None,
        }
    }
}

/// Failures while resolving the droplet identity.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("GET {url} failed: {source}")]
    Request {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("GET {url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("app key response is not a JSON string: {0}")]
    AppKey(#[from] serde_json::Error),

    #[error("metadata returned an empty {0}")]
    Empty(&'static str),
}
