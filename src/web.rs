//! Read-only local exposition.
//!
//! `/metrics` renders the same decorated families the agent pushes, in
//! Prometheus text format, plus the push limits currently in force.
//! `/health` answers plain `OK` while the process is up.

use crate::client::Limits;
use crate::decorate::{Chain, Decorator};
use crate::model::{MetricFamily, MetricKind, Sample};
use crate::registry::Registry;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::proto;
use prometheus::{Encoder, TextEncoder};
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument};

/// Buffer capacity for metrics encoding.
const BUFFER_CAP: usize = 64 * 1024;

/// Error type for metrics endpoint failures.
#[derive(Debug)]
pub enum MetricsError {
    EncodingFailed,
}

impl IntoResponse for MetricsError {
    fn into_response(self) -> axum::response::Response {
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to encode metrics",
        )
            .into_response()
    }
}

#[derive(Clone)]
pub struct WebState {
    pub registry: Arc<Registry>,
    pub decorator: Arc<Chain>,
    pub limits: Arc<Limits>,
}

pub fn router(state: WebState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/health", get(health_handler))
        .with_state(state)
}

/// Serves until shutdown is signalled.
pub async fn serve(
    listener: TcpListener,
    state: WebState,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!(
        "Serving local metrics on http://{}/metrics",
        listener.local_addr()?
    );
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    std::future::pending::<()>().await;
                }
            }
        })
        .await
}

/// Gauges describing the limits the push client currently applies.
fn limit_families(limits: &Limits) -> Vec<MetricFamily> {
    vec![
        MetricFamily::new(
            "sonar_agent_wait_interval_seconds",
            "Minimum interval between pushes.",
            MetricKind::Gauge,
        )
        .with_sample(Sample::gauge(limits.wait_interval().as_secs_f64())),
        MetricFamily::new(
            "sonar_agent_max_batch_size",
            "Maximum number of metrics per push.",
            MetricKind::Gauge,
        )
        .with_sample(Sample::gauge(limits.max_batch_size() as f64)),
        MetricFamily::new(
            "sonar_agent_max_metric_length",
            "Maximum encoded length of a metric key.",
            MetricKind::Gauge,
        )
        .with_sample(Sample::gauge(limits.max_metric_length() as f64)),
    ]
}

/// Handler for the /metrics endpoint.
#[instrument(skip(state))]
pub async fn metrics_handler(State(state): State<WebState>) -> Result<String, MetricsError> {
    let start = Instant::now();
    debug!("Processing /metrics request");

    let mut mfs = state.registry.gather().await;
    state.decorator.decorate(&mut mfs);
    mfs.extend(limit_families(&state.limits));

    // the encoder rejects families without samples
    let protos: Vec<proto::MetricFamily> = mfs
        .iter()
        .filter(|mf| !mf.is_empty())
        .map(MetricFamily::to_proto)
        .collect();

    let mut buffer = Vec::with_capacity(BUFFER_CAP);
    TextEncoder::new().encode(&protos, &mut buffer).map_err(|e| {
        error!("Failed to encode metrics: {}", e);
        MetricsError::EncodingFailed
    })?;
    let body = String::from_utf8(buffer).map_err(|e| {
        error!("Metrics output is not UTF-8: {}", e);
        MetricsError::EncodingFailed
    })?;

    debug!(
        "Rendered {} families in {:?}",
        protos.len(),
        start.elapsed()
    );
    Ok(body)
}

/// Handler for the /health endpoint.
pub async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collectors::{CollectError, Collector};
    use async_trait::async_trait;
    use std::time::Duration;

    struct Memory;

    #[async_trait]
    impl Collector for Memory {
        fn name(&self) -> &str {
            "memory"
        }

        async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
            Ok(vec![
                MetricFamily::new("node_memory_MemFree_bytes", "Free memory.", MetricKind::Gauge)
                    .with_sample(Sample::gauge(2048.0)),
                MetricFamily::new("empty_family", "", MetricKind::Gauge),
            ])
        }
    }

    fn state() -> WebState {
        let mut registry = Registry::new();
        registry.register(Arc::new(Memory));
        WebState {
            registry: Arc::new(registry),
            decorator: Arc::new(crate::decorate::standard_chain(50, vec![]).unwrap()),
            limits: Arc::new(Limits::new(Duration::from_secs(60), 1000, 512)),
        }
    }

    #[tokio::test]
    async fn test_metrics_handler_renders_decorated_families() {
        let body = metrics_handler(State(state())).await.unwrap();
        assert!(body.contains("sonar_memory_free 2048"));
        assert!(body.contains("sonar_agent_wait_interval_seconds 60"));
        assert!(body.contains("sonar_agent_max_batch_size 1000"));
        assert!(body.contains("sonar_agent_max_metric_length 512"));
        assert!(!body.contains("empty_family"));
    }

    #[tokio::test]
    async fn test_serve_stops_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (tx, rx) = watch::channel(false);
        let server = tokio::spawn(serve(listener, state(), rx));

        let resp = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
        assert_eq!(resp.status(), 200);
        assert_eq!(resp.text().await.unwrap(), "OK");

        tx.send(true).unwrap();
        server.await.unwrap().unwrap();
    }
}
