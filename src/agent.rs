//! The pipeline driver.
//!
//! One cycle gathers every collector, runs the decorator chain, aggregates
//! and hands the batch to the writer. When a push fails the driver waits
//! out the limiter and pushes only the diagnostic families, so the server
//! learns why the previous push failed. Errors on that fallback path are
//! logged and never trigger another fallback.

use crate::aggregate::{aggregate, AggregateError, AggregationSpec};
use crate::decorate::{Chain, Decorator};
use crate::diagnostics::{Diagnostics, BUILD_INFO_METRIC, DIAGNOSTIC_METRIC};
use crate::limiter::RateLimiter;
use crate::model::MetricFamily;
use crate::registry::Registry;
use crate::writer::{MetricWriter, WriteError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, error, info};

#[derive(Debug, Error)]
pub enum CycleError {
    #[error("metric aggregation failed: {0}")]
    Aggregate(#[from] AggregateError),

    #[error("failed to send metrics: {0}")]
    Write(#[from] WriteError),
}

impl CycleError {
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Aggregate(e) => e.kind(),
            CycleError::Write(e) => e.kind(),
        }
    }

    pub fn is_pacing(&self) -> bool {
        matches!(self, CycleError::Write(e) if e.is_pacing())
    }
}

pub struct Agent {
    registry: Arc<Registry>,
    decorator: Arc<Chain>,
    spec: AggregationSpec,
    writer: Box<dyn MetricWriter>,
    limiter: Arc<dyn RateLimiter>,
    diagnostics: Arc<Diagnostics>,
}

impl Agent {
    pub fn new(
        registry: Arc<Registry>,
        decorator: Arc<Chain>,
        spec: AggregationSpec,
        writer: Box<dyn MetricWriter>,
        limiter: Arc<dyn RateLimiter>,
        diagnostics: Arc<Diagnostics>,
    ) -> Self {
        Self {
            registry,
            decorator,
            spec,
            writer,
            limiter,
            diagnostics,
        }
    }

    /// Runs cycles until shutdown is signalled. A cycle in progress always
    /// completes its push first.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "starting agent loop: writer={} limiter={} collectors={:?}",
            self.writer.name(),
            self.limiter.name(),
            self.registry.names()
        );

        loop {
            if *shutdown.borrow() {
                break;
            }
            if let Err(e) = self.exec(&mut shutdown).await {
                debug!("cycle failed: {}", e);
            }

            let wait = self.limiter.wait_duration();
            debug!("sleeping for {:?}", wait);
            if !sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
        }

        info!("agent loop stopped");
    }

    /// One collect, decorate, aggregate and write cycle.
    pub async fn exec(&mut self, shutdown: &mut watch::Receiver<bool>) -> Result<(), CycleError> {
        let start = Instant::now();
        let mut mfs = self.registry.gather().await;
        debug!("stats collected in {:?}", start.elapsed());

        let start = Instant::now();
        self.decorator.decorate(&mut mfs);
        debug!("stats decorated in {:?}", start.elapsed());

        let start = Instant::now();
        let batch = match aggregate(&mfs, Some(&self.spec)) {
            Ok(batch) => batch,
            Err(e) => {
                error!("failed to aggregate metrics: {}", e);
                self.write_diagnostics(&mfs, e.kind()).await;
                return Err(e.into());
            }
        };
        debug!("stats aggregated in {:?}", start.elapsed());

        let start = Instant::now();
        let err = match self.writer.write(&batch).await {
            Ok(()) => {
                debug!("stats written in {:?}", start.elapsed());
                return Ok(());
            }
            Err(e) => e,
        };

        if err.is_pacing() {
            debug!("push deferred: {}", err);
            return Err(err.into());
        }

        error!("failed to send metrics: {}", err);
        // sending again right away would be refused as too frequent
        if sleep_or_shutdown(self.limiter.wait_duration(), shutdown).await {
            self.write_diagnostics(&mfs, err.kind()).await;
        }
        Err(err.into())
    }

    /// Pushes the build-info family and a freshly gathered diagnostic
    /// counter after recording `kind`.
    async fn write_diagnostics(&mut self, mfs: &[MetricFamily], kind: &str) {
        self.diagnostics.record(kind);

        let mut fresh: Vec<MetricFamily> = self.diagnostics.gather();
        let has_build_info = mfs.iter().any(|mf| mf.name == BUILD_INFO_METRIC);
        fresh.retain(|mf| {
            mf.name == DIAGNOSTIC_METRIC || (!has_build_info && mf.name == BUILD_INFO_METRIC)
        });
        self.decorator.decorate(&mut fresh);

        let mut diags: Vec<MetricFamily> = mfs
            .iter()
            .filter(|mf| mf.name == BUILD_INFO_METRIC)
            .cloned()
            .collect();
        diags.extend(fresh);
        if diags.is_empty() {
            error!("couldn't find any diagnostic information to send, skipping");
            return;
        }

        let batch = match aggregate(&diags, None) {
            Ok(batch) => batch,
            Err(e) => {
                error!("failed to aggregate diagnostic information: {}", e);
                return;
            }
        };

        if let Err(e) = self.writer.write(&batch).await {
            error!("failed to write diagnostic information: {}", e);
        }
    }
}

/// Sleeps for `d` unless shutdown is signalled first. Returns false on
/// shutdown.
pub async fn sleep_or_shutdown(d: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    let sleep = tokio::time::sleep(d);
    tokio::pin!(sleep);
    tokio::select! {
        _ = &mut sleep => true,
        stopped = async { shutdown.wait_for(|stop| *stop).await.is_ok() } => {
            if stopped {
                false
            } else {
                // sender gone, nobody can ask us to stop
                (&mut sleep).await;
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MetricWithValue;
    use crate::client::ClientError;
    use crate::collectors::{CollectError, Collector, InternalCollector};
    use crate::limiter::ConstantLimiter;
    use crate::model::{MetricKind, Sample};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Load;

    #[async_trait]
    impl Collector for Load {
        fn name(&self) -> &str {
            "load"
        }

        async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
            Ok(vec![MetricFamily::new("node_load1", "", MetricKind::Gauge)
                .with_sample(Sample::gauge(0.5))])
        }
    }

    /// Records every batch, failing while `failures` is not empty.
    struct Recorder {
        batches: Arc<Mutex<Vec<Vec<MetricWithValue>>>>,
        failures: Vec<ClientError>,
    }

    #[async_trait]
    impl MetricWriter for Recorder {
        async fn write(&mut self, metrics: &[MetricWithValue]) -> Result<(), WriteError> {
            self.batches.lock().unwrap().push(metrics.to_vec());
            match self.failures.pop() {
                Some(e) => Err(e.into()),
                None => Ok(()),
            }
        }

        fn name(&self) -> &str {
            "recorder"
        }
    }

    fn agent(failures: Vec<ClientError>) -> (Agent, Arc<Mutex<Vec<Vec<MetricWithValue>>>>) {
        let diagnostics = Arc::new(Diagnostics::new().unwrap());
        let mut registry = Registry::new();
        registry.register(Arc::new(Load));
        registry.register(Arc::new(InternalCollector::new(Arc::clone(&diagnostics))));

        let batches = Arc::new(Mutex::new(Vec::new()));
        let writer = Recorder {
            batches: Arc::clone(&batches),
            failures,
        };
        let agent = Agent::new(
            Arc::new(registry),
            Arc::new(crate::decorate::standard_chain(50, vec![]).unwrap()),
            AggregationSpec::new(),
            Box::new(writer),
            Arc::new(ConstantLimiter::new(Duration::from_millis(1))),
            diagnostics,
        );
        (agent, batches)
    }

    #[tokio::test]
    async fn test_successful_cycle_writes_decorated_batch() {
        let (mut agent, batches) = agent(vec![]);
        let (_tx, mut rx) = watch::channel(false);
        agent.exec(&mut rx).await.unwrap();

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        assert!(batches[0].iter().any(|m| m.name == "sonar_load1"));
        assert!(batches[0].iter().any(|m| m.name == BUILD_INFO_METRIC));
    }

    #[tokio::test]
    async fn test_push_failure_sends_diagnostics() {
        let (mut agent, batches) = agent(vec![ClientError::UnexpectedHttpStatus { status: 500 }]);
        let (_tx, mut rx) = watch::channel(false);
        let err = agent.exec(&mut rx).await.unwrap_err();
        assert_eq!(err.kind(), "unexpected_http_status");

        let batches = batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        let fallback = &batches[1];
        let mut names: Vec<&str> = fallback.iter().map(|m| m.name.as_str()).collect();
        names.sort();
        assert_eq!(names, vec![BUILD_INFO_METRIC, DIAGNOSTIC_METRIC]);

        let diag = fallback
            .iter()
            .find(|m| m.name == DIAGNOSTIC_METRIC)
            .unwrap();
        assert_eq!(
            diag.labels.get("error").map(String::as_str),
            Some("unexpected_http_status")
        );
        assert_eq!(diag.value, 1.0);
    }

    #[tokio::test]
    async fn test_pacing_failure_skips_diagnostics() {
        let (mut agent, batches) = agent(vec![ClientError::FlushTooFrequent]);
        let (_tx, mut rx) = watch::channel(false);
        assert!(agent.exec(&mut rx).await.unwrap_err().is_pacing());
        assert_eq!(batches.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_sleep() {
        let (tx, mut rx) = watch::channel(false);
        let sleeper = tokio::spawn(async move {
            sleep_or_shutdown(Duration::from_secs(3600), &mut rx).await
        });
        tx.send(true).unwrap();
        assert!(!sleeper.await.unwrap());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let (agent, batches) = agent(vec![]);
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(agent.run(rx));
        tokio::time::sleep(Duration::from_millis(20)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
        assert!(!batches.lock().unwrap().is_empty());
    }
}
