//! Sonar push client.
//!
//! Buffers encoded samples in a snappy-framed stream and POSTs the buffer to
//! sonar. The client owns the pacing state (wait interval, circuit breaker)
//! and the server-controlled [`Limits`], and resolves the droplet identity
//! lazily on the first flush.
//!
//! No lock is ever held across a network call: the shared state lives behind
//! a short-lived `std::sync::Mutex`, and concurrent flushes are refused
//! rather than queued.

pub mod bootstrap;
pub mod definition;
pub mod error;
pub mod stream;

pub use bootstrap::{DropletIdentity, TrustedApp};
pub use definition::Definition;
pub use error::{BootstrapError, ClientError};

use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use serde::Deserialize;
use snap::write::FrameEncoder;
use std::io::Write;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const BINARY_CONTENT_TYPE: &str = "application/timeseries-binary-0";
pub const JSON_CONTENT_TYPE: &str = "application/json";
pub const AUTH_KEY_HEADER: &str = "X-Auth-Key";

pub const DEFAULT_WAIT_INTERVAL: Duration = Duration::from_secs(60);
pub const DEFAULT_MAX_BATCH_SIZE: u32 = 1000;
pub const DEFAULT_MAX_METRIC_LENGTH: u32 = 512;
pub const MAX_WAIT_INTERVAL: Duration = Duration::from_secs(10 * 60);
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

pub const DEFAULT_METADATA_ENDPOINT: &str = "http://169.254.169.254/metadata";
pub const DEFAULT_AUTH_ENDPOINT: &str = "https://sonar.digitalocean.com";
pub const DEFAULT_SONAR_ENDPOINT: &str = "http://169.254.169.254";

const CIRCUIT_BREAKER_THRESHOLD: u32 = 3;
const REBOOTSTRAP_THRESHOLD: u32 = 60;
const LAST_SEND_RETENTION_MS: i64 = 60 * 60 * 1000;

/// Server-controlled limits, readable from outside the client.
#[derive(Debug)]
pub struct Limits {
    wait_interval_secs: AtomicU32,
    max_batch_size: AtomicU32,
    max_metric_length: AtomicU32,
}

impl Limits {
    pub fn new(wait_interval: Duration, max_batch_size: u32, max_metric_length: u32) -> Self {
        let wait = wait_interval.min(MAX_WAIT_INTERVAL).as_secs() as u32;
        Self {
            wait_interval_secs: AtomicU32::new(wait),
            max_batch_size: AtomicU32::new(max_batch_size),
            max_metric_length: AtomicU32::new(max_metric_length),
        }
    }

    pub fn wait_interval(&self) -> Duration {
        Duration::from_secs(self.wait_interval_secs.load(Ordering::Relaxed) as u64)
    }

    pub fn max_batch_size(&self) -> usize {
        self.max_batch_size.load(Ordering::Relaxed) as usize
    }

    pub fn max_metric_length(&self) -> usize {
        self.max_metric_length.load(Ordering::Relaxed) as usize
    }

    /// Stores the nonzero fields of a control response.
    fn apply(&self, resp: &ControlResponse) {
        if resp.frequency > 0 {
            let capped = (resp.frequency as u64).min(MAX_WAIT_INTERVAL.as_secs()) as u32;
            self.wait_interval_secs.store(capped, Ordering::Relaxed);
        }
        if resp.max_metrics > 0 {
            self.max_batch_size.store(resp.max_metrics, Ordering::Relaxed);
        }
        if resp.max_lfm > 0 {
            self.max_metric_length.store(resp.max_lfm, Ordering::Relaxed);
        }
    }
}

impl Default for Limits {
    fn default() -> Self {
        Self::new(
            DEFAULT_WAIT_INTERVAL,
            DEFAULT_MAX_BATCH_SIZE,
            DEFAULT_MAX_METRIC_LENGTH,
        )
    }
}

/// Body of a 202 response carrying new limits.
#[derive(Debug, Default, Deserialize)]
struct ControlResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    frequency: u32,
    #[serde(default)]
    max_metrics: u32,
    #[serde(default)]
    max_lfm: u32,
}

#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub user_agent: String,
    /// Sonar endpoints; one is picked at random per flush.
    pub endpoints: Vec<String>,
    pub metadata_endpoint: String,
    pub auth_endpoint: String,
    pub trusted: Option<TrustedApp>,
    pub timeout: Duration,
    pub wait_interval: Duration,
    pub max_batch_size: u32,
    pub max_metric_length: u32,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            user_agent: format!("do-agent-{}", env!("CARGO_PKG_VERSION")),
            endpoints: Vec::new(),
            metadata_endpoint: DEFAULT_METADATA_ENDPOINT.to_string(),
            auth_endpoint: DEFAULT_AUTH_ENDPOINT.to_string(),
            trusted: None,
            timeout: DEFAULT_TIMEOUT,
            wait_interval: DEFAULT_WAIT_INTERVAL,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            max_metric_length: DEFAULT_MAX_METRIC_LENGTH,
        }
    }
}

impl ClientOptions {
    pub fn validate(&self) -> Result<(), ClientError> {
        if let Some(app) = &self.trusted {
            if self.endpoints.is_empty() {
                return Err(ClientError::InvalidOptions(
                    "trusted app requires at least one sonar endpoint".into(),
                ));
            }
            if app.name.is_empty() {
                return Err(ClientError::InvalidOptions(
                    "trusted app name must not be empty".into(),
                ));
            }
        }
        if self.max_batch_size == 0 || self.max_metric_length == 0 {
            return Err(ClientError::InvalidOptions(
                "limits must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

struct Batch {
    encoder: FrameEncoder<Vec<u8>>,
    samples: usize,
    timestamped: bool,
    /// Fingerprints buffered in this batch (zero-time mode).
    buffered: HashSet<String>,
}

impl Batch {
    fn new(timestamped: bool) -> Self {
        Self {
            encoder: FrameEncoder::new(Vec::new()),
            samples: 0,
            timestamped,
            buffered: HashSet::new(),
        }
    }
}

#[derive(Default)]
struct State {
    batch: Option<Batch>,
    /// Last buffered timestamp per fingerprint (timestamped mode).
    last_send: HashMap<String, i64>,
    last_flush_attempt: Option<Instant>,
    last_flush_connection: Option<Instant>,
    consecutive_failures: u32,
    breaker_wait: Duration,
    bootstrap_required: bool,
    droplet: Option<DropletIdentity>,
}

impl State {
    fn record_failure(&mut self) {
        self.consecutive_failures += 1;
        if self.consecutive_failures > CIRCUIT_BREAKER_THRESHOLD {
            let jitter: u32 = rand::thread_rng().gen_range(0..3);
            let minutes = (self.consecutive_failures + jitter) as u64;
            self.breaker_wait = Duration::from_secs(minutes * 60).min(MAX_WAIT_INTERVAL);
        }
    }

    /// Drops the buffer unless it carries explicit timestamps.
    fn discard_zero_time(&mut self) {
        if matches!(&self.batch, Some(b) if !b.timestamped) {
            self.clear_buffer();
        }
    }

    fn clear_buffer(&mut self) {
        self.batch = None;
        let now_ms = Utc::now().timestamp_millis();
        self.last_send
            .retain(|_, ms| now_ms - *ms <= LAST_SEND_RETENTION_MS);
    }
}

pub struct Client {
    http: reqwest::Client,
    opts: ClientOptions,
    limits: Arc<Limits>,
    state: Mutex<State>,
    flush_guard: tokio::sync::Mutex<()>,
}

impl Client {
    pub fn new(opts: ClientOptions) -> Result<Self, ClientError> {
        opts.validate()?;

        let http = reqwest::Client::builder()
            .user_agent(opts.user_agent.clone())
            .timeout(opts.timeout)
            .connect_timeout(opts.timeout)
            .pool_max_idle_per_host(0)
            .build()
            .map_err(ClientError::Transport)?;

        let limits = Arc::new(Limits::new(
            opts.wait_interval,
            opts.max_batch_size,
            opts.max_metric_length,
        ));
        let state = State {
            bootstrap_required: opts.trusted.is_none(),
            ..State::default()
        };

        Ok(Self {
            http,
            opts,
            limits,
            state: Mutex::new(state),
            flush_guard: tokio::sync::Mutex::new(()),
        })
    }

    pub fn limits(&self) -> Arc<Limits> {
        Arc::clone(&self.limits)
    }

    pub fn max_batch_size(&self) -> usize {
        self.limits.max_batch_size()
    }

    pub fn max_metric_length(&self) -> usize {
        self.limits.max_metric_length()
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    /// Resolved droplet identity, if bootstrap has completed.
    pub fn droplet(&self) -> Option<DropletIdentity> {
        self.state().droplet.clone()
    }

    /// Buffers a sample whose timestamp the server assigns.
    pub fn add_metric(&self, def: &Definition, value: f64, labels: &[&str]) -> Result<(), ClientError> {
        self.add_record(def, 0, value, labels)
    }

    /// Buffers a sample with an explicit timestamp.
    pub fn add_metric_with_time(
        &self,
        def: &Definition,
        at: DateTime<Utc>,
        value: f64,
        labels: &[&str],
    ) -> Result<(), ClientError> {
        self.add_record(def, at.timestamp_millis(), value, labels)
    }

    fn add_record(&self, def: &Definition, ms: i64, value: f64, labels: &[&str]) -> Result<(), ClientError> {
        let timestamped = ms != 0;
        let lfm = def.lfm(labels)?;
        let wait_ms = self.limits.wait_interval().as_millis() as i64;

        let mut st = self.state();
        let State {
            batch, last_send, ..
        } = &mut *st;
        let batch = batch.get_or_insert_with(|| Batch::new(timestamped));
        if batch.timestamped != timestamped {
            return Err(ClientError::TimestampModeMismatch);
        }

        if timestamped {
            if let Some(last) = last_send.get(&lfm) {
                if ms - *last < wait_ms {
                    return Err(ClientError::SendTooFrequent);
                }
            }
        } else if batch.buffered.contains(&lfm) {
            return Err(ClientError::SendTooFrequent);
        }

        stream::write_record(&mut batch.encoder, &lfm, ms, value)?;
        batch.samples += 1;
        if timestamped {
            last_send.insert(lfm, ms);
        } else {
            batch.buffered.insert(lfm);
        }
        Ok(())
    }

    /// Sends the buffered samples to sonar.
    pub async fn flush(&self) -> Result<(), ClientError> {
        let Ok(_guard) = self.flush_guard.try_lock() else {
            return Err(ClientError::FlushTooFrequent);
        };

        let now = Instant::now();
        let (body, samples, needs_bootstrap) = {
            let mut st = self.state();
            if let Some(last) = st.last_flush_attempt {
                if now.duration_since(last) < self.limits.wait_interval() {
                    st.discard_zero_time();
                    return Err(ClientError::FlushTooFrequent);
                }
            }
            st.last_flush_attempt = Some(now);

            if st.consecutive_failures > CIRCUIT_BREAKER_THRESHOLD {
                if let Some(conn) = st.last_flush_connection {
                    if now.duration_since(conn) < st.breaker_wait {
                        st.discard_zero_time();
                        return Err(ClientError::CircuitBreaker);
                    }
                }
            }

            let Some(batch) = st.batch.as_mut() else {
                return Ok(());
            };
            if let Err(e) = batch.encoder.flush() {
                st.record_failure();
                st.discard_zero_time();
                return Err(ClientError::WriteFailure(e));
            }
            let body = batch.encoder.get_ref().clone();
            let samples = batch.samples;

            st.last_flush_connection = Some(now);
            let needs_bootstrap = self.opts.trusted.is_none()
                && (st.bootstrap_required || st.consecutive_failures > REBOOTSTRAP_THRESHOLD);
            (body, samples, needs_bootstrap)
        };

        if needs_bootstrap {
            match bootstrap::bootstrap(
                &self.http,
                &self.opts.metadata_endpoint,
                &self.opts.auth_endpoint,
            )
            .await
            {
                Ok(identity) => {
                    let mut st = self.state();
                    st.droplet = Some(identity);
                    st.bootstrap_required = false;
                }
                Err(e) => {
                    let mut st = self.state();
                    st.record_failure();
                    st.discard_zero_time();
                    return Err(ClientError::AuthBootstrapFailed(e));
                }
            }
        }

        let (url, app_key) = self.target()?;
        debug!("sending {} metrics to {}", samples, url);

        let sent = self
            .http
            .post(&url)
            .header(CONTENT_TYPE, BINARY_CONTENT_TYPE)
            .header(AUTH_KEY_HEADER, app_key)
            .body(body)
            .send()
            .await;
        let resp = match sent {
            Ok(resp) => resp,
            Err(e) => {
                let mut st = self.state();
                st.record_failure();
                st.discard_zero_time();
                return Err(ClientError::Transport(e));
            }
        };

        let status = resp.status();
        let is_json = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with(JSON_CONTENT_TYPE));

        if status != StatusCode::ACCEPTED {
            if let Err(e) = resp.bytes().await {
                debug!("failed to drain sonar response body: {}", e);
            }
            let mut st = self.state();
            st.record_failure();
            st.discard_zero_time();
            return Err(ClientError::UnexpectedHttpStatus {
                status: status.as_u16(),
            });
        }

        if is_json {
            match resp.json::<ControlResponse>().await {
                Ok(control) => {
                    debug!(
                        "sonar response: success={} frequency={} max_metrics={} max_lfm={}",
                        control.success, control.frequency, control.max_metrics, control.max_lfm
                    );
                    self.limits.apply(&control);
                }
                Err(e) => warn!("failed to read sonar response body: {}", e),
            }
        } else if let Err(e) = resp.bytes().await {
            debug!("failed to drain sonar response body: {}", e);
        }

        let mut st = self.state();
        st.consecutive_failures = 0;
        st.breaker_wait = Duration::ZERO;
        st.clear_buffer();
        Ok(())
    }

    /// Time left before a flush would be accepted.
    pub fn wait_duration(&self) -> Duration {
        let st = self.state();
        let now = Instant::now();

        let interval = st
            .last_flush_attempt
            .map(|t| self.limits.wait_interval().saturating_sub(now.duration_since(t)))
            .unwrap_or_default();

        let breaker = if st.consecutive_failures > CIRCUIT_BREAKER_THRESHOLD {
            st.last_flush_connection
                .map(|t| st.breaker_wait.saturating_sub(now.duration_since(t)))
                .unwrap_or_default()
        } else {
            Duration::ZERO
        };

        interval.max(breaker)
    }

    /// Drops everything buffered since the last flush.
    pub fn discard_buffer(&self) {
        self.state().clear_buffer();
    }

    /// Forces a full wait interval before the next flush.
    pub fn reset_wait_timer(&self) {
        self.state().last_flush_attempt = Some(Instant::now());
    }

    fn target(&self) -> Result<(String, String), ClientError> {
        let endpoint = self.opts.endpoints.choose(&mut rand::thread_rng());

        if let Some(app) = &self.opts.trusted {
            let endpoint = endpoint.ok_or_else(|| {
                ClientError::InvalidOptions("trusted app with no sonar endpoints".into())
            })?;
            return Ok((
                format!("{}/v1/metrics/trusted/{}", endpoint, app.name),
                app.key.clone(),
            ));
        }

        let st = self.state();
        let identity = st
            .droplet
            .as_ref()
            .ok_or(ClientError::AuthBootstrapFailed(BootstrapError::Empty("identity")))?;
        let endpoint = endpoint.map(String::as_str).unwrap_or(DEFAULT_SONAR_ENDPOINT);
        Ok((
            format!("{}/v1/metrics/droplet_id/{}", endpoint, identity.host_id),
            identity.app_key.clone(),
        ))
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl crate::limiter::RateLimiter for Client {
    fn wait_duration(&self) -> Duration {
        Client::wait_duration(self)
    }

    fn name(&self) -> &str {
        "tsclient"
    }
}
