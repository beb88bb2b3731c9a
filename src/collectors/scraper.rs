//! Scraper for Prometheus text endpoints.
//!
//! Each collect issues one GET, transparently inflates gzip bodies, parses
//! the text exposition format and keeps whitelisted families with the extra
//! labels appended. Two gauges describing the scrape itself are emitted
//! every cycle, so a failed scrape still reports `collector_success 0`.

use super::{CollectError, Collector};
use crate::model::{Label, MetricFamily, MetricKind, Sample, Value};
use crate::whitelist::Whitelist;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use async_trait::async_trait;
use flate2::read::GzDecoder;
use reqwest::header::{ACCEPT, ACCEPT_ENCODING, AUTHORIZATION, CONTENT_ENCODING};
use std::io::Read;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const DEFAULT_SCRAPE_TIMEOUT: Duration = Duration::from_secs(5);

const ACCEPT_HEADER: &str = "text/plain;version=0.0.4;q=1,*/*;q=0.1";
const SCRAPE_TIMEOUT_HEADER: &str = "X-Prometheus-Scrape-Timeout-Seconds";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerAuth {
    Token(String),
    /// Re-read and trimmed on every request so rotated tokens are picked up.
    TokenFile(PathBuf),
}

#[derive(Debug, Clone)]
pub struct ScraperOptions {
    pub timeout: Duration,
    pub bearer: Option<BearerAuth>,
    pub user_agent: String,
}

impl Default for ScraperOptions {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_SCRAPE_TIMEOUT,
            bearer: None,
            user_agent: format!("do-agent-{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

pub struct Scraper {
    name: String,
    endpoint: String,
    extra_labels: Vec<Label>,
    whitelist: Whitelist,
    timeout: Duration,
    bearer: Option<BearerAuth>,
    http: reqwest::Client,
}

impl Scraper {
    pub fn new(
        name: impl Into<String>,
        endpoint: &str,
        extra_labels: Vec<Label>,
        whitelist: Whitelist,
        opts: ScraperOptions,
    ) -> Result<Self, CollectError> {
        let name = name.into();
        let http = reqwest::Client::builder()
            .user_agent(opts.user_agent)
            .timeout(opts.timeout)
            .build()
            .map_err(|source| CollectError::Http {
                collector: name.clone(),
                source,
            })?;

        Ok(Self {
            endpoint: endpoint.trim_end_matches('/').to_string(),
            name,
            extra_labels,
            whitelist,
            timeout: opts.timeout,
            bearer: opts.bearer,
            http,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn bearer_token(&self) -> Result<Option<String>, CollectError> {
        match &self.bearer {
            None => Ok(None),
            Some(BearerAuth::Token(token)) => Ok(Some(token.clone())),
            Some(BearerAuth::TokenFile(path)) => std::fs::read_to_string(path)
                .map(|t| Some(t.trim().to_string()))
                .map_err(|source| CollectError::Io {
                    collector: self.name.clone(),
                    source,
                }),
        }
    }

    async fn read_body(&self) -> Result<String, CollectError> {
        let http_err = |source| CollectError::Http {
            collector: self.name.clone(),
            source,
        };

        let mut req = self
            .http
            .get(&self.endpoint)
            .header(ACCEPT, ACCEPT_HEADER)
            .header(ACCEPT_ENCODING, "gzip")
            .header(SCRAPE_TIMEOUT_HEADER, format!("{:.6}", self.timeout.as_secs_f64()));
        if let Some(token) = self.bearer_token()? {
            req = req.header(AUTHORIZATION, format!("Bearer {}", token));
        }

        let resp = req.send().await.map_err(http_err)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(CollectError::gather(
                &self.name,
                format!("server returned bad HTTP status {}", status),
            ));
        }

        let gzipped = resp
            .headers()
            .get(CONTENT_ENCODING)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.eq_ignore_ascii_case("gzip"));
        let bytes = resp.bytes().await.map_err(http_err)?;

        if !gzipped {
            return String::from_utf8(bytes.to_vec())
                .map_err(|e| CollectError::gather(&self.name, e.to_string()));
        }

        let mut body = String::new();
        GzDecoder::new(bytes.as_ref())
            .read_to_string(&mut body)
            .map_err(|source| CollectError::Io {
                collector: self.name.clone(),
                source,
            })?;
        Ok(body)
    }

    /// Fetches, parses and filters one scrape.
    pub async fn scrape(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let body = self.read_body().await?;
        let scrape = prometheus_parse::Scrape::parse(body.lines().map(|l| Ok(l.to_string())))
            .map_err(|e| CollectError::gather(&self.name, format!("parsing message failed: {}", e)))?;

        let mut families = convert(scrape);
        families.retain(|mf| self.whitelist.allows(&mf.name));
        if !self.extra_labels.is_empty() {
            for sample in families.iter_mut().flat_map(|mf| mf.samples.iter_mut()) {
                sample.labels_mut().extend(self.extra_labels.iter().cloned());
            }
        }
        Ok(families)
    }

    fn scrape_families(&self, duration: Duration, success: bool) -> [MetricFamily; 2] {
        let gauge = |suffix: &str, help: &str, value: f64| {
            MetricFamily::new(
                format!("{}_scrape_collector_{}", self.name, suffix),
                format!("{}: {}", self.name, help),
                MetricKind::Gauge,
            )
            .with_sample(Sample::gauge(value).with_label("collector", self.name.as_str()))
        };
        [
            gauge(
                "duration_seconds",
                "Duration of a collector scrape.",
                duration.as_secs_f64(),
            ),
            gauge(
                "success",
                "Whether a collector succeeded.",
                if success { 1.0 } else { 0.0 },
            ),
        ]
    }
}

#[async_trait]
impl Collector for Scraper {
    fn name(&self) -> &str {
        &self.name
    }

    async fn collect(&self) -> Result<Vec<MetricFamily>, CollectError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(self.timeout, self.scrape()).await {
            Ok(result) => result,
            Err(_) => Err(CollectError::gather(
                &self.name,
                format!("scrape timed out after {:?}", self.timeout),
            )),
        };

        let (mut families, success) = match result {
            Ok(families) => {
                debug!("{}: scraped {} families", self.name, families.len());
                (families, true)
            }
            Err(e) => {
                warn!("collection failed for {:?}: {}", self.name, e);
                (Vec::new(), false)
            }
        };
        families.extend(self.scrape_families(start.elapsed(), success));
        Ok(families)
    }
}

/// Groups parsed samples into families in first-seen order. Timestamps are
/// dropped; the push client assigns time.
fn convert(scrape: prometheus_parse::Scrape) -> Vec<MetricFamily> {
    let mut families: Vec<MetricFamily> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for s in scrape.samples {
        let mut labels: Vec<Label> = s
            .labels
            .iter()
            .map(|(k, v)| Label::new(k.as_str(), v.as_str()))
            .collect();
        labels.sort_by(|a, b| a.name.cmp(&b.name));

        let (name, value) = match s.value {
            prometheus_parse::Value::Counter(v) => (s.metric, Value::Counter(v)),
            prometheus_parse::Value::Gauge(v) => (s.metric, Value::Gauge(v)),
            prometheus_parse::Value::Untyped(v) => (s.metric, Value::Untyped(v)),
            prometheus_parse::Value::Histogram(buckets) => {
                let base = s
                    .metric
                    .strip_suffix("_bucket")
                    .unwrap_or(&s.metric)
                    .to_string();
                let buckets = buckets
                    .iter()
                    .map(|b| (b.less_than, b.count as u64))
                    .collect();
                (
                    base,
                    Value::Histogram {
                        sum: 0.0,
                        count: 0,
                        buckets,
                    },
                )
            }
            prometheus_parse::Value::Summary(quantiles) => {
                let quantiles = quantiles.iter().map(|q| (q.quantile, q.count)).collect();
                (
                    s.metric,
                    Value::Summary {
                        sum: 0.0,
                        count: 0,
                        quantiles,
                    },
                )
            }
        };

        let mut sample = Sample::new(value);
        *sample.labels_mut() = labels;

        let idx = match index.get(&name) {
            Some(&idx) => idx,
            None => {
                let help = scrape.docs.get(&name).cloned().unwrap_or_default();
                families.push(MetricFamily::new(name.clone(), help, sample.value().kind()));
                index.insert(name, families.len() - 1);
                families.len() - 1
            }
        };
        families[idx].samples.push(sample);
    }

    fold_sum_and_count(families)
}

/// Moves `<base>_sum` and `<base>_count` samples into the matching summary
/// or histogram samples of `<base>`.
fn fold_sum_and_count(mut families: Vec<MetricFamily>) -> Vec<MetricFamily> {
    let complex: HashSet<String> = families
        .iter()
        .filter(|mf| matches!(mf.kind(), MetricKind::Summary | MetricKind::Histogram))
        .map(|mf| mf.name.clone())
        .collect();
    if complex.is_empty() {
        return families;
    }

    let mut totals: HashMap<(String, Vec<Label>), (Option<f64>, Option<f64>)> = HashMap::new();
    families.retain(|mf| {
        if matches!(mf.kind(), MetricKind::Summary | MetricKind::Histogram) {
            return true;
        }
        let (base, is_sum) = if let Some(base) = mf.name.strip_suffix("_sum") {
            (base, true)
        } else if let Some(base) = mf.name.strip_suffix("_count") {
            (base, false)
        } else {
            return true;
        };
        if !complex.contains(base) {
            return true;
        }

        for s in &mf.samples {
            let entry = totals
                .entry((base.to_string(), s.labels().to_vec()))
                .or_default();
            let v = s.value().scalar();
            if is_sum {
                entry.0 = v;
            } else {
                entry.1 = v;
            }
        }
        false
    });

    for mf in families.iter_mut() {
        if !complex.contains(&mf.name) {
            continue;
        }
        let name = mf.name.clone();
        for s in mf.samples.iter_mut() {
            let Some(&(sum_v, count_v)) = totals.get(&(name.clone(), s.labels().to_vec())) else {
                continue;
            };
            if let Value::Summary { sum, count, .. } | Value::Histogram { sum, count, .. } =
                s.value_mut()
            {
                *sum = sum_v.unwrap_or(0.0);
                *count = count_v.unwrap_or(0.0) as u64;
            }
        }
    }
    families
}
