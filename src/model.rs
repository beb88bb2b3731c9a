//! In-memory metric model shared by every pipeline stage.
//!
//! A [`MetricFamily`] groups samples that share a name, a kind and a help
//! string. Families are produced fresh each cycle by the collectors, mutated
//! in place by the decorator chain and finally consumed by the aggregator.

use prometheus::proto;
use std::fmt;

/// The kind of a metric family. Only gauges, counters and untyped values
/// are read numerically by the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricKind {
    Counter,
    Gauge,
    Untyped,
    Summary,
    Histogram,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Counter => "counter",
            MetricKind::Gauge => "gauge",
            MetricKind::Untyped => "untyped",
            MetricKind::Summary => "summary",
            MetricKind::Histogram => "histogram",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single label pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Label {
    pub name: String,
    pub value: String,
}

impl Label {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// The value carried by a sample. The variant always matches the kind of
/// the owning family.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Counter(f64),
    Gauge(f64),
    Untyped(f64),
    Summary {
        sum: f64,
        count: u64,
        quantiles: Vec<(f64, f64)>,
    },
    Histogram {
        sum: f64,
        count: u64,
        buckets: Vec<(f64, u64)>,
    },
}

impl Value {
    pub fn kind(&self) -> MetricKind {
        match self {
            Value::Counter(_) => MetricKind::Counter,
            Value::Gauge(_) => MetricKind::Gauge,
            Value::Untyped(_) => MetricKind::Untyped,
            Value::Summary { .. } => MetricKind::Summary,
            Value::Histogram { .. } => MetricKind::Histogram,
        }
    }

    /// Numeric value for gauges, counters and untyped samples.
    pub fn scalar(&self) -> Option<f64> {
        match self {
            Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) => Some(*v),
            _ => None,
        }
    }

    /// Value used to rank samples: the scalar for single valued kinds and
    /// the sample sum for summaries and histograms.
    pub fn rank(&self) -> f64 {
        match self {
            Value::Gauge(v) | Value::Counter(v) | Value::Untyped(v) => *v,
            Value::Summary { sum, .. } | Value::Histogram { sum, .. } => *sum,
        }
    }

    /// Applies `f` to the scalar. Summaries and histograms are untouched.
    pub fn map_scalar(&mut self, f: impl FnOnce(f64) -> f64) {
        if let Value::Counter(v) | Value::Gauge(v) | Value::Untyped(v) = self {
            *v = f(*v);
        }
    }
}

/// One (labels, value, optional timestamp) triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    labels: Vec<Label>,
    value: Value,
    timestamp_ms: Option<i64>,
}

impl Sample {
    pub fn new(value: Value) -> Self {
        Self {
            labels: Vec::new(),
            value,
            timestamp_ms: None,
        }
    }

    pub fn gauge(value: f64) -> Self {
        Self::new(Value::Gauge(value))
    }

    pub fn counter(value: f64) -> Self {
        Self::new(Value::Counter(value))
    }

    pub fn untyped(value: f64) -> Self {
        Self::new(Value::Untyped(value))
    }

    pub fn with_label(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push(Label::new(name, value));
        self
    }

    pub fn with_timestamp_ms(mut self, ts: i64) -> Self {
        self.timestamp_ms = Some(ts);
        self
    }

    pub fn labels(&self) -> &[Label] {
        &self.labels
    }

    pub fn labels_mut(&mut self) -> &mut Vec<Label> {
        &mut self.labels
    }

    /// Returns the value of the first label named `name`.
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels
            .iter()
            .find(|l| l.name == name)
            .map(|l| l.value.as_str())
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn timestamp_ms(&self) -> Option<i64> {
        self.timestamp_ms
    }
}

/// A named group of samples sharing a kind and help string.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricFamily {
    pub name: String,
    pub help: String,
    kind: MetricKind,
    pub samples: Vec<Sample>,
}

impl MetricFamily {
    pub fn new(name: impl Into<String>, help: impl Into<String>, kind: MetricKind) -> Self {
        Self {
            name: name.into(),
            help: help.into(),
            kind,
            samples: Vec::new(),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    /// Builder style append, used heavily by collectors and tests.
    pub fn with_sample(mut self, sample: Sample) -> Self {
        self.samples.push(sample);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Converts into the `prometheus` protobuf model so the family can be
    /// rendered with `prometheus::TextEncoder`.
    pub fn to_proto(&self) -> proto::MetricFamily {
        let mut mf = proto::MetricFamily::default();
        mf.set_name(self.name.clone());
        mf.set_help(self.help.clone());
        mf.set_field_type(match self.kind {
            MetricKind::Counter => proto::MetricType::COUNTER,
            MetricKind::Gauge => proto::MetricType::GAUGE,
            MetricKind::Untyped => proto::MetricType::UNTYPED,
            MetricKind::Summary => proto::MetricType::SUMMARY,
            MetricKind::Histogram => proto::MetricType::HISTOGRAM,
        });

        let metrics = self
            .samples
            .iter()
            .map(|sample| {
                let labels = sample
                    .labels
                    .iter()
                    .map(|l| {
                        let mut pair = proto::LabelPair::default();
                        pair.set_name(l.name.clone());
                        pair.set_value(l.value.clone());
                        pair
                    })
                    .collect();
                let mut m = proto::Metric::from_label(labels);
                match &sample.value {
                    Value::Counter(v) => {
                        let mut c = proto::Counter::default();
                        c.set_value(*v);
                        m.set_counter(c);
                    }
                    Value::Gauge(v) => {
                        let mut g = proto::Gauge::default();
                        g.set_value(*v);
                        m.set_gauge(g);
                    }
                    Value::Untyped(v) => {
                        let mut u = proto::Untyped::default();
                        u.set_value(*v);
                        m.untyped = Some(u).into();
                    }
                    Value::Summary {
                        sum,
                        count,
                        quantiles,
                    } => {
                        let mut s = proto::Summary::default();
                        s.set_sample_sum(*sum);
                        s.set_sample_count(*count);
                        s.set_quantile(
                            quantiles
                                .iter()
                                .map(|(q, v)| {
                                    let mut quantile = proto::Quantile::default();
                                    quantile.set_quantile(*q);
                                    quantile.set_value(*v);
                                    quantile
                                })
                                .collect(),
                        );
                        m.set_summary(s);
                    }
                    Value::Histogram {
                        sum,
                        count,
                        buckets,
                    } => {
                        let mut h = proto::Histogram::default();
                        h.set_sample_sum(*sum);
                        h.set_sample_count(*count);
                        h.set_bucket(
                            buckets
                                .iter()
                                .map(|(bound, cumulative)| {
                                    let mut b = proto::Bucket::default();
                                    b.set_upper_bound(*bound);
                                    b.set_cumulative_count(*cumulative);
                                    b
                                })
                                .collect(),
                        );
                        m.set_histogram(h);
                    }
                }
                if let Some(ts) = sample.timestamp_ms {
                    m.set_timestamp_ms(ts);
                }
                m
            })
            .collect();
        mf.set_metric(metrics);
        mf
    }
}

impl From<&proto::MetricFamily> for MetricFamily {
    fn from(mf: &proto::MetricFamily) -> Self {
        let kind = match mf.get_field_type() {
            proto::MetricType::COUNTER => MetricKind::Counter,
            proto::MetricType::GAUGE => MetricKind::Gauge,
            proto::MetricType::SUMMARY => MetricKind::Summary,
            proto::MetricType::HISTOGRAM => MetricKind::Histogram,
            _ => MetricKind::Untyped,
        };

        let samples = mf
            .get_metric()
            .iter()
            .map(|m| {
                let value = match kind {
                    MetricKind::Counter => Value::Counter(m.counter.value()),
                    MetricKind::Gauge => Value::Gauge(m.gauge.value()),
                    MetricKind::Untyped => Value::Untyped(m.untyped.value()),
                    MetricKind::Summary => {
                        let s = m.get_summary();
                        Value::Summary {
                            sum: s.sample_sum(),
                            count: s.sample_count(),
                            quantiles: s
                                .get_quantile()
                                .iter()
                                .map(|q| (q.quantile(), q.value()))
                                .collect(),
                        }
                    }
                    MetricKind::Histogram => {
                        let h = m.get_histogram();
                        Value::Histogram {
                            sum: h.sample_sum(),
                            count: h.sample_count(),
                            buckets: h
                                .get_bucket()
                                .iter()
                                .map(|b| (b.upper_bound(), b.cumulative_count()))
                                .collect(),
                        }
                    }
                };
                let labels = m
                    .get_label()
                    .iter()
                    .map(|l| Label::new(l.name(), l.value()))
                    .collect();
                let timestamp_ms = match m.timestamp_ms() {
                    0 => None,
                    ts => Some(ts),
                };
                Sample {
                    labels,
                    value,
                    timestamp_ms,
                }
            })
            .collect();

        MetricFamily {
            name: mf.name().to_string(),
            help: mf.help().to_string(),
            kind,
            samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use prometheus::{Encoder, TextEncoder};

    #[test]
    fn test_scalar_only_for_numeric_kinds() {
        assert_eq!(Value::Gauge(1.5).scalar(), Some(1.5));
        assert_eq!(Value::Counter(2.0).scalar(), Some(2.0));
        assert_eq!(Value::Untyped(3.0).scalar(), Some(3.0));
        let summary = Value::Summary {
            sum: 4.0,
            count: 2,
            quantiles: vec![],
        };
        assert_eq!(summary.scalar(), None);
        assert_eq!(summary.rank(), 4.0);
    }

    #[test]
    fn test_map_scalar_leaves_histograms_alone() {
        let mut v = Value::Counter(1024.0);
        v.map_scalar(|x| x / 512.0);
        assert_eq!(v, Value::Counter(2.0));

        let mut h = Value::Histogram {
            sum: 10.0,
            count: 1,
            buckets: vec![(1.0, 1)],
        };
        let before = h.clone();
        h.map_scalar(|x| x * 2.0);
        assert_eq!(h, before);
    }

    #[test]
    fn test_label_lookup() {
        let s = Sample::gauge(1.0).with_label("a", "1").with_label("b", "2");
        assert_eq!(s.label("b"), Some("2"));
        assert_eq!(s.label("c"), None);
    }

    #[test]
    fn test_proto_conversion_preserves_samples() {
        let registry = prometheus::Registry::new();
        let counter = prometheus::CounterVec::new(
            prometheus::Opts::new("requests_total", "Requests served"),
            &["code"],
        )
        .unwrap();
        registry.register(Box::new(counter.clone())).unwrap();
        counter.with_label_values(&["200"]).inc_by(3.0);

        let families: Vec<MetricFamily> = registry.gather().iter().map(MetricFamily::from).collect();
        assert_eq!(families.len(), 1);
        let mf = &families[0];
        assert_eq!(mf.name, "requests_total");
        assert_eq!(mf.kind(), MetricKind::Counter);
        assert_eq!(mf.samples[0].value(), &Value::Counter(3.0));
        assert_eq!(mf.samples[0].label("code"), Some("200"));
    }

    #[test]
    fn test_untyped_and_gauge_survive_proto_round_trip() {
        let untyped = MetricFamily::new("scraped_thing", "", MetricKind::Untyped)
            .with_sample(Sample::untyped(7.0).with_label("job", "db"));
        let back = MetricFamily::from(&untyped.to_proto());
        assert_eq!(back.kind(), MetricKind::Untyped);
        assert_eq!(back.samples[0].value(), &Value::Untyped(7.0));
        assert_eq!(back.samples[0].label("job"), Some("db"));

        let gauge = MetricFamily::new("sonar_load5", "", MetricKind::Gauge)
            .with_sample(Sample::gauge(1.25));
        let back = MetricFamily::from(&gauge.to_proto());
        assert_eq!(back.samples[0].value(), &Value::Gauge(1.25));
    }

    #[test]
    fn test_to_proto_renders_with_text_encoder() {
        let mf = MetricFamily::new("sonar_load1", "load", MetricKind::Gauge)
            .with_sample(Sample::gauge(0.5).with_label("host", "a"));
        let mut buf = Vec::new();
        TextEncoder::new().encode(&[mf.to_proto()], &mut buf).unwrap();
        let text = String::from_utf8(buf).unwrap();
        assert!(text.contains("# TYPE sonar_load1 gauge"));
        assert!(text.contains("sonar_load1{host=\"a\"} 0.5"));
    }
}
