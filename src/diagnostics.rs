//! Agent self-diagnostics.
//!
//! The agent keeps its own prometheus registry holding the build-info gauge
//! and the `sonar_diagnostic` counter. The counter is labeled with the kind
//! of the last push failure and is what the diagnostic fallback pushes.

use crate::model::MetricFamily;
use prometheus::{CounterVec, GaugeVec, Opts, Registry};

pub const DIAGNOSTIC_METRIC: &str = "sonar_diagnostic";
pub const BUILD_INFO_METRIC: &str = "sonar_build_info";

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Git revision the binary was built from.
pub fn revision() -> &'static str {
    option_env!("VERGEN_GIT_SHA").unwrap_or("unknown")
}

pub struct Diagnostics {
    registry: Registry,
    diagnostic: CounterVec,
}

impl Diagnostics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let diagnostic = CounterVec::new(
            Opts::new(DIAGNOSTIC_METRIC, "do-agent diagnostic information"),
            &["error"],
        )?;
        let build_info = GaugeVec::new(
            Opts::new(
                BUILD_INFO_METRIC,
                "do-agent build information, value is always 1",
            ),
            &["version", "revision"],
        )?;
        build_info.with_label_values(&[VERSION, revision()]).set(1.0);

        registry.register(Box::new(diagnostic.clone()))?;
        registry.register(Box::new(build_info))?;

        Ok(Self {
            registry,
            diagnostic,
        })
    }

    /// Counts one failure of the given kind.
    pub fn record(&self, kind: &str) {
        self.diagnostic.with_label_values(&[kind]).inc();
    }

    pub fn count(&self, kind: &str) -> f64 {
        self.diagnostic.with_label_values(&[kind]).get()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Current families of the diagnostics registry. The counter family is
    /// absent until the first failure is recorded.
    pub fn gather(&self) -> Vec<MetricFamily> {
        self.registry
            .gather()
            .iter()
            .map(MetricFamily::from)
            .collect()
    }
}
