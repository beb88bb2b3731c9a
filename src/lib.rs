//! do-agent library.
//!
//! Collects host metrics (node, process and scraped Prometheus endpoints),
//! rewrites them to sonar names, aggregates away high-cardinality labels and
//! pushes them to the DigitalOcean monitoring backend at the pace the server
//! asks for. When a push fails the agent sends a small diagnostic batch so
//! the backend learns why.
//!
//! # Usage
//!
//! ```rust,no_run
//! use do_agent::aggregate::aggregate;
//! use do_agent::decorate::{standard_chain, Decorator};
//! use do_agent::model::{MetricFamily, MetricKind, Sample};
//!
//! let chain = standard_chain(50, vec![]).unwrap();
//! let mut mfs = vec![MetricFamily::new("node_load1", "", MetricKind::Gauge)
//!     .with_sample(Sample::gauge(0.5))];
//! chain.decorate(&mut mfs);
//!
//! for row in aggregate(&mfs, None).unwrap() {
//!     println!("{} {}", row.name, row.value);
//! }
//! ```

pub mod agent;
pub mod aggregate;
pub mod cli;
pub mod client;
pub mod collectors;
pub mod config;
pub mod decorate;
pub mod diagnostics;
pub mod fingerprint;
pub mod limiter;
pub mod logging;
pub mod model;
pub mod process;
pub mod registry;
pub mod system;
pub mod web;
pub mod whitelist;
pub mod writer;

// Re-export main types for convenience
pub use agent::Agent;
pub use client::{Client, ClientError, ClientOptions};
pub use model::{Label, MetricFamily, MetricKind, Sample, Value};
pub use registry::Registry;
