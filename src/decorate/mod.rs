//! Decorators rewrite gathered families in place before aggregation.
//!
//! A [`Chain`] applies its decorators in registration order. The standard
//! chain maps node-exporter names to sonar names, converts units, rewrites
//! CPU labels, lowercases names, keeps the top-K process series and finally
//! appends the tenancy labels given on the command line.

pub mod compat;
pub mod labels;
pub mod lowercase;
pub mod topk;

use crate::model::{Label, MetricFamily};
use regex::Regex;

pub use compat::{Cpu, Disk, Names};
pub use labels::{LabelAppender, NamespaceLabelRequired};
pub use lowercase::LowercaseNames;
pub use topk::TopK;

/// Families whose name matches this pattern are subject to top-K.
pub const PROCESS_TOPK_PATTERN: &str = "^sonar_process_";

/// Mutates a set of metric families in place.
pub trait Decorator: Send + Sync {
    fn decorate(&self, families: &mut [MetricFamily]);
    fn name(&self) -> &str;
}

/// An ordered list of decorators.
#[derive(Default)]
pub struct Chain {
    decorators: Vec<Box<dyn Decorator>>,
}

impl Chain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, decorator: impl Decorator + 'static) -> Self {
        self.decorators.push(Box::new(decorator));
        self
    }

    pub fn push(&mut self, decorator: Box<dyn Decorator>) {
        self.decorators.push(decorator);
    }

    /// Names of the decorators in application order.
    pub fn names(&self) -> Vec<&str> {
        self.decorators.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.decorators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decorators.is_empty()
    }
}

impl Decorator for Chain {
    fn decorate(&self, families: &mut [MetricFamily]) {
        for d in &self.decorators {
            d.decorate(families);
        }
    }

    fn name(&self) -> &str {
        "Chain"
    }
}

/// Builds the agent's standard chain. Top-K runs before the label appender
/// so appending stays proportional to the surviving samples.
pub fn standard_chain(process_topk: usize, additional_labels: Vec<Label>) -> Result<Chain, regex::Error> {
    let mut chain = Chain::new()
        .with(Names)
        .with(Disk)
        .with(Cpu)
        .with(LowercaseNames)
        .with(TopK::new(process_topk, Regex::new(PROCESS_TOPK_PATTERN)?));

    if !additional_labels.is_empty() {
        chain.push(Box::new(LabelAppender::new(additional_labels)));
    }
    Ok(chain)
}
