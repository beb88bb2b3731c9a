//! Human-readable writer used with `--stdout-only`.

use super::{MetricWriter, WriteError};
use crate::aggregate::MetricWithValue;
use async_trait::async_trait;
use std::io::Write;

pub struct Stdout<W: Write + Send = std::io::Stdout> {
    out: W,
}

impl Stdout {
    pub fn new() -> Self {
        Self::with_writer(std::io::stdout())
    }
}

impl Default for Stdout {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Stdout<W> {
    pub fn with_writer(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

/// Formats one row as `[name]: k=v,k=v: value`.
pub fn format_row(m: &MetricWithValue) -> String {
    let labels: Vec<String> = m
        .labels
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    format!("[{}]: {}: {}", m.name, labels.join(","), m.value)
}

#[async_trait]
impl<W: Write + Send> MetricWriter for Stdout<W> {
    async fn write(&mut self, metrics: &[MetricWithValue]) -> Result<(), WriteError> {
        for m in metrics {
            writeln!(self.out, "{}", format_row(m))?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn name(&self) -> &str {
        "stdout"
    }
}
