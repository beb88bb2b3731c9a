//! Writer pushing aggregated rows to sonar through the push client.

use super::{MetricWriter, WriteError};
use crate::aggregate::MetricWithValue;
use crate::client::{Client, ClientError, Definition};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, error};

pub struct Sonar {
    client: Arc<Client>,
    first_write_sent: bool,
}

impl Sonar {
    pub fn new(client: Arc<Client>) -> Self {
        Self {
            client,
            first_write_sent: false,
        }
    }
}

#[async_trait]
impl MetricWriter for Sonar {
    async fn write(&mut self, metrics: &[MetricWithValue]) -> Result<(), WriteError> {
        let max = self.client.max_batch_size();
        if metrics.len() > max {
            return Err(WriteError::TooManyMetrics {
                count: metrics.len(),
                max,
            });
        }

        // the whole batch is checked before anything reaches the client buffer
        let max_len = self.client.max_metric_length();
        for m in metrics {
            let fingerprint = m.fingerprint()?;
            if fingerprint.len() > max_len {
                return Err(WriteError::MetricTooLong {
                    fingerprint,
                    max: max_len,
                });
            }
        }

        for m in metrics {
            let def = Definition::new(m.name.clone()).with_common_labels(m.labels.clone());
            if let Err(e) = self.client.add_metric(&def, m.value, &[]) {
                self.client.discard_buffer();
                return Err(e.into());
            }
        }

        let result = self.client.flush().await;
        let first_write = !self.first_write_sent;
        self.first_write_sent = true;

        match result {
            Ok(()) => {
                debug!("wrote {} metrics to sonar", metrics.len());
                Ok(())
            }
            // sonar answers 429 to an agent that restarted within its wait interval
            Err(ClientError::UnexpectedHttpStatus { status: 429 }) if first_write => {
                debug!("ignoring 429 on first write");
                Ok(())
            }
            Err(e) => {
                error!("failed to flush: {}", e);
                Err(e.into())
            }
        }
    }

    fn name(&self) -> &str {
        "sonar"
    }
}
