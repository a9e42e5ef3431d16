//! Delivery of collection batches to a time-series backend.
//!
//! A [`Sink`] receives each cycle's [`CollectionBatch`] exactly once. It
//! reports which samples were accepted; batches are never retried because
//! the next cycle supersedes them.

pub mod channels;
pub mod error;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use svcmon_common::types::CollectionBatch;

pub use error::DeliveryError;

/// A sample the sink refused to write.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedSample {
    pub metric: String,
    pub reason: String,
}

/// Outcome of a successful delivery call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DeliveryReport {
    pub accepted: usize,
    pub rejected: Vec<RejectedSample>,
}

impl DeliveryReport {
    pub fn reject(&mut self, metric: &str, reason: impl Into<String>) {
        self.rejected.push(RejectedSample {
            metric: metric.to_string(),
            reason: reason.into(),
        });
    }
}

pub type DeliveryResult = error::Result<DeliveryReport>;

/// Downstream consumer of collection batches.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink type name (e.g. `"graphite"`), used for logging.
    fn name(&self) -> &str;

    /// Deliver one batch. An empty batch is still delivered; it signals liveness.
    async fn deliver(&self, batch: &CollectionBatch) -> DeliveryResult;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SinkConfig {
    Graphite {
        address: String,
        #[serde(default = "default_graphite_prefix")]
        prefix: String,
        #[serde(default = "default_timeout_secs")]
        timeout_secs: u64,
    },
    #[default]
    Stdout,
}

fn default_graphite_prefix() -> String {
    "svc".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

/// Build a sink from configuration.
///
/// # Errors
///
/// Returns [`DeliveryError::InvalidConfig`] if the configuration is unusable
/// (for example an empty graphite address or a zero timeout).
pub fn build_sink(config: &SinkConfig) -> error::Result<Box<dyn Sink>> {
    match config {
        SinkConfig::Graphite {
            address,
            prefix,
            timeout_secs,
        } => {
            if address.trim().is_empty() {
                return Err(DeliveryError::InvalidConfig(
                    "graphite address is empty".to_string(),
                ));
            }
            if *timeout_secs == 0 {
                return Err(DeliveryError::InvalidConfig(
                    "graphite timeout_secs must be greater than zero".to_string(),
                ));
            }
            Ok(Box::new(channels::graphite::GraphiteSink::new(
                address.trim(),
                prefix,
                std::time::Duration::from_secs(*timeout_secs),
            )))
        }
        SinkConfig::Stdout => Ok(Box::new(channels::stdout::StdoutSink::new())),
    }
}
