use crate::error::{DeliveryError, Result};
use crate::{DeliveryReport, DeliveryResult, Sink};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::time::Duration;
use svcmon_common::types::{CollectionBatch, MetricSample, Tags};
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Graphite plaintext protocol sink using tagged series
/// (`path;tag=value value timestamp`).
pub struct GraphiteSink {
    address: String,
    prefix: String,
    timeout: Duration,
}

impl GraphiteSink {
    pub fn new(address: &str, prefix: &str, timeout: Duration) -> Self {
        Self {
            address: address.to_string(),
            prefix: prefix.trim_matches('.').to_string(),
            timeout,
        }
    }

    /// Encode a batch into plaintext lines. Samples that cannot be represented
    /// are recorded as rejected in the returned report.
    pub fn encode(&self, batch: &CollectionBatch) -> (String, DeliveryReport) {
        let mut payload = String::new();
        let mut report = DeliveryReport::default();

        for sample in &batch.samples {
            match self.encode_line(sample) {
                Ok(line) => {
                    payload.push_str(&line);
                    report.accepted += 1;
                }
                Err(reason) => report.reject(&sample.name, reason),
            }
        }

        (payload, report)
    }

    /// Per-cycle liveness series, written even when the batch has no samples.
    fn heartbeat(&self, batch: &CollectionBatch, report: &DeliveryReport) -> String {
        let mut tags = Tags::new();
        tags.insert("cluster".to_string(), batch.cluster.clone());
        [
            ("collector.samples", report.accepted as f64),
            ("collector.failed_commands", batch.failed_commands() as f64),
        ]
        .into_iter()
        .filter_map(|(name, value)| {
            self.encode_line(&MetricSample {
                name: name.to_string(),
                value,
                tags: tags.clone(),
                timestamp: batch.timestamp,
            })
            .ok()
        })
        .collect()
    }

    fn encode_line(&self, sample: &MetricSample) -> std::result::Result<String, String> {
        if !sample.value.is_finite() {
            return Err(format!("non-finite value {}", sample.value));
        }
        let path = sanitize_path(&sample.name);
        if path.is_empty() {
            return Err("empty metric path".to_string());
        }

        let mut line = String::new();
        if !self.prefix.is_empty() {
            line.push_str(&self.prefix);
            line.push('.');
        }
        line.push_str(&path);
        for (key, value) in &sample.tags {
            let key = sanitize_tag(key);
            let value = sanitize_tag(value);
            if key.is_empty() || value.is_empty() {
                continue;
            }
            let _ = write!(line, ";{key}={value}");
        }
        let _ = writeln!(line, " {} {}", sample.value, sample.timestamp);
        Ok(line)
    }

    async fn send(&self, payload: &[u8]) -> Result<()> {
        let mut stream = TcpStream::connect(&self.address)
            .await
            .map_err(|e| DeliveryError::Connect {
                address: self.address.clone(),
                message: e.to_string(),
            })?;
        stream.write_all(payload).await?;
        stream.flush().await?;
        stream.shutdown().await?;
        Ok(())
    }
}

#[async_trait]
impl Sink for GraphiteSink {
    fn name(&self) -> &str {
        "graphite"
    }

    async fn deliver(&self, batch: &CollectionBatch) -> DeliveryResult {
        let (mut payload, report) = self.encode(batch);
        if batch.samples.is_empty() {
            tracing::info!(address = %self.address, cluster = %batch.cluster, "Empty batch, writing heartbeat only");
        }
        payload.push_str(&self.heartbeat(batch, &report));

        timeout(self.timeout, self.send(payload.as_bytes()))
            .await
            .map_err(|_| DeliveryError::Timeout(self.timeout))??;

        tracing::debug!(
            address = %self.address,
            accepted = report.accepted,
            rejected = report.rejected.len(),
            "Batch written to graphite"
        );
        Ok(report)
    }
}

fn sanitize_path(name: &str) -> String {
    name.split('.')
        .filter(|segment| !segment.is_empty())
        .map(|segment| {
            segment
                .chars()
                .map(|c| {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        c
                    } else {
                        '_'
                    }
                })
                .collect::<String>()
        })
        .collect::<Vec<_>>()
        .join(".")
}

// Graphite forbids `;` `!` `^` `=` and `~` in tags, and whitespace ends the path.
fn sanitize_tag(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| match c {
            ';' | '!' | '^' | '=' | '~' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}
