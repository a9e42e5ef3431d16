use crate::{DeliveryReport, DeliveryResult, Sink};
use async_trait::async_trait;
use svcmon_common::types::CollectionBatch;
use tokio::io::AsyncWriteExt;

/// Writes every sample as one JSON object per line on stdout.
pub struct StdoutSink;

impl StdoutSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

/// Render a batch as JSON lines.
pub fn render(batch: &CollectionBatch) -> serde_json::Result<String> {
    let mut out = String::new();
    for sample in &batch.samples {
        out.push_str(&serde_json::to_string(sample)?);
        out.push('\n');
    }
    Ok(out)
}

#[async_trait]
impl Sink for StdoutSink {
    fn name(&self) -> &str {
        "stdout"
    }

    async fn deliver(&self, batch: &CollectionBatch) -> DeliveryResult {
        let out = render(batch)?;
        let mut stdout = tokio::io::stdout();
        stdout.write_all(out.as_bytes()).await?;
        stdout.flush().await?;
        Ok(DeliveryReport {
            accepted: batch.samples.len(),
            rejected: Vec::new(),
        })
    }
}
