//! Durable time-series sink over HTTP.
//!
//! Ships each event to the configured ingest endpoint. The endpoint owns
//! batching, retries, and storage; from this side a failed write is logged
//! and counted by the sink worker and the stream moves on.

use crate::error::Result;
use crate::sink::EventSink;
use async_trait::async_trait;
use normalizer::Event;
use std::time::Duration;

/// HTTP ingest sink for the durable store.
pub struct DurableSink {
    client: reqwest::Client,
    endpoint: String,
}

impl DurableSink {
    pub fn new(endpoint: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl EventSink for DurableSink {
    fn name(&self) -> &'static str {
        "durable"
    }

    async fn write(&self, event: &Event) -> Result<()> {
        self.client
            .post(&self.endpoint)
            .json(event)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
