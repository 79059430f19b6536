//! Upload of telemetry metrics to an external collector.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
mod recording;
#[cfg(test)]
pub(crate) use recording::RecordingTelemetryClient;

/// Sink for telemetry metrics. `payload` is a JSON document.
#[async_trait]
pub trait TelemetryClient: Send + Sync {
    async fn upload_metric(&self, payload: String) -> Result<()>;
}

/// Posts metrics to a telemetry collector endpoint.
pub struct HttpTelemetryClient {
    client: reqwest::Client,
    url: String,
}

impl HttpTelemetryClient {
    /// # Arguments
    /// * `url` - Collector endpoint receiving the metrics
    /// * `timeout_sec` - Request timeout in seconds
    pub fn new(url: String, timeout_sec: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_sec))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl TelemetryClient for HttpTelemetryClient {
    async fn upload_metric(&self, payload: String) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload)
            .send()
            .await
            .context("Failed to connect to telemetry collector")?;

        if !response.status().is_success() {
            anyhow::bail!(
                "Telemetry upload failed with status: {}",
                response.status()
            );
        }
        Ok(())
    }
}

/// Writes metrics to the log. Used when no collector is configured.
pub struct LoggingTelemetryClient;

#[async_trait]
impl TelemetryClient for LoggingTelemetryClient {
    async fn upload_metric(&self, payload: String) -> Result<()> {
        info!("Telemetry metric: {}", payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_logging_client_accepts_payload() {
        LoggingTelemetryClient
            .upload_metric("{\"duration\":1}".to_string())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_recording_client_keeps_payloads() {
        let client = RecordingTelemetryClient::new();
        client.upload_metric("a".to_string()).await.unwrap();
        client.upload_metric("b".to_string()).await.unwrap();
        assert_eq!(client.payloads(), vec!["a", "b"]);

        let failing = RecordingTelemetryClient::failing();
        assert!(failing.upload_metric("c".to_string()).await.is_err());
        assert_eq!(failing.payloads(), vec!["c"]);
    }

    #[tokio::test]
    async fn test_http_client_reports_connection_failure() {
        // Nothing listens on port 9 of localhost
        let client = HttpTelemetryClient::new("http://127.0.0.1:9/metrics".to_string(), 2).unwrap();
        assert!(client.upload_metric("{}".to_string()).await.is_err());
    }
}
