use super::TelemetryClient;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps every uploaded payload in memory.
#[derive(Default)]
pub struct RecordingTelemetryClient {
    payloads: Mutex<Vec<String>>,
    fail: bool,
}

impl RecordingTelemetryClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// A client that records payloads but reports every upload as failed.
    pub fn failing() -> Self {
        Self {
            payloads: Mutex::default(),
            fail: true,
        }
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryClient for RecordingTelemetryClient {
    async fn upload_metric(&self, payload: String) -> Result<()> {
        self.payloads.lock().unwrap().push(payload);
        if self.fail {
            anyhow::bail!("collector unreachable");
        }
        Ok(())
    }
}
