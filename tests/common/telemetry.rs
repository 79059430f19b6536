//! In-memory telemetry sink

use analysis_task_engine::telemetry::TelemetryClient;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Mutex;

/// Keeps every uploaded payload so tests can inspect what the engine reported.
#[derive(Default)]
pub struct RecordingTelemetryClient {
    payloads: Mutex<Vec<String>>,
}

impl RecordingTelemetryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn payloads(&self) -> Vec<String> {
        self.payloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl TelemetryClient for RecordingTelemetryClient {
    async fn upload_metric(&self, payload: String) -> Result<()> {
        self.payloads.lock().unwrap().push(payload);
        Ok(())
    }
}
