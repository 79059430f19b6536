use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub db_dir: Option<String>,
    pub metrics_port: Option<u16>,
    pub task_timeout_secs: Option<u64>,
    pub worker_poll_interval_ms: Option<u64>,
    pub reindex_on_startup: Option<bool>,

    // Feature configs
    pub reindex: Option<ReindexConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ReindexConfig {
    pub telemetry_enabled: Option<bool>,
    /// Collector endpoint; metrics are only logged when absent
    pub telemetry_url: Option<String>,
    pub telemetry_timeout_secs: Option<u64>,
    pub monitor_interval_secs: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
