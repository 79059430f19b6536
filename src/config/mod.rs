mod file_config;

pub use file_config::{FileConfig, ReindexConfig};

use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Duration;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub db_dir: Option<PathBuf>,
    pub metrics_port: u16,
    pub task_timeout_secs: u64,
    pub worker_poll_interval_ms: u64,
    pub reindex_on_startup: bool,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    // Core settings
    pub db_dir: PathBuf,
    pub metrics_port: u16,
    /// Zero disables the timeout
    pub task_timeout_secs: u64,
    pub worker_poll_interval_ms: u64,
    pub reindex_on_startup: bool,

    // Feature configs (with defaults)
    pub reindex: ReindexSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let db_dir = file
            .db_dir
            .map(PathBuf::from)
            .or_else(|| cli.db_dir.clone())
            .ok_or_else(|| {
                anyhow::anyhow!("db_dir must be specified via --db-dir or in config file")
            })?;

        if !db_dir.exists() {
            bail!("Database directory does not exist: {:?}", db_dir);
        }
        if !db_dir.is_dir() {
            bail!("db_dir is not a directory: {:?}", db_dir);
        }

        let metrics_port = file.metrics_port.unwrap_or(cli.metrics_port);
        let task_timeout_secs = file.task_timeout_secs.unwrap_or(cli.task_timeout_secs);
        let worker_poll_interval_ms = file
            .worker_poll_interval_ms
            .unwrap_or(cli.worker_poll_interval_ms);
        let reindex_on_startup = file.reindex_on_startup.unwrap_or(cli.reindex_on_startup);

        let reindex_file = file.reindex.unwrap_or_default();
        let defaults = ReindexSettings::default();
        let reindex = ReindexSettings {
            telemetry_enabled: reindex_file
                .telemetry_enabled
                .unwrap_or(defaults.telemetry_enabled),
            telemetry_url: reindex_file.telemetry_url,
            telemetry_timeout_secs: reindex_file
                .telemetry_timeout_secs
                .unwrap_or(defaults.telemetry_timeout_secs),
            monitor_interval_secs: reindex_file
                .monitor_interval_secs
                .unwrap_or(defaults.monitor_interval_secs),
        };
        if reindex.monitor_interval_secs == 0 {
            bail!("reindex.monitor_interval_secs must be greater than zero");
        }

        Ok(Self {
            db_dir,
            metrics_port,
            task_timeout_secs,
            worker_poll_interval_ms,
            reindex_on_startup,
            reindex,
        })
    }

    pub fn queue_db_path(&self) -> PathBuf {
        self.db_dir.join("queue.db")
    }

    pub fn project_db_path(&self) -> PathBuf {
        self.db_dir.join("project.db")
    }

    pub fn task_timeout(&self) -> Option<Duration> {
        (self.task_timeout_secs > 0).then(|| Duration::from_secs(self.task_timeout_secs))
    }

    pub fn worker_poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

#[derive(Debug, Clone)]
pub struct ReindexSettings {
    pub telemetry_enabled: bool,
    pub telemetry_url: Option<String>,
    pub telemetry_timeout_secs: u64,
    pub monitor_interval_secs: u64,
}

impl Default for ReindexSettings {
    fn default() -> Self {
        Self {
            telemetry_enabled: true,
            telemetry_url: None,
            telemetry_timeout_secs: 30,
            monitor_interval_secs: 5,
        }
    }
}

impl ReindexSettings {
    pub fn monitor_interval(&self) -> Duration {
        Duration::from_secs(self.monitor_interval_secs)
    }
}
