use analysis_task_engine::config::{AppConfig, CliConfig, FileConfig};
use analysis_task_engine::metrics::{self, metrics_handler};
use analysis_task_engine::reindex::{
    BranchSyncProcessor, LoggingBranchIndexer, ReindexMonitor, ReindexScheduler,
};
use analysis_task_engine::task::{create_interrupter, ActiveTasks};
use analysis_task_engine::telemetry::{HttpTelemetryClient, LoggingTelemetryClient, TelemetryClient};
use analysis_task_engine::{SqliteProjectStore, SqliteQueueStore, TaskWorker};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    let original_path = match path_buf.canonicalize() {
        Ok(path) => path,
        Err(msg) => {
            if msg.kind() == std::io::ErrorKind::NotFound {
                path_buf
            } else {
                return Err(msg).with_context(|| format!("Error resolving path: {}", s));
            }
        }
    };
    if original_path.is_absolute() {
        return Ok(original_path);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(original_path))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Directory holding queue.db and project.db.
    #[clap(long, value_parser = parse_path)]
    pub db_dir: Option<PathBuf>,

    /// Optional TOML configuration file. Its values override the CLI ones.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping).
    #[clap(long, default_value_t = 9092)]
    pub metrics_port: u16,

    /// Maximum execution time of a task in seconds. 0 disables the timeout.
    #[clap(long, default_value_t = 0)]
    pub task_timeout_secs: u64,

    /// Delay between two polls of an empty queue, in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub worker_poll_interval_ms: u64,

    /// Resynchronize every branch right after startup.
    #[clap(long)]
    pub reindex_on_startup: bool,
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            db_dir: self.db_dir.clone(),
            metrics_port: self.metrics_port,
            task_timeout_secs: self.task_timeout_secs,
            worker_poll_interval_ms: self.worker_poll_interval_ms,
            reindex_on_startup: self.reindex_on_startup,
        }
    }
}

async fn run_metrics_server(port: u16, shutdown: CancellationToken) -> Result<()> {
    let app = Router::new().route("/metrics", get(metrics_handler));
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port))
        .await
        .with_context(|| format!("Failed to bind metrics port {}", port))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .context("Failed to initialize logging")?;

    let file_config = cli_args
        .config
        .as_deref()
        .map(FileConfig::load)
        .transpose()?;
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Initializing metrics...");
    metrics::init_metrics();

    let queue_store = Arc::new(SqliteQueueStore::new(config.queue_db_path())?);
    let project_store = Arc::new(SqliteProjectStore::new(config.project_db_path())?);

    let telemetry: Arc<dyn TelemetryClient> = match &config.reindex.telemetry_url {
        Some(url) => {
            info!("Reindex telemetry will be sent to {}", url);
            Arc::new(HttpTelemetryClient::new(
                url.clone(),
                config.reindex.telemetry_timeout_secs,
            )?)
        }
        None => Arc::new(LoggingTelemetryClient),
    };
    let monitor = Arc::new(ReindexMonitor::new(
        config.reindex.telemetry_enabled,
        config.reindex.monitor_interval(),
        queue_store.clone(),
        telemetry,
    ));
    let scheduler = ReindexScheduler::new(
        project_store.clone(),
        project_store.clone(),
        queue_store.clone(),
        queue_store.clone(),
    )
    .with_monitor(monitor.clone());

    let active_tasks = Arc::new(ActiveTasks::new());
    let interrupter = create_interrupter(active_tasks.clone(), config.task_timeout());
    let worker = Arc::new(
        TaskWorker::new(
            queue_store.clone(),
            active_tasks,
            interrupter,
            config.worker_poll_interval(),
        )
        .with_processor(Arc::new(BranchSyncProcessor::new(
            project_store.clone(),
            Arc::new(LoggingBranchIndexer),
        ))),
    );

    if config.reindex_on_startup {
        let submitted = scheduler
            .trigger_global()
            .context("Failed to schedule startup reindexing")?;
        info!("Startup reindexing scheduled {} branch sync tasks", submitted);
    }

    let shutdown = CancellationToken::new();

    let metrics_server = {
        let shutdown = shutdown.clone();
        let port = config.metrics_port;
        tokio::spawn(async move {
            if let Err(e) = run_metrics_server(port, shutdown).await {
                error!("Metrics server failed: {:#}", e);
            }
        })
    };
    info!("Metrics available at port {}!", config.metrics_port);

    let worker_handle = {
        let worker = worker.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { worker.run(shutdown).await })
    };

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutdown requested");
    shutdown.cancel();
    monitor.stop();

    if let Err(e) = worker_handle.await {
        error!("Task worker ended abnormally: {}", e);
    }
    if let Err(e) = metrics_server.await {
        error!("Metrics server ended abnormally: {}", e);
    }
    Ok(())
}
