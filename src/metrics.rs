use axum::{http::StatusCode, response::IntoResponse};
use lazy_static::lazy_static;
use prometheus::{CounterVec, Encoder, HistogramOpts, HistogramVec, IntGauge, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Metric name prefix for all task engine metrics
const PREFIX: &str = "task_engine";

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // Task metrics
    pub static ref TASK_EXECUTIONS_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_task_executions_total"), "Total processed tasks by type and final status"),
        &["task_type", "status"]
    ).expect("Failed to create task_executions_total metric");

    pub static ref TASK_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_task_duration_seconds"),
            "Task processing duration in seconds"
        )
        .buckets(vec![0.01, 0.1, 0.5, 1.0, 5.0, 30.0, 120.0, 600.0]),
        &["task_type"]
    ).expect("Failed to create task_duration_seconds metric");

    pub static ref TASKS_IN_PROGRESS: IntGauge = IntGauge::new(
        format!("{PREFIX}_tasks_in_progress"),
        "Number of tasks currently being processed"
    ).expect("Failed to create tasks_in_progress metric");

    // Step metrics
    pub static ref STEP_DURATION_SECONDS: HistogramVec = HistogramVec::new(
        HistogramOpts::new(
            format!("{PREFIX}_step_duration_seconds"),
            "Pipeline step duration in seconds"
        )
        .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 5.0, 30.0]),
        &["step", "status"]
    ).expect("Failed to create step_duration_seconds metric");

    // Reindexing metrics
    pub static ref REINDEX_TASKS_SUBMITTED_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_reindex_tasks_submitted_total"), "Branch sync tasks submitted by trigger"),
        &["trigger"]
    ).expect("Failed to create reindex_tasks_submitted_total metric");

    pub static ref STEP_TELEMETRY_TOTAL: CounterVec = CounterVec::new(
        Opts::new(format!("{PREFIX}_step_telemetry_total"), "Sum of the numeric telemetry metrics reported by steps"),
        &["metric"]
    ).expect("Failed to create step_telemetry_total metric");
}

/// Register all metrics with the registry. Safe to call more than once.
pub fn init_metrics() {
    let _ = REGISTRY.register(Box::new(TASK_EXECUTIONS_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(TASK_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(TASKS_IN_PROGRESS.clone()));
    let _ = REGISTRY.register(Box::new(STEP_DURATION_SECONDS.clone()));
    let _ = REGISTRY.register(Box::new(REINDEX_TASKS_SUBMITTED_TOTAL.clone()));
    let _ = REGISTRY.register(Box::new(STEP_TELEMETRY_TOTAL.clone()));

    tracing::info!("Metrics system initialized successfully");
}

pub fn record_task_execution(task_type: &str, status: &str, duration: Duration) {
    TASK_EXECUTIONS_TOTAL
        .with_label_values(&[task_type, status])
        .inc();
    TASK_DURATION_SECONDS
        .with_label_values(&[task_type])
        .observe(duration.as_secs_f64());
}

pub fn set_task_in_progress(in_progress: bool) {
    if in_progress {
        TASKS_IN_PROGRESS.inc();
    } else {
        TASKS_IN_PROGRESS.dec();
    }
}

pub fn record_step_execution(step: &str, status: &str, duration: Duration) {
    STEP_DURATION_SECONDS
        .with_label_values(&[step, status])
        .observe(duration.as_secs_f64());
}

pub fn record_reindex_submitted(trigger: &str, count: usize) {
    REINDEX_TASKS_SUBMITTED_TOTAL
        .with_label_values(&[trigger])
        .inc_by(count as f64);
}

/// Negative and non-finite values cannot be added to a counter and are skipped.
pub fn record_step_telemetry(metric: &str, value: f64) {
    if value.is_finite() && value >= 0.0 {
        STEP_TELEMETRY_TOTAL.with_label_values(&[metric]).inc_by(value);
    }
}

/// Encode the registry in the Prometheus text format.
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let mut buffer = vec![];
    encoder.encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

pub async fn metrics_handler() -> impl IntoResponse {
    match encode_metrics() {
        Ok(body) => (StatusCode::OK, body),
        Err(e) => {
            tracing::error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {}", e),
            )
        }
    }
}
