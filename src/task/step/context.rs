use super::statistics::{StatisticsError, StepStatistics};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::sync::{Arc, Mutex};

/// Telemetry metrics reported by the steps of one task, keyed `step.<step>.<metric>`.
#[derive(Debug, Default, Clone)]
pub struct StepsTelemetry {
    metrics: Arc<Mutex<BTreeMap<String, String>>>,
}

impl StepsTelemetry {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self, key: String, value: String) {
        self.metrics.lock().unwrap().insert(key, value);
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.metrics.lock().unwrap().get(key).cloned()
    }

    pub fn snapshot(&self) -> BTreeMap<String, String> {
        self.metrics.lock().unwrap().clone()
    }
}

/// Context handed to a step for the duration of its execution only.
pub struct StepContext {
    step_key: &'static str,
    statistics: StepStatistics,
    telemetry: StepsTelemetry,
}

impl StepContext {
    pub(crate) fn new(step_key: &'static str, telemetry: StepsTelemetry) -> Self {
        Self {
            step_key,
            statistics: StepStatistics::new(),
            telemetry,
        }
    }

    pub fn statistics(&mut self) -> &mut StepStatistics {
        &mut self.statistics
    }

    /// Shortcut for `statistics().add(key, value)`.
    pub fn add_statistic(&mut self, key: &str, value: impl Display) -> Result<(), StatisticsError> {
        self.statistics.add(key, value).map(|_| ())
    }

    /// Records a metric for telemetry only; it does not show up in the step log line.
    pub fn add_telemetry_metric(&self, key: &str, value: impl Display) {
        self.telemetry
            .add(format!("step.{}.{}", self.step_key, key), value.to_string());
    }

    pub(crate) fn into_statistics(self) -> StepStatistics {
        self.statistics
    }
}
