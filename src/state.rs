use std::sync::Arc;

use crate::config::EngineSettings;
use crate::services::metrics::{MetricsSink, NoopSink, TracingSink};

/// Shared, read-only engine context handed to every run
#[derive(Clone)]
pub struct EngineState {
    pub settings: Arc<EngineSettings>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl EngineState {
    pub fn new(settings: EngineSettings, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            settings: Arc::new(settings),
            metrics,
        }
    }

    /// Settings from `AOP_*` variables, events logged through `tracing`
    pub fn from_env() -> Self {
        Self::new(EngineSettings::from_env(), Arc::new(TracingSink))
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(EngineSettings::default(), Arc::new(NoopSink))
    }
}

impl std::fmt::Debug for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineState")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
