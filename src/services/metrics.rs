//! Record-only metrics hooks
//!
//! The engine reports run lifecycle events to a [`MetricsSink`]; what happens
//! to them (logging, counters, storage) is up to the embedding service.

use std::sync::Mutex;

use uuid::Uuid;

use crate::models::{Algorithm, GenerationStats, PerformanceMetrics};

#[derive(Debug, Clone, PartialEq)]
pub enum MetricEvent {
    RunStarted {
        run_id: Uuid,
        algorithm: Algorithm,
        paint_count: usize,
        time_limit_ms: u64,
    },
    GenerationCompleted {
        run_id: Uuid,
        stats: GenerationStats,
    },
    RunFinished {
        run_id: Uuid,
        metrics: PerformanceMetrics,
    },
    RequestRejected {
        code: &'static str,
        message: String,
    },
}

pub trait MetricsSink: Send + Sync {
    fn record(&self, event: &MetricEvent);
}

/// Drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopSink;

impl MetricsSink for NoopSink {
    fn record(&self, _event: &MetricEvent) {}
}

/// Emits each event as a structured `tracing` event
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn record(&self, event: &MetricEvent) {
        match event {
            MetricEvent::RunStarted {
                run_id,
                algorithm,
                paint_count,
                time_limit_ms,
            } => tracing::info!(
                %run_id,
                algorithm = algorithm.as_str(),
                paint_count,
                time_limit_ms,
                "optimization started"
            ),
            MetricEvent::GenerationCompleted { run_id, stats } => tracing::trace!(
                %run_id,
                generation = stats.generation,
                best = stats.best_fitness,
                diversity = stats.diversity,
                "generation completed"
            ),
            MetricEvent::RunFinished { run_id, metrics } => tracing::info!(
                %run_id,
                elapsed_ms = metrics.time_elapsed,
                iterations = metrics.iterations_completed,
                delta_e = metrics.final_best_delta_e,
                converged = metrics.convergence_achieved,
                target_met = metrics.target_met,
                "optimization finished"
            ),
            MetricEvent::RequestRejected { code, message } => {
                tracing::warn!(code, %message, "optimization request rejected")
            }
        }
    }
}

/// Keeps every event in memory, for tests and diagnostics
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<MetricEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<MetricEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }
}

impl MetricsSink for MemorySink {
    fn record(&self, event: &MetricEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event.clone());
        }
    }
}
