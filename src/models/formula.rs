use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Algorithm, PerceptualColor};

/// One paint's share of a formula
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaintRatio {
    pub paint_id: String,
    pub paint_name: String,
    pub volume_ml: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccuracyRating {
    Excellent,
    Good,
    Acceptable,
    Poor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixingComplexity {
    Simple,
    Moderate,
    Complex,
}

impl MixingComplexity {
    pub fn from_component_count(count: usize) -> Self {
        match count {
            0..=2 => MixingComplexity::Simple,
            3..=4 => MixingComplexity::Moderate,
            _ => MixingComplexity::Complex,
        }
    }
}

/// Final mixing formula returned to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizedFormula {
    pub paint_ratios: Vec<PaintRatio>,
    pub total_volume: f64,
    pub predicted_color: PerceptualColor,
    pub predicted_hex: String,
    #[serde(rename = "deltaE")]
    pub delta_e: f64,
    pub accuracy_rating: AccuracyRating,
    pub mixing_complexity: MixingComplexity,
    pub kubelka_munk_k: f64,
    pub kubelka_munk_s: f64,
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraint_violations: Vec<String>,
}

/// Why a search loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    TargetReached,
    Converged,
    Stagnated,
    TimedOut,
    MaxIterations,
}

impl TerminationReason {
    /// The search settled on its own rather than running out of budget
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            TerminationReason::TargetReached
                | TerminationReason::Converged
                | TerminationReason::Stagnated
        )
    }
}

/// Population statistics for one DE generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerationStats {
    pub generation: usize,
    pub best_fitness: f64,
    pub mean_fitness: f64,
    pub worst_fitness: f64,
    pub fitness_std_dev: f64,
    pub diversity: f64,
    pub feasible_ratio: f64,
    pub mutation_factor: f64,
    pub crossover_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceMetrics {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    /// Wall-clock milliseconds
    pub time_elapsed: u64,
    pub iterations_completed: usize,
    pub evaluations: usize,
    pub algorithm_used: Algorithm,
    pub termination_reason: TerminationReason,
    pub convergence_achieved: bool,
    pub target_met: bool,
    pub early_termination: bool,
    #[serde(rename = "initialBestDeltaE")]
    pub initial_best_delta_e: f64,
    #[serde(rename = "finalBestDeltaE")]
    pub final_best_delta_e: f64,
    pub improvement_rate: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub generation_history: Vec<GenerationStats>,
}

/// Formula plus the report of the run that produced it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationOutcome {
    pub formula: OptimizedFormula,
    pub metrics: PerformanceMetrics,
}
