use serde::{Deserialize, Serialize};

use crate::models::{OptimizationError, Paint, PerceptualColor, VolumeConstraints};

pub const MIN_PAINT_COUNT: usize = 2;
pub const MAX_FORMULA_PAINTS: usize = 5;
pub const MIN_TIME_LIMIT_MS: u64 = 1_000;
pub const MAX_TIME_LIMIT_MS: u64 = 30_000;

/// Mixing fidelity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MixMode {
    /// LAB weighted average
    #[default]
    Standard,
    /// Kubelka-Munk spectral mixing
    Enhanced,
}

/// Search algorithm requested by the caller
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgorithmChoice {
    #[default]
    Auto,
    DifferentialEvolution,
    TpeHybrid,
}

/// Algorithm that actually ran
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Algorithm {
    DifferentialEvolution,
    TpeHybrid,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::DifferentialEvolution => "differential_evolution",
            Algorithm::TpeHybrid => "tpe_hybrid",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationConfig {
    #[serde(default)]
    pub mode: MixMode,
    #[serde(rename = "maxPaintCount", default = "default_max_paint_count")]
    pub max_paint_count: usize,
    #[serde(rename = "timeLimit_ms", default = "default_time_limit_ms")]
    pub time_limit_ms: u64,
    #[serde(rename = "accuracyTarget", default = "default_accuracy_target")]
    pub accuracy_target: f64,
    #[serde(default)]
    pub algorithm: AlgorithmChoice,
    /// Fixes the random stream so a run can be replayed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

fn default_max_paint_count() -> usize {
    MAX_FORMULA_PAINTS
}

fn default_time_limit_ms() -> u64 {
    28_000
}

fn default_accuracy_target() -> f64 {
    2.0
}

impl Default for OptimizationConfig {
    fn default() -> Self {
        Self {
            mode: MixMode::default(),
            max_paint_count: default_max_paint_count(),
            time_limit_ms: default_time_limit_ms(),
            accuracy_target: default_accuracy_target(),
            algorithm: AlgorithmChoice::default(),
            seed: None,
        }
    }
}

impl OptimizationConfig {
    pub fn validate(&self) -> Result<(), OptimizationError> {
        if !(MIN_PAINT_COUNT..=MAX_FORMULA_PAINTS).contains(&self.max_paint_count) {
            return Err(OptimizationError::config(
                "maxPaintCount",
                format!(
                    "{} outside [{MIN_PAINT_COUNT}, {MAX_FORMULA_PAINTS}]",
                    self.max_paint_count
                ),
            ));
        }
        if !(MIN_TIME_LIMIT_MS..=MAX_TIME_LIMIT_MS).contains(&self.time_limit_ms) {
            return Err(OptimizationError::config(
                "timeLimit_ms",
                format!(
                    "{} outside [{MIN_TIME_LIMIT_MS}, {MAX_TIME_LIMIT_MS}]",
                    self.time_limit_ms
                ),
            ));
        }
        if !self.accuracy_target.is_finite() || self.accuracy_target <= 0.0 {
            return Err(OptimizationError::config(
                "accuracyTarget",
                format!("must be positive, got {}", self.accuracy_target),
            ));
        }
        Ok(())
    }
}

/// Full request as received from the HTTP layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizationRequest {
    pub target: PerceptualColor,
    pub paints: Vec<Paint>,
    pub constraints: VolumeConstraints,
    #[serde(default)]
    pub config: OptimizationConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_json_field_names() {
        let config: OptimizationConfig = serde_json::from_str(
            r#"{"mode": "enhanced", "maxPaintCount": 3, "timeLimit_ms": 5000,
                "accuracyTarget": 1.5, "algorithm": "tpe_hybrid"}"#,
        )
        .unwrap();
        assert_eq!(config.mode, MixMode::Enhanced);
        assert_eq!(config.max_paint_count, 3);
        assert_eq!(config.time_limit_ms, 5000);
        assert_eq!(config.algorithm, AlgorithmChoice::TpeHybrid);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn config_ranges_are_enforced() {
        let config = OptimizationConfig {
            max_paint_count: 6,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("maxPaintCount"));

        let config = OptimizationConfig {
            time_limit_ms: 500,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("timeLimit_ms"));

        let config = OptimizationConfig {
            accuracy_target: 0.0,
            ..Default::default()
        };
        assert!(config.validate().unwrap_err().to_string().contains("accuracyTarget"));
    }
}
