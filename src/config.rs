//! Algorithm tuning constants.
//!
//! Loaded once at startup (defaults, optionally overridden by `AOP_*`
//! environment variables) and shared read-only across runs.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Differential evolution mutation/crossover scheme
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeStrategy {
    Rand1Bin,
    Best1Bin,
    CurrentToBest1,
    Rand2Bin,
    Best2Bin,
    /// Pick per individual from population diversity and relative fitness
    #[default]
    Adaptive,
}

impl FromStr for DeStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', '/'], "").as_str() {
            "rand1bin" | "rand1" => Ok(DeStrategy::Rand1Bin),
            "best1bin" | "best1" => Ok(DeStrategy::Best1Bin),
            "currenttobest1" | "currenttobest1bin" => Ok(DeStrategy::CurrentToBest1),
            "rand2bin" | "rand2" => Ok(DeStrategy::Rand2Bin),
            "best2bin" | "best2" => Ok(DeStrategy::Best2Bin),
            "adaptive" => Ok(DeStrategy::Adaptive),
            _ => Err(format!("unknown strategy: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeConfig {
    pub strategy: DeStrategy,
    pub population_per_paint: usize,
    pub min_population: usize,
    pub max_population: usize,
    /// Differential weight F
    pub mutation_factor: f64,
    /// Crossover probability CR
    pub crossover_rate: f64,
    pub max_iterations: usize,
    pub max_stagnation: usize,
    pub convergence_tolerance: f64,
    /// Fitness at or below which the search exits immediately
    pub target_fitness: f64,
    /// Success rate above which F grows
    pub success_rate_threshold: f64,
    /// Normalized diversity thresholds used by the adaptive strategy and CR
    pub low_diversity: f64,
    pub high_diversity: f64,
}

impl Default for DeConfig {
    fn default() -> Self {
        Self {
            strategy: DeStrategy::Adaptive,
            population_per_paint: 10,
            min_population: 20,
            max_population: 200,
            mutation_factor: 0.8,
            crossover_rate: 0.9,
            max_iterations: 1000,
            max_stagnation: 50,
            convergence_tolerance: 1e-6,
            target_fitness: 0.05,
            success_rate_threshold: 0.2,
            low_diversity: 0.05,
            high_diversity: 0.3,
        }
    }
}

impl DeConfig {
    pub fn population_size(&self, paints: usize) -> usize {
        (paints * self.population_per_paint).clamp(self.min_population, self.max_population)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TpeConfig {
    pub n_startup_samples: usize,
    pub n_ei_candidates: usize,
    /// Share of feasible samples treated as "good"
    pub gamma: f64,
    pub bandwidth_factor: f64,
    pub max_iterations: usize,
    pub convergence_patience: usize,
    pub improvement_threshold: f64,
    pub target_fitness: f64,
    pub refinement_samples: usize,
    /// Gaussian radius of the refinement hill-climb, as a share of the [0, 1] range
    pub refinement_radius: f64,
}

impl Default for TpeConfig {
    fn default() -> Self {
        Self {
            n_startup_samples: 20,
            n_ei_candidates: 24,
            gamma: 0.25,
            bandwidth_factor: 0.5,
            max_iterations: 400,
            convergence_patience: 25,
            improvement_threshold: 1e-6,
            target_fitness: 0.05,
            refinement_samples: 30,
            refinement_radius: 0.05,
        }
    }
}

/// ΔE00 upper bounds for each accuracy rating
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccuracyThresholds {
    pub excellent: f64,
    pub good: f64,
    pub acceptable: f64,
}

impl Default for AccuracyThresholds {
    fn default() -> Self {
        Self {
            excellent: 1.0,
            good: 2.0,
            acceptable: 4.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    pub de: DeConfig,
    pub tpe: TpeConfig,
    pub accuracy: AccuracyThresholds,
    /// Paint counts above this use TPE instead of DE
    pub tpe_paint_threshold: usize,
    pub max_paints: usize,
    /// Hard wall-clock ceiling in ms, applied on top of the per-request limit
    pub time_budget_ms: u64,
    pub cost_weight: f64,
    /// Components below this share of the mix are left out of the mixed volumes
    pub negligible_share: f64,
    /// Smallest ratio a candidate component may take; 0 lets a paint drop out
    pub ratio_floor: f64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            de: DeConfig::default(),
            tpe: TpeConfig::default(),
            accuracy: AccuracyThresholds::default(),
            tpe_paint_threshold: 8,
            max_paints: 50,
            time_budget_ms: 28_000,
            cost_weight: 0.1,
            negligible_share: 0.001,
            ratio_floor: 0.0,
        }
    }
}

impl EngineSettings {
    /// Defaults overridden by any `AOP_*` variables present in the environment
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `AOP_*` key
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut settings = Self::default();
        let get = &lookup;

        settings.time_budget_ms = env_or(get, "AOP_TIME_BUDGET_MS", settings.time_budget_ms);
        settings.tpe_paint_threshold =
            env_or(get, "AOP_TPE_PAINT_THRESHOLD", settings.tpe_paint_threshold);
        settings.max_paints = env_or(get, "AOP_MAX_PAINTS", settings.max_paints);
        settings.cost_weight = env_or(get, "AOP_COST_WEIGHT", settings.cost_weight);

        let de = &mut settings.de;
        de.strategy = env_or(get, "AOP_DE_STRATEGY", de.strategy);
        de.mutation_factor = env_or(get, "AOP_DE_MUTATION_FACTOR", de.mutation_factor);
        de.crossover_rate = env_or(get, "AOP_DE_CROSSOVER_RATE", de.crossover_rate);
        de.max_iterations = env_or(get, "AOP_DE_MAX_ITERATIONS", de.max_iterations);
        de.max_stagnation = env_or(get, "AOP_DE_MAX_STAGNATION", de.max_stagnation);

        let tpe = &mut settings.tpe;
        tpe.gamma = env_or(get, "AOP_TPE_GAMMA", tpe.gamma);
        tpe.n_startup_samples = env_or(get, "AOP_TPE_STARTUP_SAMPLES", tpe.n_startup_samples);
        tpe.n_ei_candidates = env_or(get, "AOP_TPE_EI_CANDIDATES", tpe.n_ei_candidates);
        tpe.convergence_patience = env_or(get, "AOP_TPE_PATIENCE", tpe.convergence_patience);

        let accuracy = &mut settings.accuracy;
        accuracy.excellent = env_or(get, "AOP_ACCURACY_EXCELLENT", accuracy.excellent);
        accuracy.good = env_or(get, "AOP_ACCURACY_GOOD", accuracy.good);
        accuracy.acceptable = env_or(get, "AOP_ACCURACY_ACCEPTABLE", accuracy.acceptable);

        settings
    }
}

fn env_or<T, F>(lookup: &F, key: &str, default: T) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
