//! Entry point of the engine: validate, pick a search, enforce the time
//! budget and turn the best candidate into a formula plus a run report.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use uuid::Uuid;

use crate::config::{AccuracyThresholds, EngineSettings};
use crate::models::{
    AccuracyRating, Algorithm, AlgorithmChoice, MixingComplexity, OptimizationConfig,
    OptimizationError, OptimizationOutcome, OptimizationRequest, OptimizedFormula, Paint,
    PaintRatio, PerceptualColor, PerformanceMetrics, TerminationReason, VolumeConstraints,
    MIN_PAINT_COUNT,
};
use crate::services::color_metric::{delta, DeltaEMethod};
use crate::services::constraint_validator::ConstraintValidator;
use crate::services::differential_evolution::DifferentialEvolution;
use crate::services::fitness::{Deadline, MixEvaluator, SearchOutcome};
use crate::services::metrics::{MetricEvent, NoopSink};
use crate::services::mixing::{aggregate_optics, MixingModel};
use crate::services::tpe::TpeSearch;
use crate::state::EngineState;

pub struct Optimizer {
    state: EngineState,
    model: MixingModel,
    validator: ConstraintValidator,
}

impl Optimizer {
    pub fn new(state: EngineState) -> Self {
        Self {
            state,
            model: MixingModel::default(),
            validator: ConstraintValidator::default(),
        }
    }

    /// Optimizer with the given settings and no metrics sink
    pub fn with_settings(settings: EngineSettings) -> Self {
        Self::new(EngineState::new(settings, Arc::new(NoopSink)))
    }

    pub fn with_model(mut self, model: MixingModel) -> Self {
        self.model = model;
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.state.settings
    }

    /// Run one optimization. Uses `config.seed` when given so the run can be replayed.
    pub fn optimize(
        &self,
        target: &PerceptualColor,
        paints: &[Paint],
        constraints: &VolumeConstraints,
        config: &OptimizationConfig,
    ) -> Result<OptimizationOutcome, OptimizationError> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        self.optimize_with_rng(target, paints, constraints, config, &mut rng)
    }

    pub fn optimize_request(
        &self,
        request: &OptimizationRequest,
    ) -> Result<OptimizationOutcome, OptimizationError> {
        self.optimize(
            &request.target,
            &request.paints,
            &request.constraints,
            &request.config,
        )
    }

    /// Independent requests in parallel, each with its own random stream
    pub fn optimize_batch(
        &self,
        requests: &[OptimizationRequest],
    ) -> Vec<Result<OptimizationOutcome, OptimizationError>> {
        requests
            .par_iter()
            .map(|request| self.optimize_request(request))
            .collect()
    }

    pub fn optimize_with_rng<R: Rng + ?Sized>(
        &self,
        target: &PerceptualColor,
        paints: &[Paint],
        constraints: &VolumeConstraints,
        config: &OptimizationConfig,
        rng: &mut R,
    ) -> Result<OptimizationOutcome, OptimizationError> {
        if let Err(err) = self.validate_request(target, paints, constraints, config) {
            self.state.metrics.record(&MetricEvent::RequestRejected {
                code: err.code(),
                message: err.to_string(),
            });
            return Err(err);
        }

        let settings = self.settings();
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let time_limit_ms = config.time_limit_ms.min(settings.time_budget_ms);
        let deadline = Deadline::new(Duration::from_millis(time_limit_ms));
        let algorithm = self.select_algorithm(paints.len(), config.algorithm);

        self.state.metrics.record(&MetricEvent::RunStarted {
            run_id,
            algorithm,
            paint_count: paints.len(),
            time_limit_ms,
        });

        let evaluator = self.evaluator(target, paints, constraints, config);

        let search = match algorithm {
            Algorithm::DifferentialEvolution => {
                DifferentialEvolution::new(&settings.de, settings.ratio_floor)
                    .run(&evaluator, &deadline, rng)
            }
            Algorithm::TpeHybrid => {
                TpeSearch::new(&settings.tpe, settings.ratio_floor).run(&evaluator, &deadline, rng)
            }
        };

        for stats in &search.history {
            self.state.metrics.record(&MetricEvent::GenerationCompleted {
                run_id,
                stats: stats.clone(),
            });
        }

        let formula = self.build_formula(&evaluator, &search.best.ratios);
        let metrics = build_metrics(
            run_id,
            started_at,
            deadline.elapsed(),
            algorithm,
            &search,
            &formula,
            config.accuracy_target,
        );

        if search.termination == TerminationReason::TimedOut {
            tracing::warn!(%run_id, time_limit_ms, "optimization hit its time budget");
        }
        self.state.metrics.record(&MetricEvent::RunFinished {
            run_id,
            metrics: metrics.clone(),
        });

        Ok(OptimizationOutcome { formula, metrics })
    }

    /// Structural checks; nothing is searched when this fails
    pub fn validate_request(
        &self,
        target: &PerceptualColor,
        paints: &[Paint],
        constraints: &VolumeConstraints,
        config: &OptimizationConfig,
    ) -> Result<(), OptimizationError> {
        let max_paints = self.settings().max_paints;
        if paints.len() < MIN_PAINT_COUNT {
            return Err(OptimizationError::InsufficientPaints {
                count: paints.len(),
                required: MIN_PAINT_COUNT,
            });
        }
        if paints.len() > max_paints {
            return Err(OptimizationError::TooManyPaints {
                count: paints.len(),
                max: max_paints,
            });
        }

        target.validate("target")?;

        let mut ids = HashSet::with_capacity(paints.len());
        for paint in paints {
            paint.validate()?;
            if !ids.insert(paint.id.as_str()) {
                return Err(OptimizationError::InvalidPaint {
                    paint_id: paint.id.clone(),
                    field: "id".into(),
                    reason: "is used by more than one paint".into(),
                });
            }
        }

        config.validate()?;
        self.validator
            .validate_structure(constraints, paints, config.max_paint_count)
    }

    /// DE up to the paint threshold, TPE above it, unless forced
    pub fn select_algorithm(&self, paint_count: usize, choice: AlgorithmChoice) -> Algorithm {
        match choice {
            AlgorithmChoice::DifferentialEvolution => Algorithm::DifferentialEvolution,
            AlgorithmChoice::TpeHybrid => Algorithm::TpeHybrid,
            AlgorithmChoice::Auto if paint_count <= self.settings().tpe_paint_threshold => {
                Algorithm::DifferentialEvolution
            }
            AlgorithmChoice::Auto => Algorithm::TpeHybrid,
        }
    }

    /// Scorer the searches run against for one request
    pub fn evaluator<'a>(
        &'a self,
        target: &PerceptualColor,
        paints: &'a [Paint],
        constraints: &'a VolumeConstraints,
        config: &OptimizationConfig,
    ) -> MixEvaluator<'a> {
        let settings = self.settings();
        MixEvaluator {
            target: *target,
            paints,
            constraints,
            mode: config.mode,
            method: DeltaEMethod::Ciede2000,
            model: &self.model,
            validator: &self.validator,
            cost_weight: settings.cost_weight,
            max_components: Some(config.max_paint_count),
            negligible_share: settings.negligible_share,
        }
    }

    /// Turn a searched ratio vector into the reported formula. Volumes come
    /// from the same conversion the evaluator scored, so the reported ΔE is
    /// the searched one.
    pub fn build_formula(&self, evaluator: &MixEvaluator<'_>, ratios: &[f64]) -> OptimizedFormula {
        let paints = evaluator.paints;
        let volumes = evaluator.volumes(ratios);
        let total_volume: f64 = volumes.iter().sum();
        let shares: Vec<f64> = volumes
            .iter()
            .map(|v| if total_volume > 0.0 { v / total_volume } else { 0.0 })
            .collect();

        let predicted = evaluator.model.mix(paints, &shares, evaluator.mode);
        let delta_e = delta(&evaluator.target, &predicted, evaluator.method);
        let (k, s, opacity) = aggregate_optics(paints, &shares);
        let report = self.validator.validate(&volumes, evaluator.constraints, paints);

        let mut used: Vec<usize> = (0..paints.len()).filter(|&i| volumes[i] > 0.0).collect();
        used.sort_by(|&a, &b| volumes[b].total_cmp(&volumes[a]));
        let paint_ratios: Vec<PaintRatio> = used
            .into_iter()
            .map(|i| PaintRatio {
                paint_id: paints[i].id.clone(),
                paint_name: paints[i].name.clone(),
                volume_ml: volumes[i],
                percentage: shares[i] * 100.0,
            })
            .collect();

        OptimizedFormula {
            mixing_complexity: MixingComplexity::from_component_count(paint_ratios.len()),
            paint_ratios,
            total_volume,
            predicted_hex: predicted.to_hex(),
            predicted_color: predicted,
            delta_e,
            accuracy_rating: classify_accuracy(delta_e, &self.settings().accuracy),
            kubelka_munk_k: k,
            kubelka_munk_s: s,
            opacity,
            constraint_violations: report.messages(),
        }
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::new(EngineState::default())
    }
}

pub fn classify_accuracy(delta_e: f64, thresholds: &AccuracyThresholds) -> AccuracyRating {
    if delta_e <= thresholds.excellent {
        AccuracyRating::Excellent
    } else if delta_e <= thresholds.good {
        AccuracyRating::Good
    } else if delta_e <= thresholds.acceptable {
        AccuracyRating::Acceptable
    } else {
        AccuracyRating::Poor
    }
}

fn build_metrics(
    run_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    elapsed: Duration,
    algorithm: Algorithm,
    search: &SearchOutcome,
    formula: &OptimizedFormula,
    accuracy_target: f64,
) -> PerformanceMetrics {
    let initial = search.initial_best_delta_e;
    let final_delta_e = formula.delta_e;
    let improvement_rate = if initial.is_finite() && initial > 0.0 && final_delta_e.is_finite() {
        (initial - final_delta_e) / initial
    } else {
        0.0
    };

    PerformanceMetrics {
        run_id,
        started_at,
        time_elapsed: elapsed.as_millis() as u64,
        iterations_completed: search.iterations,
        evaluations: search.evaluations,
        algorithm_used: algorithm,
        termination_reason: search.termination,
        convergence_achieved: search.termination.is_converged(),
        target_met: final_delta_e <= accuracy_target,
        early_termination: search.termination == TerminationReason::TimedOut,
        initial_best_delta_e: initial,
        final_best_delta_e: final_delta_e,
        improvement_rate,
        generation_history: search.history.clone(),
    }
}
