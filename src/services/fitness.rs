//! Candidate scoring shared by both search engines
//!
//! The searches only see [`FitnessEvaluator`]; [`MixEvaluator`] is the
//! production implementation combining mixing, ΔE, cost and constraint
//! penalty.

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use rand::seq::SliceRandom;
use rand::Rng;

use crate::models::{
    GenerationStats, MixMode, Paint, PerceptualColor, TerminationReason, VolumeConstraints,
    VOLUME_SLACK,
};
use crate::services::color_metric::{delta, DeltaEMethod};
use crate::services::constraint_validator::ConstraintValidator;
use crate::services::mixing::MixingModel;

/// A point in ratio space with its score
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateSolution {
    pub ratios: Vec<f64>,
    /// ΔE + cost term + constraint penalty
    pub fitness: f64,
    pub delta_e: f64,
    pub violation: f64,
    pub feasible: bool,
}

impl CandidateSolution {
    /// Feasible beats infeasible; then lower fitness, or lower violation
    /// when both are infeasible.
    pub fn compare(&self, other: &Self) -> Ordering {
        match (self.feasible, other.feasible) {
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (true, true) => total_cmp(self.fitness, other.fitness),
            (false, false) => total_cmp(self.violation, other.violation)
                .then_with(|| total_cmp(self.fitness, other.fitness)),
        }
    }

    pub fn is_better_than(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Less
    }
}

/// `new` beats `old` by more than `tolerance`, or fixes its feasibility
pub fn improved_by(new: &CandidateSolution, old: &CandidateSolution, tolerance: f64) -> bool {
    if !new.is_better_than(old) {
        return false;
    }
    if new.feasible != old.feasible {
        return true;
    }
    old.fitness - new.fitness > tolerance
        || (!new.feasible && old.violation - new.violation > tolerance)
}

/// NaN sorts last
fn total_cmp(a: f64, b: f64) -> Ordering {
    match (a.is_nan(), b.is_nan()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Greater,
        (false, true) => Ordering::Less,
        (false, false) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
    }
}

/// Result of one search run, whichever engine produced it
#[derive(Debug, Clone, PartialEq)]
pub struct SearchOutcome {
    pub best: CandidateSolution,
    /// ΔE of the best candidate before the first generation/iteration
    pub initial_best_delta_e: f64,
    pub iterations: usize,
    pub evaluations: usize,
    pub termination: TerminationReason,
    pub history: Vec<GenerationStats>,
}

/// Scores ratio vectors. Implementations must be deterministic.
pub trait FitnessEvaluator {
    fn dimensions(&self) -> usize;

    fn evaluate(&self, ratios: &[f64]) -> CandidateSolution;

    /// Step size in ratio space that matches the volume precision, if any
    fn ratio_step(&self) -> Option<f64> {
        None
    }
}

/// Wall-clock budget polled at loop boundaries
#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    start: Instant,
    limit: Duration,
}

impl Deadline {
    pub fn new(limit: Duration) -> Self {
        Self {
            start: Instant::now(),
            limit,
        }
    }

    pub fn unbounded() -> Self {
        Self::new(Duration::from_secs(u64::MAX / 4))
    }

    pub fn expired(&self) -> bool {
        self.start.elapsed() >= self.limit
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

/// Production evaluator: predicted color vs target, plus cost and constraint penalty
#[derive(Debug, Clone)]
pub struct MixEvaluator<'a> {
    pub target: PerceptualColor,
    pub paints: &'a [Paint],
    pub constraints: &'a VolumeConstraints,
    pub mode: MixMode,
    pub method: DeltaEMethod,
    pub model: &'a MixingModel,
    pub validator: &'a ConstraintValidator,
    pub cost_weight: f64,
    /// Only the largest `max_components` ratios are mixed
    pub max_components: Option<usize>,
    /// Shares below this are left out of the mix
    pub negligible_share: f64,
}

impl<'a> MixEvaluator<'a> {
    /// Ratios actually mixed: the top `max_components` shares, renormalized
    pub fn effective_ratios(&self, ratios: &[f64]) -> Vec<f64> {
        match self.max_components {
            Some(k) if k < ratios.len() => keep_largest(ratios, k),
            _ => ratios.to_vec(),
        }
    }

    /// Volumes actually mixed for a ratio vector. Both the search and the
    /// reported formula go through here.
    ///
    /// Shares below `negligible_share` are dropped. With a component minimum,
    /// so are shares too small to be worth scaling up to it (below half the
    /// minimum, or below the minimum itself when `allow_scaling` is off), and
    /// no more components are kept than fit under `max_total_volume_ml`. The
    /// largest share always survives. The kept shares are scaled to the target
    /// total and repaired.
    pub fn volumes(&self, ratios: &[f64]) -> Vec<f64> {
        let total = self.constraints.target_total();
        let shares = self.effective_ratios(ratios);

        let mut cutoff = self.negligible_share;
        let mut room = shares.len();
        if let Some(min_comp) = self.constraints.minimum_component_volume_ml {
            if total > 0.0 {
                let worth = if self.constraints.allow_scaling { 0.5 } else { 1.0 };
                cutoff = cutoff.max(worth * min_comp / total);
            }
            if min_comp > 0.0 {
                let fit = (self.constraints.max_total_volume_ml + VOLUME_SLACK) / min_comp;
                room = room.min(fit.floor() as usize);
            }
        }

        let mut order: Vec<usize> = (0..shares.len())
            .filter(|&i| shares[i].is_finite() && shares[i] > 0.0)
            .collect();
        order.sort_by(|&a, &b| total_cmp(shares[b], shares[a]));

        let mut kept = vec![0.0; shares.len()];
        for (rank, &i) in order.iter().enumerate() {
            if rank == 0 || (rank < room && shares[i] >= cutoff) {
                kept[i] = shares[i];
            }
        }
        normalize_in_place(&mut kept);

        let raw: Vec<f64> = kept.iter().map(|r| r * total).collect();
        self.validator.repair(&raw, self.constraints, self.paints)
    }

    fn infeasible(&self, ratios: &[f64]) -> CandidateSolution {
        CandidateSolution {
            ratios: ratios.to_vec(),
            fitness: f64::INFINITY,
            delta_e: f64::INFINITY,
            violation: f64::INFINITY,
            feasible: false,
        }
    }
}

impl FitnessEvaluator for MixEvaluator<'_> {
    fn dimensions(&self) -> usize {
        self.paints.len()
    }

    fn evaluate(&self, ratios: &[f64]) -> CandidateSolution {
        if ratios.len() != self.paints.len() || ratios.iter().any(|r| !r.is_finite()) {
            return self.infeasible(ratios);
        }

        let volumes = self.volumes(ratios);
        let total: f64 = volumes.iter().sum();
        if total <= 0.0 || !total.is_finite() {
            return self.infeasible(ratios);
        }
        let mixed_ratios: Vec<f64> = volumes.iter().map(|v| v / total).collect();

        let predicted = self.model.mix(self.paints, &mixed_ratios, self.mode);
        let delta_e = delta(&self.target, &predicted, self.method);

        let cost: f64 = self
            .paints
            .iter()
            .zip(volumes.iter())
            .filter_map(|(p, v)| p.cost_per_ml.map(|c| c * v))
            .sum();

        let report = self.validator.validate(&volumes, self.constraints, self.paints);
        let fitness = delta_e + self.cost_weight * cost + report.penalty_score;

        if !fitness.is_finite() {
            tracing::debug!(?ratios, "non-finite fitness, scoring candidate as unfit");
            return self.infeasible(ratios);
        }

        CandidateSolution {
            ratios: ratios.to_vec(),
            fitness,
            delta_e,
            violation: report.penalty_score,
            feasible: report.feasible(),
        }
    }

    fn ratio_step(&self) -> Option<f64> {
        let total = self.constraints.target_total();
        self.constraints
            .precision_ml
            .filter(|p| *p > 0.0 && total > 0.0)
            .map(|p| p / total)
    }
}

/// Zero all but the `k` largest entries, then renormalize
pub fn keep_largest(ratios: &[f64], k: usize) -> Vec<f64> {
    let mut order: Vec<usize> = (0..ratios.len()).collect();
    order.sort_by(|&a, &b| total_cmp(ratios[b], ratios[a]));
    let mut kept = vec![0.0; ratios.len()];
    for &i in order.iter().take(k) {
        kept[i] = ratios[i];
    }
    normalize_in_place(&mut kept);
    kept
}

/// Random ratio vector: sequential fractions of the remaining share, each at
/// least `floor`, assigned in shuffled order and normalized to Σ = 1.
pub fn random_ratios<R: Rng + ?Sized>(dimensions: usize, floor: f64, rng: &mut R) -> Vec<f64> {
    if dimensions == 0 {
        return Vec::new();
    }
    let mut order: Vec<usize> = (0..dimensions).collect();
    order.shuffle(rng);

    let mut ratios = vec![0.0; dimensions];
    let mut remaining = 1.0;
    for (pos, &i) in order.iter().enumerate() {
        let share = if pos + 1 == dimensions {
            remaining
        } else {
            rng.gen::<f64>() * remaining
        };
        ratios[i] = share.max(floor);
        remaining = (remaining - share).max(0.0);
    }
    normalize_in_place(&mut ratios);
    ratios
}

/// Clamp to `[floor, 1 - floor]`, snap to `step` if given, renormalize.
pub fn repair_ratios(ratios: &mut [f64], floor: f64, step: Option<f64>) {
    for r in ratios.iter_mut() {
        *r = if r.is_finite() {
            r.clamp(floor, 1.0 - floor)
        } else {
            floor
        };
    }
    normalize_in_place(ratios);

    if let Some(step) = step.filter(|s| *s > 0.0 && *s < 1.0) {
        for r in ratios.iter_mut() {
            *r = ((*r / step).round() * step).max(floor);
        }
        normalize_in_place(ratios);
    }
}

pub fn normalize_in_place(ratios: &mut [f64]) {
    let sum: f64 = ratios.iter().sum();
    if sum > 0.0 && sum.is_finite() {
        ratios.iter_mut().for_each(|r| *r /= sum);
    } else if !ratios.is_empty() {
        let even = 1.0 / ratios.len() as f64;
        ratios.iter_mut().for_each(|r| *r = even);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    pub(crate) fn sums_to_one(ratios: &[f64]) -> bool {
        ratios.iter().all(|r| *r >= 0.0) && (ratios.iter().sum::<f64>() - 1.0).abs() <= 1e-6
    }

    fn candidate(fitness: f64, violation: f64, feasible: bool) -> CandidateSolution {
        CandidateSolution {
            ratios: vec![],
            fitness,
            delta_e: fitness,
            violation,
            feasible,
        }
    }

    #[test]
    fn feasibility_first_ordering() {
        let feasible_bad = candidate(10.0, 0.0, true);
        let infeasible_good = candidate(0.1, 5.0, false);
        assert!(feasible_bad.is_better_than(&infeasible_good));

        let a = candidate(1.0, 0.0, true);
        let b = candidate(2.0, 0.0, true);
        assert!(a.is_better_than(&b));

        let c = candidate(9.0, 1.0, false);
        let d = candidate(1.0, 3.0, false);
        assert!(c.is_better_than(&d));

        let nan = candidate(f64::NAN, 0.0, true);
        assert!(a.is_better_than(&nan));
    }

    #[test]
    fn random_ratios_are_simplex_points() {
        let mut rng = StdRng::seed_from_u64(7);
        for n in 1..10 {
            for _ in 0..50 {
                let r = random_ratios(n, 0.001, &mut rng);
                assert_eq!(r.len(), n);
                assert!(sums_to_one(&r), "{r:?}");
            }
        }
    }

    #[test]
    fn repair_ratios_clamps_and_snaps() {
        let mut r = vec![-0.5, 2.0, f64::NAN];
        repair_ratios(&mut r, 0.001, None);
        assert!(sums_to_one(&r));
        assert!(r.iter().all(|v| *v > 0.0));

        let mut r = vec![0.333, 0.333, 0.334];
        repair_ratios(&mut r, 0.001, Some(0.01));
        assert!(sums_to_one(&r));

        let mut r = vec![-0.2, 0.6, 0.6];
        repair_ratios(&mut r, 0.0, None);
        assert_eq!(r[0], 0.0);
        assert!(sums_to_one(&r));
    }

    #[test]
    fn keep_largest_drops_small_shares() {
        let kept = keep_largest(&[0.1, 0.5, 0.05, 0.35], 2);
        assert_eq!(kept[0], 0.0);
        assert_eq!(kept[2], 0.0);
        assert!((kept[1] - 0.5 / 0.85).abs() < 1e-12);
        assert!(sums_to_one(&kept));
    }

    #[test]
    fn mix_evaluator_scores_exact_match_at_zero() {
        let paints = vec![
            Paint::new("white", "White", PerceptualColor::new(95.0, 0.0, 0.0)),
            Paint::new("black", "Black", PerceptualColor::new(5.0, 0.0, 0.0)),
        ];
        let constraints = VolumeConstraints::exact(100.0);
        let model = MixingModel::default();
        let validator = ConstraintValidator::default();
        let evaluator = MixEvaluator {
            target: PerceptualColor::new(50.0, 0.0, 0.0),
            paints: &paints,
            constraints: &constraints,
            mode: MixMode::Standard,
            method: DeltaEMethod::Ciede2000,
            model: &model,
            validator: &validator,
            cost_weight: 0.1,
            max_components: None,
            negligible_share: 0.001,
        };
        let c = evaluator.evaluate(&[0.5, 0.5]);
        assert!(c.feasible);
        assert!(c.fitness < 1e-9);

        let off = evaluator.evaluate(&[0.8, 0.2]);
        assert!(off.fitness > 1.0);

        let broken = evaluator.evaluate(&[f64::NAN, 0.5]);
        assert!(!broken.feasible);
        assert_eq!(broken.fitness, f64::INFINITY);
    }

    #[test]
    fn cost_adds_to_fitness() {
        let mut paints = vec![
            Paint::new("white", "White", PerceptualColor::new(95.0, 0.0, 0.0)),
            Paint::new("black", "Black", PerceptualColor::new(5.0, 0.0, 0.0)),
        ];
        paints[0].cost_per_ml = Some(0.02);
        let constraints = VolumeConstraints::exact(100.0);
        let model = MixingModel::default();
        let validator = ConstraintValidator::default();
        let evaluator = MixEvaluator {
            target: PerceptualColor::new(50.0, 0.0, 0.0),
            paints: &paints,
            constraints: &constraints,
            mode: MixMode::Standard,
            method: DeltaEMethod::Ciede2000,
            model: &model,
            validator: &validator,
            cost_weight: 0.1,
            max_components: None,
            negligible_share: 0.001,
        };
        let c = evaluator.evaluate(&[0.5, 0.5]);
        // 50ml × 0.02 × 0.1
        assert!((c.fitness - 0.1).abs() < 1e-9);
    }

    #[test]
    fn small_shares_leave_under_a_component_minimum() {
        let paints = vec![
            Paint::new("white", "White", PerceptualColor::new(95.0, 0.0, 0.0)),
            Paint::new("black", "Black", PerceptualColor::new(5.0, 0.0, 0.0)),
        ];
        let model = MixingModel::default();
        let validator = ConstraintValidator::default();
        let scaling = VolumeConstraints {
            minimum_component_volume_ml: Some(10.0),
            ..VolumeConstraints::exact(100.0)
        };
        let fixed = VolumeConstraints {
            allow_scaling: false,
            ..scaling.clone()
        };
        let evaluator = |constraints| MixEvaluator {
            target: PerceptualColor::new(90.0, 0.0, 0.0),
            paints: &paints,
            constraints,
            mode: MixMode::Standard,
            method: DeltaEMethod::Ciede2000,
            model: &model,
            validator: &validator,
            cost_weight: 0.0,
            max_components: None,
            negligible_share: 0.001,
        };

        let lifted = evaluator(&scaling).volumes(&[0.93, 0.07]);
        assert!((lifted[0] - 90.0).abs() < 1e-9, "{lifted:?}");
        assert!((lifted[1] - 10.0).abs() < 1e-9, "{lifted:?}");

        let dropped = evaluator(&fixed).volumes(&[0.93, 0.07]);
        assert_eq!(dropped[1], 0.0);
        assert!((dropped[0] - 100.0).abs() < 1e-9, "{dropped:?}");
        assert!(evaluator(&fixed).evaluate(&[0.93, 0.07]).feasible);

        let trace = evaluator(&scaling).volumes(&[0.99, 0.01]);
        assert_eq!(trace[1], 0.0);
    }
}
