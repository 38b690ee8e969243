//! Tree-structured Parzen Estimator search with a local refinement pass
//!
//! Startup draws random simplex points. Each following iteration splits the
//! archive into a "good" and a "bad" set, proposes candidates around good
//! points and evaluates only the one maximizing l(x)/g(x). When the main loop
//! stops, a Gaussian hill-climb polishes the best point.

use rand::Rng;

use crate::config::TpeConfig;
use crate::models::TerminationReason;
use crate::services::fitness::{
    improved_by, random_ratios, repair_ratios, CandidateSolution, Deadline, FitnessEvaluator,
    SearchOutcome,
};

const MIN_BANDWIDTH: f64 = 0.01;
const MAX_BANDWIDTH: f64 = 1.0;

/// Gaussian kernel density over a set of sample points sharing one bandwidth
#[derive(Debug, Clone)]
pub struct ParzenEstimator {
    centers: Vec<Vec<f64>>,
    bandwidth: f64,
}

impl ParzenEstimator {
    /// Scott's rule n^(-1/(d+4)), scaled and clamped
    pub fn fit(centers: Vec<Vec<f64>>, bandwidth_factor: f64) -> Self {
        let n = centers.len().max(1) as f64;
        let d = centers.first().map(|c| c.len()).unwrap_or(1) as f64;
        let bandwidth =
            (n.powf(-1.0 / (d + 4.0)) * bandwidth_factor).clamp(MIN_BANDWIDTH, MAX_BANDWIDTH);
        Self { centers, bandwidth }
    }

    pub fn bandwidth(&self) -> f64 {
        self.bandwidth
    }

    pub fn is_empty(&self) -> bool {
        self.centers.is_empty()
    }

    /// Log of the mixture density at `x`, components weighted equally
    pub fn log_density(&self, x: &[f64]) -> f64 {
        if self.centers.is_empty() {
            return f64::NEG_INFINITY;
        }
        let h = self.bandwidth;
        let d = x.len() as f64;
        let log_norm = -d * (h.ln() + 0.5 * (2.0 * std::f64::consts::PI).ln());

        let terms: Vec<f64> = self
            .centers
            .iter()
            .map(|c| {
                let sq: f64 = c.iter().zip(x).map(|(ci, xi)| ((xi - ci) / h).powi(2)).sum();
                log_norm - 0.5 * sq
            })
            .collect();
        log_sum_exp(&terms) - (self.centers.len() as f64).ln()
    }

    /// Pick a component uniformly, then perturb every dimension
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Vec<f64>> {
        if self.centers.is_empty() {
            return None;
        }
        let center = &self.centers[rng.gen_range(0..self.centers.len())];
        Some(
            center
                .iter()
                .map(|c| c + self.bandwidth * standard_normal(rng))
                .collect(),
        )
    }
}

/// Box-Muller
pub fn standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

fn log_sum_exp(values: &[f64]) -> f64 {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + values.iter().map(|v| (v - max).exp()).sum::<f64>().ln()
}

pub struct TpeSearch<'c> {
    config: &'c TpeConfig,
    ratio_floor: f64,
}

impl<'c> TpeSearch<'c> {
    pub fn new(config: &'c TpeConfig, ratio_floor: f64) -> Self {
        Self {
            config,
            ratio_floor,
        }
    }

    pub fn run<E, R>(&self, evaluator: &E, deadline: &Deadline, rng: &mut R) -> SearchOutcome
    where
        E: FitnessEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let dims = evaluator.dimensions();
        let step = evaluator.ratio_step();
        let startup = self.config.n_startup_samples.max(1);

        let mut archive: Vec<CandidateSolution> =
            Vec::with_capacity(startup + self.config.max_iterations);
        let mut best: Option<CandidateSolution> = None;
        let mut termination = None;

        for _ in 0..startup {
            let mut ratios = random_ratios(dims, self.ratio_floor, rng);
            repair_ratios(&mut ratios, self.ratio_floor, step);
            let candidate = evaluator.evaluate(&ratios);
            if best.as_ref().map_or(true, |b| candidate.is_better_than(b)) {
                best = Some(candidate.clone());
            }
            archive.push(candidate);

            if deadline.expired() {
                termination = Some(TerminationReason::TimedOut);
                break;
            }
        }

        let Some(mut best) = best else {
            // startup is never empty, but keep a well-formed answer anyway
            let fallback = evaluator.evaluate(&random_ratios(dims, self.ratio_floor, rng));
            return SearchOutcome {
                initial_best_delta_e: fallback.delta_e,
                best: fallback,
                iterations: 0,
                evaluations: 1,
                termination: TerminationReason::TimedOut,
                history: Vec::new(),
            };
        };
        let initial_best_delta_e = best.delta_e;
        let mut evaluations = archive.len();
        let mut iterations = 0;
        let mut patience = 0;

        tracing::debug!(
            dimensions = dims,
            startup = archive.len(),
            initial_best = best.fitness,
            "tpe startup complete"
        );

        let termination = loop {
            if let Some(reason) = termination {
                break reason;
            }
            if best.feasible && best.fitness <= self.config.target_fitness {
                break TerminationReason::TargetReached;
            }
            if deadline.expired() {
                tracing::warn!(iterations, "tpe timed out");
                break TerminationReason::TimedOut;
            }
            if iterations >= self.config.max_iterations {
                break TerminationReason::MaxIterations;
            }

            let proposal = self.propose(&archive, dims, step, rng);
            let candidate = evaluator.evaluate(&proposal);
            evaluations += 1;
            iterations += 1;

            if improved_by(&candidate, &best, self.config.improvement_threshold) {
                patience = 0;
            } else {
                patience += 1;
            }
            if candidate.is_better_than(&best) {
                best = candidate.clone();
            }
            archive.push(candidate);

            if patience >= self.config.convergence_patience {
                termination = Some(TerminationReason::Stagnated);
            }
        };

        if termination != TerminationReason::TimedOut {
            let (refined, used) = self.refine(best, evaluator, deadline, rng);
            best = refined;
            evaluations += used;
        }

        tracing::debug!(iterations, evaluations, best = best.fitness, ?termination, "tpe finished");

        SearchOutcome {
            best,
            initial_best_delta_e,
            iterations,
            evaluations,
            termination,
            history: Vec::new(),
        }
    }

    /// Best of `n_ei_candidates` draws from l(x), ranked by log l(x) - log g(x)
    pub fn propose<R: Rng + ?Sized>(
        &self,
        archive: &[CandidateSolution],
        dims: usize,
        step: Option<f64>,
        rng: &mut R,
    ) -> Vec<f64> {
        let (good, bad) = self.split(archive);
        if good.is_empty() {
            let mut ratios = random_ratios(dims, self.ratio_floor, rng);
            repair_ratios(&mut ratios, self.ratio_floor, step);
            return ratios;
        }

        let mut best_score = f64::NEG_INFINITY;
        let mut chosen: Option<Vec<f64>> = None;
        for _ in 0..self.config.n_ei_candidates.max(1) {
            let Some(mut x) = good.sample(rng) else { break };
            repair_ratios(&mut x, self.ratio_floor, step);
            let score = if bad.is_empty() {
                good.log_density(&x)
            } else {
                good.log_density(&x) - bad.log_density(&x)
            };
            if chosen.is_none() || score > best_score {
                best_score = score;
                chosen = Some(x);
            }
        }

        chosen.unwrap_or_else(|| {
            let mut ratios = random_ratios(dims, self.ratio_floor, rng);
            repair_ratios(&mut ratios, self.ratio_floor, step);
            ratios
        })
    }

    /// Good: the best γ share of feasible samples (at least one). Bad: the
    /// rest, infeasible samples included. With no feasible samples at all the
    /// least-violating ones are treated as good.
    pub fn split(&self, archive: &[CandidateSolution]) -> (ParzenEstimator, ParzenEstimator) {
        let mut sorted: Vec<&CandidateSolution> = archive.iter().collect();
        sorted.sort_by(|a, b| a.compare(b));

        let feasible = sorted.iter().filter(|c| c.feasible).count();
        let pool = if feasible > 0 { feasible } else { sorted.len() };
        let n_good = ((self.config.gamma * pool as f64).ceil() as usize).clamp(1, pool.max(1));

        let good: Vec<Vec<f64>> = sorted.iter().take(n_good).map(|c| c.ratios.clone()).collect();
        let bad: Vec<Vec<f64>> = sorted.iter().skip(n_good).map(|c| c.ratios.clone()).collect();
        (
            ParzenEstimator::fit(good, self.config.bandwidth_factor),
            ParzenEstimator::fit(bad, self.config.bandwidth_factor),
        )
    }

    /// Gaussian hill-climb around `best`; returns the result and evaluations used
    pub fn refine<E, R>(
        &self,
        mut best: CandidateSolution,
        evaluator: &E,
        deadline: &Deadline,
        rng: &mut R,
    ) -> (CandidateSolution, usize)
    where
        E: FitnessEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let step = evaluator.ratio_step();
        let mut used = 0;
        for _ in 0..self.config.refinement_samples {
            if deadline.expired() {
                break;
            }
            let mut x: Vec<f64> = best
                .ratios
                .iter()
                .map(|r| r + self.config.refinement_radius * standard_normal(rng))
                .collect();
            repair_ratios(&mut x, self.ratio_floor, step);
            let candidate = evaluator.evaluate(&x);
            used += 1;
            if candidate.is_better_than(&best) {
                best = candidate;
            }
        }
        (best, used)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::fitness::tests::sums_to_one;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::RefCell;
    use std::time::Duration;

    struct Bowl {
        optimum: Vec<f64>,
        seen: RefCell<Vec<Vec<f64>>>,
    }

    impl Bowl {
        fn new(optimum: Vec<f64>) -> Self {
            Self {
                optimum,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl FitnessEvaluator for Bowl {
        fn dimensions(&self) -> usize {
            self.optimum.len()
        }

        fn evaluate(&self, ratios: &[f64]) -> CandidateSolution {
            self.seen.borrow_mut().push(ratios.to_vec());
            let fitness = ratios
                .iter()
                .zip(&self.optimum)
                .map(|(a, b)| (a - b).abs())
                .sum::<f64>()
                * 10.0;
            CandidateSolution {
                ratios: ratios.to_vec(),
                fitness,
                delta_e: fitness,
                violation: 0.0,
                feasible: true,
            }
        }
    }

    #[test]
    fn improves_on_startup_best() {
        let config = TpeConfig::default();
        let tpe = TpeSearch::new(&config, 0.001);
        let evaluator = Bowl::new(vec![0.6, 0.1, 0.1, 0.1, 0.05, 0.05]);
        let mut rng = StdRng::seed_from_u64(21);
        let outcome = tpe.run(&evaluator, &Deadline::new(Duration::from_secs(10)), &mut rng);

        assert!(
            outcome.best.fitness < outcome.initial_best_delta_e,
            "{} vs {}",
            outcome.best.fitness,
            outcome.initial_best_delta_e
        );
        assert!(outcome.evaluations >= config.n_startup_samples);
    }

    #[test]
    fn every_candidate_is_on_the_simplex() {
        let config = TpeConfig {
            max_iterations: 60,
            ..TpeConfig::default()
        };
        let tpe = TpeSearch::new(&config, 0.001);
        let evaluator = Bowl::new(vec![0.1; 10]);
        tpe.run(&evaluator, &Deadline::unbounded(), &mut StdRng::seed_from_u64(4));
        let seen = evaluator.seen.borrow();
        assert!(seen.len() > config.n_startup_samples);
        for ratios in seen.iter() {
            assert!(sums_to_one(ratios), "{ratios:?}");
        }
    }

    #[test]
    fn same_seed_same_result() {
        let config = TpeConfig {
            max_iterations: 40,
            ..TpeConfig::default()
        };
        let tpe = TpeSearch::new(&config, 0.001);
        let run = |seed| {
            let evaluator = Bowl::new(vec![0.25, 0.25, 0.5]);
            tpe.run(&evaluator, &Deadline::unbounded(), &mut StdRng::seed_from_u64(seed))
        };
        assert_eq!(run(8), run(8));
    }

    #[test]
    fn expired_deadline_skips_model_loop() {
        let config = TpeConfig {
            target_fitness: -1.0,
            ..TpeConfig::default()
        };
        let tpe = TpeSearch::new(&config, 0.001);
        let evaluator = Bowl::new(vec![0.5, 0.5]);
        let outcome = tpe.run(
            &evaluator,
            &Deadline::new(Duration::ZERO),
            &mut StdRng::seed_from_u64(1),
        );
        assert_eq!(outcome.termination, TerminationReason::TimedOut);
        assert_eq!(outcome.iterations, 0);
        assert!(sums_to_one(&outcome.best.ratios));
    }

    #[test]
    fn patience_stops_flat_search() {
        struct Flat;
        impl FitnessEvaluator for Flat {
            fn dimensions(&self) -> usize {
                3
            }
            fn evaluate(&self, ratios: &[f64]) -> CandidateSolution {
                CandidateSolution {
                    ratios: ratios.to_vec(),
                    fitness: 5.0,
                    delta_e: 5.0,
                    violation: 0.0,
                    feasible: true,
                }
            }
        }
        let config = TpeConfig::default();
        let tpe = TpeSearch::new(&config, 0.001);
        let outcome = tpe.run(&Flat, &Deadline::unbounded(), &mut StdRng::seed_from_u64(2));
        assert_eq!(outcome.termination, TerminationReason::Stagnated);
        assert_eq!(outcome.iterations, config.convergence_patience);
    }

    #[test]
    fn bandwidth_follows_scott_rule() {
        let centers = vec![vec![0.5, 0.5]; 16];
        let kde = ParzenEstimator::fit(centers, 1.0);
        // 16^(-1/6)
        assert!((kde.bandwidth() - 16f64.powf(-1.0 / 6.0)).abs() < 1e-12);

        let tiny = ParzenEstimator::fit(vec![vec![0.5, 0.5]; 4], 0.001);
        assert_eq!(tiny.bandwidth(), MIN_BANDWIDTH);
    }

    #[test]
    fn density_peaks_at_centers() {
        let kde = ParzenEstimator::fit(vec![vec![0.2, 0.8]], 0.2);
        assert!(kde.log_density(&[0.2, 0.8]) > kde.log_density(&[0.5, 0.5]));
        assert_eq!(ParzenEstimator::fit(vec![], 0.5).log_density(&[0.1]), f64::NEG_INFINITY);
    }

    #[test]
    fn split_prefers_feasible_samples() {
        let config = TpeConfig {
            gamma: 0.5,
            ..TpeConfig::default()
        };
        let tpe = TpeSearch::new(&config, 0.001);
        let make = |r: f64, fitness: f64, feasible: bool| CandidateSolution {
            ratios: vec![r, 1.0 - r],
            fitness,
            delta_e: fitness,
            violation: if feasible { 0.0 } else { 1.0 },
            feasible,
        };
        let archive = vec![
            make(0.1, 0.1, false),
            make(0.2, 3.0, true),
            make(0.3, 2.0, true),
            make(0.4, 9.0, true),
            make(0.5, 8.0, true),
        ];
        let (good, bad) = tpe.split(&archive);
        assert_eq!(good.centers.len(), 2);
        assert_eq!(good.centers[0], vec![0.3, 0.7]);
        assert_eq!(bad.centers.len(), 3);
    }
}
