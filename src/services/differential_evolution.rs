//! Adaptive differential evolution over mixing-ratio vectors
//!
//! Individuals live on the simplex (non-negative, Σ = 1). Trial vectors are
//! built from the previous generation (deferred updating), repaired back onto
//! the simplex, and replace their target when they are at least as good under
//! feasibility-first ordering. F follows the success rate, CR follows
//! population diversity.

use ndarray::Array2;
use rand::Rng;

use crate::config::{DeConfig, DeStrategy};
use crate::models::{GenerationStats, TerminationReason};
use crate::services::fitness::{
    improved_by, random_ratios, repair_ratios, CandidateSolution, Deadline, FitnessEvaluator,
    SearchOutcome,
};

const MIN_MUTATION_FACTOR: f64 = 0.1;
const MAX_MUTATION_FACTOR: f64 = 2.0;
const MUTATION_NUDGE: f64 = 0.05;
const CROSSOVER_NUDGE: f64 = 0.05;
const MIN_ADAPTIVE_CROSSOVER: f64 = 0.1;

/// Search state threaded through generations
#[derive(Debug, Clone)]
pub struct DeState {
    pub population: Vec<CandidateSolution>,
    pub best: usize,
    pub mutation_factor: f64,
    pub crossover_rate: f64,
    pub generation: usize,
    pub evaluations: usize,
    pub history: Vec<GenerationStats>,
}

impl DeState {
    pub fn best(&self) -> &CandidateSolution {
        &self.population[self.best]
    }
}

pub struct DifferentialEvolution<'c> {
    config: &'c DeConfig,
    ratio_floor: f64,
}

impl<'c> DifferentialEvolution<'c> {
    pub fn new(config: &'c DeConfig, ratio_floor: f64) -> Self {
        Self {
            config,
            ratio_floor,
        }
    }

    /// Run until the target, convergence, stagnation, time or iteration limit
    pub fn run<E, R>(&self, evaluator: &E, deadline: &Deadline, rng: &mut R) -> SearchOutcome
    where
        E: FitnessEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let mut state = self.initialize(evaluator, rng);
        let initial_best_delta_e = state.best().delta_e;
        let mut stagnation = 0;

        tracing::debug!(
            population = state.population.len(),
            dimensions = evaluator.dimensions(),
            initial_best = state.best().fitness,
            "differential evolution started"
        );

        let termination = loop {
            let best = state.best();
            if best.feasible && best.fitness <= self.config.target_fitness {
                break TerminationReason::TargetReached;
            }
            if deadline.expired() {
                tracing::warn!(generation = state.generation, "differential evolution timed out");
                break TerminationReason::TimedOut;
            }
            if state.generation >= self.config.max_iterations {
                break TerminationReason::MaxIterations;
            }

            let previous = state.best().clone();
            state = self.evolve_generation(state, evaluator, rng);

            if improved_by(state.best(), &previous, self.config.convergence_tolerance) {
                stagnation = 0;
            } else {
                stagnation += 1;
            }
            if stagnation >= self.config.max_stagnation {
                break TerminationReason::Stagnated;
            }
            let converged = state
                .history
                .last()
                .map(|s| s.fitness_std_dev <= self.config.convergence_tolerance)
                .unwrap_or(false);
            if converged {
                break TerminationReason::Converged;
            }
        };

        tracing::debug!(
            generations = state.generation,
            evaluations = state.evaluations,
            best = state.best().fitness,
            ?termination,
            "differential evolution finished"
        );

        SearchOutcome {
            best: state.best().clone(),
            initial_best_delta_e,
            iterations: state.generation,
            evaluations: state.evaluations,
            termination,
            history: state.history,
        }
    }

    /// Random population on the simplex
    pub fn initialize<E, R>(&self, evaluator: &E, rng: &mut R) -> DeState
    where
        E: FitnessEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let dims = evaluator.dimensions();
        let size = self.config.population_size(dims);
        let step = evaluator.ratio_step();

        let population: Vec<CandidateSolution> = (0..size)
            .map(|_| {
                let mut ratios = random_ratios(dims, self.ratio_floor, rng);
                repair_ratios(&mut ratios, self.ratio_floor, step);
                evaluator.evaluate(&ratios)
            })
            .collect();

        DeState {
            best: best_index(&population),
            population,
            mutation_factor: self
                .config
                .mutation_factor
                .clamp(MIN_MUTATION_FACTOR, MAX_MUTATION_FACTOR),
            crossover_rate: self.config.crossover_rate.clamp(0.0, 1.0),
            generation: 0,
            evaluations: size,
            history: Vec::new(),
        }
    }

    /// One generation: mutate, cross over, repair, select, adapt F and CR
    pub fn evolve_generation<E, R>(&self, state: DeState, evaluator: &E, rng: &mut R) -> DeState
    where
        E: FitnessEvaluator + ?Sized,
        R: Rng + ?Sized,
    {
        let DeState {
            population,
            best,
            mut mutation_factor,
            mut crossover_rate,
            generation,
            mut evaluations,
            mut history,
        } = state;

        let n = population.len();
        let step = evaluator.ratio_step();
        let diversity = normalized_diversity(&population);
        let (best_fitness, worst_fitness) = finite_range(&population);

        let mut next = population.clone();
        let mut successes = 0usize;

        for i in 0..n {
            let strategy = match self.config.strategy {
                DeStrategy::Adaptive => {
                    let relative =
                        relative_fitness(population[i].fitness, best_fitness, worst_fitness);
                    self.pick_strategy(diversity, relative)
                }
                fixed => fixed,
            };

            let mutant = mutate(strategy, i, &population, best, mutation_factor, rng);
            let mut trial = crossover(&population[i].ratios, &mutant, crossover_rate, rng);
            repair_ratios(&mut trial, self.ratio_floor, step);

            let candidate = evaluator.evaluate(&trial);
            evaluations += 1;

            if candidate.is_better_than(&population[i]) {
                successes += 1;
                next[i] = candidate;
            } else if !population[i].is_better_than(&candidate) {
                // Ties move too, so flat regions keep drifting
                next[i] = candidate;
            }
        }

        let success_rate = successes as f64 / n.max(1) as f64;
        mutation_factor = if success_rate > self.config.success_rate_threshold {
            mutation_factor * (1.0 + MUTATION_NUDGE)
        } else {
            mutation_factor * (1.0 - MUTATION_NUDGE)
        }
        .clamp(MIN_MUTATION_FACTOR, MAX_MUTATION_FACTOR);

        let next_diversity = normalized_diversity(&next);
        if next_diversity < self.config.low_diversity {
            crossover_rate += CROSSOVER_NUDGE;
        } else if next_diversity > self.config.high_diversity {
            crossover_rate -= CROSSOVER_NUDGE;
        }
        crossover_rate = crossover_rate.clamp(MIN_ADAPTIVE_CROSSOVER, 1.0);

        let best = best_index(&next);
        history.push(generation_stats(
            generation + 1,
            &next,
            best,
            next_diversity,
            mutation_factor,
            crossover_rate,
        ));

        DeState {
            population: next,
            best,
            mutation_factor,
            crossover_rate,
            generation: generation + 1,
            evaluations,
            history,
        }
    }

    /// Explore with rand/1 when the population is spread out and the
    /// individual is weak, exploit with best/1 once it has collapsed,
    /// current-to-best/1 otherwise.
    pub fn pick_strategy(&self, diversity: f64, relative_fitness: f64) -> DeStrategy {
        if diversity > self.config.high_diversity && relative_fitness > 0.5 {
            DeStrategy::Rand1Bin
        } else if diversity < self.config.low_diversity {
            DeStrategy::Best1Bin
        } else {
            DeStrategy::CurrentToBest1
        }
    }
}

fn mutate<R: Rng + ?Sized>(
    strategy: DeStrategy,
    target: usize,
    population: &[CandidateSolution],
    best: usize,
    f: f64,
    rng: &mut R,
) -> Vec<f64> {
    let r = distinct_indices(population.len(), target, 5, rng);
    let x = |i: usize| &population[i].ratios;
    let dims = x(target).len();

    (0..dims)
        .map(|j| match strategy {
            DeStrategy::Rand1Bin => x(r[0])[j] + f * (x(r[1])[j] - x(r[2])[j]),
            DeStrategy::Best1Bin => x(best)[j] + f * (x(r[0])[j] - x(r[1])[j]),
            DeStrategy::CurrentToBest1 | DeStrategy::Adaptive => {
                x(target)[j] + f * (x(best)[j] - x(target)[j]) + f * (x(r[0])[j] - x(r[1])[j])
            }
            DeStrategy::Rand2Bin => {
                x(r[0])[j] + f * (x(r[1])[j] - x(r[2])[j]) + f * (x(r[3])[j] - x(r[4])[j])
            }
            DeStrategy::Best2Bin => {
                x(best)[j] + f * (x(r[0])[j] - x(r[1])[j]) + f * (x(r[2])[j] - x(r[3])[j])
            }
        })
        .collect()
}

/// Binomial crossover; dimension `jrand` always comes from the mutant
fn crossover<R: Rng + ?Sized>(target: &[f64], mutant: &[f64], cr: f64, rng: &mut R) -> Vec<f64> {
    let dims = target.len();
    if dims == 0 {
        return Vec::new();
    }
    let jrand = rng.gen_range(0..dims);
    (0..dims)
        .map(|j| {
            if j == jrand || rng.gen::<f64>() < cr {
                mutant[j]
            } else {
                target[j]
            }
        })
        .collect()
}

/// `count` indices distinct from each other and from `exclude`. Repeats are
/// allowed only when the population is too small to avoid them.
fn distinct_indices<R: Rng + ?Sized>(
    n: usize,
    exclude: usize,
    count: usize,
    rng: &mut R,
) -> Vec<usize> {
    let mut picked = Vec::with_capacity(count);
    if n <= 1 {
        return vec![0; count];
    }
    let available = n - 1;
    while picked.len() < count {
        let candidate = rng.gen_range(0..n);
        if candidate == exclude {
            continue;
        }
        if picked.len() < available && picked.contains(&candidate) {
            continue;
        }
        picked.push(candidate);
    }
    picked
}

fn best_index(population: &[CandidateSolution]) -> usize {
    population
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.compare(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

fn finite_range(population: &[CandidateSolution]) -> (f64, f64) {
    population
        .iter()
        .map(|c| c.fitness)
        .filter(|f| f.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), f| (lo.min(f), hi.max(f)))
}

/// 0 for the best individual, 1 for the worst
fn relative_fitness(fitness: f64, best: f64, worst: f64) -> f64 {
    if !fitness.is_finite() {
        return 1.0;
    }
    let span = worst - best;
    if !span.is_finite() || span <= 0.0 {
        return 0.0;
    }
    ((fitness - best) / span).clamp(0.0, 1.0)
}

/// Mean pairwise Euclidean distance, divided by √2 (the simplex diameter)
pub fn normalized_diversity(population: &[CandidateSolution]) -> f64 {
    let n = population.len();
    if n < 2 {
        return 0.0;
    }
    let d = population[0].ratios.len();
    let matrix = Array2::from_shape_fn((n, d), |(i, j)| {
        population[i].ratios.get(j).copied().unwrap_or(0.0)
    });

    let mut total = 0.0;
    for i in 0..n {
        for j in (i + 1)..n {
            let diff = &matrix.row(i) - &matrix.row(j);
            total += diff.mapv(|x| x * x).sum().sqrt();
        }
    }
    let pairs = (n * (n - 1) / 2) as f64;
    total / pairs / std::f64::consts::SQRT_2
}

fn generation_stats(
    generation: usize,
    population: &[CandidateSolution],
    best: usize,
    diversity: f64,
    mutation_factor: f64,
    crossover_rate: f64,
) -> GenerationStats {
    let finite: Vec<f64> = population
        .iter()
        .map(|c| c.fitness)
        .filter(|f| f.is_finite())
        .collect();
    let count = finite.len().max(1) as f64;
    let mean = finite.iter().sum::<f64>() / count;
    let variance = finite.iter().map(|f| (f - mean).powi(2)).sum::<f64>() / count;
    let worst = finite.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let feasible = population.iter().filter(|c| c.feasible).count();

    GenerationStats {
        generation,
        best_fitness: population[best].fitness,
        mean_fitness: if finite.is_empty() { f64::INFINITY } else { mean },
        worst_fitness: if finite.is_empty() { f64::INFINITY } else { worst },
        fitness_std_dev: if finite.is_empty() { f64::INFINITY } else { variance.sqrt() },
        diversity,
        feasible_ratio: feasible as f64 / population.len().max(1) as f64,
        mutation_factor,
        crossover_rate,
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

    /// Squared distance to a fixed simplex point; records every vector it sees
    struct Quadratic {
        optimum: Vec<f64>,
        seen: RefCell<Vec<Vec<f64>>>,
    }

    impl Quadratic {
        fn new(optimum: Vec<f64>) -> Self {
            Self {
                optimum,
                seen: RefCell::new(Vec::new()),
            }
        }
    }

    impl FitnessEvaluator for Quadratic {
        fn dimensions(&self) -> usize {
            self.optimum.len()
        }

        fn evaluate(&self, ratios: &[f64]) -> CandidateSolution {
            self.seen.borrow_mut().push(ratios.to_vec());
            let fitness: f64 = ratios
                .iter()
                .zip(self.optimum.iter())
                .map(|(a, b)| (a - b).powi(2))
                .sum::<f64>()
                * 100.0;
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
    fn converges_on_simplex_optimum() {
        let config = DeConfig::default();
        let de = DifferentialEvolution::new(&config, 0.001);
        let evaluator = Quadratic::new(vec![0.2, 0.5, 0.3]);
        let mut rng = StdRng::seed_from_u64(42);

        let outcome = de.run(&evaluator, &Deadline::new(Duration::from_secs(10)), &mut rng);
        assert!(outcome.best.fitness < 0.05, "fitness {}", outcome.best.fitness);
        assert!(outcome.termination.is_converged());
        assert!(!outcome.history.is_empty());
    }

    #[test]
    fn every_candidate_is_on_the_simplex() {
        let config = DeConfig {
            max_iterations: 30,
            ..DeConfig::default()
        };
        for strategy in [
            DeStrategy::Rand1Bin,
            DeStrategy::Best1Bin,
            DeStrategy::CurrentToBest1,
            DeStrategy::Rand2Bin,
            DeStrategy::Best2Bin,
            DeStrategy::Adaptive,
        ] {
            let config = DeConfig { strategy, ..config.clone() };
            let de = DifferentialEvolution::new(&config, 0.001);
            let evaluator = Quadratic::new(vec![0.7, 0.1, 0.1, 0.1]);
            let mut rng = StdRng::seed_from_u64(3);
            de.run(&evaluator, &Deadline::unbounded(), &mut rng);
            for ratios in evaluator.seen.borrow().iter() {
                assert!(sums_to_one(ratios), "{strategy:?}: {ratios:?}");
            }
        }
    }

    #[test]
    fn same_seed_same_trajectory() {
        let config = DeConfig {
            max_iterations: 20,
            ..DeConfig::default()
        };
        let de = DifferentialEvolution::new(&config, 0.001);
        let run = |seed| {
            let evaluator = Quadratic::new(vec![0.4, 0.6]);
            de.run(&evaluator, &Deadline::unbounded(), &mut StdRng::seed_from_u64(seed))
        };
        let a = run(11);
        let b = run(11);
        assert_eq!(a.best, b.best);
        assert_eq!(a.history, b.history);
    }

    #[test]
    fn expired_deadline_returns_initial_best() {
        let config = DeConfig {
            target_fitness: -1.0,
            ..DeConfig::default()
        };
        let de = DifferentialEvolution::new(&config, 0.001);
        let evaluator = Quadratic::new(vec![0.3, 0.3, 0.4]);
        let mut rng = StdRng::seed_from_u64(5);
        let outcome = de.run(&evaluator, &Deadline::new(Duration::ZERO), &mut rng);
        assert_eq!(outcome.termination, TerminationReason::TimedOut);
        assert_eq!(outcome.iterations, 0);
        assert!(sums_to_one(&outcome.best.ratios));
    }

    #[test]
    fn adaptive_parameters_stay_in_bounds() {
        let config = DeConfig {
            max_iterations: 60,
            max_stagnation: 1000,
            ..DeConfig::default()
        };
        let de = DifferentialEvolution::new(&config, 0.001);
        let evaluator = Quadratic::new(vec![0.5, 0.25, 0.25]);
        let outcome = de.run(&evaluator, &Deadline::unbounded(), &mut StdRng::seed_from_u64(9));
        for stats in &outcome.history {
            assert!((MIN_MUTATION_FACTOR..=MAX_MUTATION_FACTOR).contains(&stats.mutation_factor));
            assert!((0.0..=1.0).contains(&stats.crossover_rate));
            assert!((0.0..=1.0).contains(&stats.feasible_ratio));
        }
    }

    #[test]
    fn strategy_choice_follows_diversity() {
        let config = DeConfig::default();
        let de = DifferentialEvolution::new(&config, 0.001);
        assert_eq!(de.pick_strategy(0.5, 0.9), DeStrategy::Rand1Bin);
        assert_eq!(de.pick_strategy(0.01, 0.9), DeStrategy::Best1Bin);
        assert_eq!(de.pick_strategy(0.2, 0.1), DeStrategy::CurrentToBest1);
    }

    #[test]
    fn crossover_takes_at_least_one_mutant_gene() {
        let mut rng = StdRng::seed_from_u64(1);
        for _ in 0..100 {
            let trial = crossover(&[0.0; 4], &[1.0; 4], 0.0, &mut rng);
            assert_eq!(trial.iter().filter(|v| **v == 1.0).count(), 1);
        }
    }
}
