//! The generational loop.
//!
//! [`EvolutionDriver`] runs the state machine
//!
//! ```text
//! INIT -> SCORE_INITIAL -> { CROSSOVER -> MUTATE -> MERGE -> DEDUPE -> OPTIMIZE
//!      -> SCORE -> NORMALIZE -> SELECT_NEXT -> RECORD -> CHECK_EXIT }* -> TERMINATED
//! ```
//!
//! Each generation starts by asserting the population has exactly
//! `target_size` members; a violation is fatal. The loop ends when the
//! generation budget is spent, the problem's exit predicate holds, or the
//! run is cancelled. In every case a final normalization pass runs over
//! the whole history before returning.

use super::config::RunConfig;
use super::evaluation::{Optimizer, WorkerPool};
use super::fitness::FitnessEvaluator;
use super::normalization::NormalizationPipeline;
use super::operators::{MatingEngine, MutationEngine};
use super::progress::Progress;
use super::selection::Selection;
use super::types::EvolutionProblem;
use crate::candidate::{Genome, Member, ObjectCache};
use crate::error::{EvolutionError, Result};
use crate::population::Population;
use crate::random::rng_from_seed;
use log::{debug, info};
use rand::rngs::StdRng;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Where the driver is in the generational state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Init,
    ScoreInitial,
    Crossover,
    Mutate,
    Merge,
    Dedupe,
    Optimize,
    Score,
    Normalize,
    SelectNext,
    Record,
    CheckExit,
    Terminated,
}

impl fmt::Display for DriverState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DriverState::Init => "INIT",
            DriverState::ScoreInitial => "SCORE_INITIAL",
            DriverState::Crossover => "CROSSOVER",
            DriverState::Mutate => "MUTATE",
            DriverState::Merge => "MERGE",
            DriverState::Dedupe => "DEDUPE",
            DriverState::Optimize => "OPTIMIZE",
            DriverState::Score => "SCORE",
            DriverState::Normalize => "NORMALIZE",
            DriverState::SelectNext => "SELECT_NEXT",
            DriverState::Record => "RECORD",
            DriverState::CheckExit => "CHECK_EXIT",
            DriverState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Per-generation statistics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GenerationStats {
    pub generation: usize,
    /// Size of the merged, deduplicated population selection drew from.
    pub size_before_selection: usize,
    pub offspring: usize,
    pub mutants: usize,
    /// Per-candidate failures in any stage of this generation.
    pub failures: usize,
    /// Best scalar fitness among the survivors.
    pub best_fitness: Option<f64>,
    /// Mean scalar fitness among the survivors.
    pub mean_fitness: Option<f64>,
}

/// Result of an evolution run.
#[derive(Debug, Clone)]
pub struct RunResult<G> {
    /// The last selected generation.
    pub final_population: Population<G>,

    /// Every generation as a child population, the initial one first.
    pub history: Population<G>,

    /// Every distinct candidate scored during the run, when tracked.
    pub database: Option<Population<G>>,

    /// Total number of generations executed.
    pub generations: usize,

    /// Whether the exit predicate ended the run.
    pub exited_early: bool,

    /// Whether the run was cancelled externally.
    pub cancelled: bool,

    pub stats: Vec<GenerationStats>,
}

/// Executes the generational loop over a shared [`ObjectCache`].
///
/// # Usage
///
/// ```ignore
/// let mut cache = ObjectCache::new();
/// let initial = Population::build(&problem, &descriptors, &mut cache);
/// let config = RunConfig::default().with_target_size(initial.len()).with_seed(42);
/// let mut driver = EvolutionDriver::new(Arc::new(problem), config, &mut cache)?;
/// let result = driver.run(initial, 20)?;
/// println!("best: {:?}", result.final_population.best());
/// ```
pub struct EvolutionDriver<'a, P: EvolutionProblem> {
    problem: Arc<P>,
    cache: &'a mut ObjectCache<P::Genome>,
    config: RunConfig,
    generational: Selection,
    mating: Selection,
    mutation: Selection,
    normalization: NormalizationPipeline,
    pool: WorkerPool,
    rng: StdRng,
    next_id: u64,
    state: DriverState,
}

impl<'a, P: EvolutionProblem> EvolutionDriver<'a, P> {
    /// Validates `config` and resolves every selection and normalization
    /// descriptor up front.
    pub fn new(problem: Arc<P>, config: RunConfig, cache: &'a mut ObjectCache<P::Genome>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            problem,
            cache,
            generational: Selection::from_descriptor(&config.selection.generational)?,
            mating: Selection::from_descriptor(&config.selection.mating)?,
            mutation: Selection::from_descriptor(&config.selection.mutation)?,
            normalization: NormalizationPipeline::from_descriptors(&config.normalization)?,
            pool: WorkerPool::new(config.process_count)?,
            rng: rng_from_seed(config.seed),
            config,
            next_id: 0,
            state: DriverState::Init,
        })
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn cache(&self) -> &ObjectCache<P::Genome> {
        self.cache
    }

    /// Runs up to `generations` generations from `initial`.
    pub fn run(&mut self, initial: Population<P::Genome>, generations: usize) -> Result<RunResult<P::Genome>> {
        self.run_with_cancel(initial, generations, None)
    }

    /// Runs [`RunConfig::num_generations`] generations from `initial`.
    pub fn run_configured(&mut self, initial: Population<P::Genome>) -> Result<RunResult<P::Genome>> {
        let generations = self.config.num_generations;
        self.run_with_cancel(initial, generations, None)
    }

    /// Runs with an optional cancellation token.
    ///
    /// If `cancel` is `Some` and the flag is set to `true`, the loop stops
    /// at the next generation boundary. The final normalization still runs.
    pub fn run_with_cancel(
        &mut self,
        initial: Population<P::Genome>,
        generations: usize,
        cancel: Option<Arc<AtomicBool>>,
    ) -> Result<RunResult<P::Genome>> {
        self.transition(DriverState::Init);
        let mut progress = Progress::new(self.config.database);
        let mut population = initial;
        self.next_id = population.assign_ids_from(self.next_id);

        self.transition(DriverState::ScoreInitial);
        self.evaluate(&population)?;
        progress.record_database(&population);
        progress.record(population.clone());

        let mut stats = Vec::with_capacity(generations);
        let mut completed = 0;
        let mut exited_early = false;
        let mut cancelled = false;

        for generation in 1..=generations {
            if let Some(ref flag) = cancel {
                if flag.load(Ordering::Relaxed) {
                    info!("cancelled before generation {generation}");
                    cancelled = true;
                    break;
                }
            }

            let (next, generation_stats) = self.step(population, generation, &mut progress)?;
            population = next;
            completed = generation;
            self.problem.on_generation(&generation_stats);
            stats.push(generation_stats);

            self.transition(DriverState::CheckExit);
            if self.problem.exit(progress.history()) {
                info!("exit condition met after generation {generation}");
                exited_early = true;
                break;
            }
        }

        self.transition(DriverState::Terminated);
        self.normalization
            .apply(progress.history(), self.config.failed_fitness)?;
        info!(
            "finished after {completed} generations; {} candidates cached",
            self.cache.len()
        );

        let (history, database) = progress.into_parts();
        Ok(RunResult {
            final_population: population,
            history,
            database,
            generations: completed,
            exited_early,
            cancelled,
            stats,
        })
    }

    /// One generation: from the current population to the next.
    fn step(
        &mut self,
        population: Population<P::Genome>,
        generation: usize,
        progress: &mut Progress<P::Genome>,
    ) -> Result<(Population<P::Genome>, GenerationStats)> {
        let target = self.config.target_size;
        let size = population.len();
        if size != target {
            return Err(EvolutionError::InvariantViolation(format!(
                "generation {generation}: population size {size} != target size {target}"
            )));
        }

        self.transition(DriverState::Crossover);
        let offspring = MatingEngine::new(
            &*self.problem,
            &self.mating,
            &self.config.mating,
            self.config.num_crossovers,
        )
        .mate(&population, self.cache, &mut self.rng)?;

        self.transition(DriverState::Mutate);
        let mutants = MutationEngine::new(
            &*self.problem,
            &self.mutation,
            &self.config.mutation,
            self.config.num_mutations,
        )
        .mutate(&population, self.cache, &mut self.rng)?;

        self.transition(DriverState::Merge);
        let (num_offspring, num_mutants) = (offspring.population.len(), mutants.population.len());
        let mut merged = (population + offspring.population + mutants.population).flatten();

        self.transition(DriverState::Dedupe);
        merged.remove_duplicates(true);
        self.next_id = merged.assign_ids_from(self.next_id);
        info!(
            "generation {generation}: {num_offspring} offspring, {num_mutants} mutants, {} after dedupe",
            merged.len()
        );

        let failures = offspring.failures + mutants.failures + self.evaluate(&merged)?;
        progress.record_database(&merged);

        self.transition(DriverState::SelectNext);
        let next: Population<P::Genome> = self
            .generational
            .select(&merged, &mut self.rng)?
            .take(target)
            .collect();
        if next.len() != target {
            return Err(EvolutionError::InvariantViolation(format!(
                "generation {generation}: selected {} of {target} survivors from {} candidates",
                next.len(),
                merged.len()
            )));
        }

        self.transition(DriverState::Record);
        progress.record(next.clone());

        let scores: Vec<f64> = next.all_members().filter_map(|m| m.scalar_fitness()).collect();
        let stats = GenerationStats {
            generation,
            size_before_selection: merged.len(),
            offspring: num_offspring,
            mutants: num_mutants,
            failures,
            best_fitness: scores.iter().copied().reduce(f64::max),
            mean_fitness: (!scores.is_empty()).then(|| scores.iter().sum::<f64>() / scores.len() as f64),
        };
        info!(
            "generation {generation}: {} survivors, best {:?}, mean {:?}, {failures} failures",
            next.len(),
            stats.best_fitness,
            stats.mean_fitness
        );
        Ok((next, stats))
    }

    /// OPTIMIZE, SCORE and NORMALIZE over `population`. Returns the number
    /// of per-candidate failures.
    fn evaluate(&mut self, population: &Population<P::Genome>) -> Result<usize> {
        self.transition(DriverState::Optimize);
        let mut failures = Optimizer::new(
            &self.problem,
            &self.config.optimization,
            self.config.optimize_timeout(),
            self.config.failed_fitness,
        )
        .optimize(population, self.cache, &self.pool);

        self.transition(DriverState::Score);
        failures += FitnessEvaluator::new(&*self.problem, &self.config.fitness, self.config.failed_fitness)
            .evaluate(population, self.cache, &self.pool)
            .failed;

        self.transition(DriverState::Normalize);
        failures += self
            .normalization
            .apply(population, self.config.failed_fitness)?;
        Ok(failures)
    }

    fn transition(&mut self, next: DriverState) {
        debug!("{} -> {next}", self.state);
        self.state = next;
    }
}

/// Runs `n` generations and returns `(final_population, history)`.
///
/// `initial` should have been built through `cache` so that rediscovered
/// candidates resolve to the instances it already holds.
pub fn run_generations<P: EvolutionProblem>(
    problem: &Arc<P>,
    cache: &mut ObjectCache<P::Genome>,
    initial: Population<P::Genome>,
    n: usize,
    config: &RunConfig,
) -> Result<(Population<P::Genome>, Population<P::Genome>)> {
    let mut driver = EvolutionDriver::new(Arc::clone(problem), config.clone(), cache)?;
    let result = driver.run(initial, n)?;
    Ok((result.final_population, result.history))
}

impl<G: Genome> RunResult<G> {
    /// The fittest member of the final population.
    pub fn best(&self) -> Option<Member<G>> {
        self.final_population.best()
    }
}

impl<G: Genome + Serialize> RunResult<G> {
    /// Writes the history and database into `dir`; see [`Progress::dump`].
    pub fn dump(&self, dir: impl AsRef<Path>) -> Result<()> {
        Progress::from_parts(self.history.clone(), self.database.clone()).dump(dir)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::{GeneticKey, Genome};
    use crate::descriptor::FunctionDescriptor;
    use crate::test_support::{init_logging, word_descriptor, word_population, Word, WordProblem};
    use std::collections::HashSet;

    fn word_config(target: usize) -> RunConfig {
        init_logging();
        RunConfig::default()
            .with_target_size(target)
            .with_process_count(2)
            .with_fitness(FunctionDescriptor::new("length"))
            .with_mating(FunctionDescriptor::new("splice"))
            .with_mutation(FunctionDescriptor::new("append"))
            .with_num_crossovers(4)
            .with_num_mutations(2)
            .with_seed(42)
    }

    fn initial(problem: &WordProblem, cache: &mut ObjectCache<Word>, words: &[&str]) -> Population<Word> {
        let descriptors: Vec<FunctionDescriptor> = words.iter().map(|w| word_descriptor(w)).collect();
        Population::build(problem, &descriptors, cache)
    }

    fn keys(pop: &Population<Word>) -> Vec<GeneticKey> {
        pop.all_members().map(|m| m.key().clone()).collect()
    }

    #[test]
    fn test_full_run() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = initial(&problem, &mut cache, &["ab", "cde", "fg", "hij"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(4), &mut cache).unwrap();

        let result = driver.run(start, 5).unwrap();

        assert_eq!(driver.state(), DriverState::Terminated);
        assert_eq!(result.generations, 5);
        assert!(!result.exited_early && !result.cancelled);
        assert_eq!(result.final_population.len(), 4);
        assert_eq!(result.history.subpopulations().len(), 6, "initial + 5 generations");
        assert_eq!(result.stats.len(), 5);

        let best: Vec<f64> = result.stats.iter().map(|s| s.best_fitness.unwrap()).collect();
        assert!(best.windows(2).all(|w| w[1] >= w[0]), "fittest selection never loses the best: {best:?}");
        assert!(result.best().unwrap().scalar_fitness().unwrap() >= 3.0);
    }

    #[test]
    fn test_run_configured_uses_num_generations() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd"]);
        let config = word_config(2).with_num_generations(3);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), config, &mut cache).unwrap();
        assert_eq!(driver.run_configured(start).unwrap().generations, 3);
    }

    #[test]
    fn test_ids_are_unique_and_monotonic() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = initial(&problem, &mut cache, &["ab", "cd", "ef"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(3), &mut cache).unwrap();
        let result = driver.run(start, 3).unwrap();

        let db = result.database.unwrap();
        let ids: Vec<u64> = db.all_members().map(|m| m.id().unwrap()).collect();
        let distinct: HashSet<u64> = ids.iter().copied().collect();
        assert_eq!(distinct.len(), ids.len());
        let mut first_generation: Vec<u64> = result.history.subpopulations()[0]
            .all_members()
            .map(|m| m.id().unwrap())
            .collect();
        first_generation.sort_unstable();
        assert_eq!(first_generation, vec![0, 1, 2]);
    }

    #[test]
    fn test_no_offspring_keeps_population() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd"]);
        let before = keys(&start);
        let config = word_config(2)
            .with_mating(FunctionDescriptor::new("clone"))
            .with_num_mutations(0);

        let (final_population, history) = run_generations(&problem, &mut cache, start, 1, &config).unwrap();

        let mut after = keys(&final_population);
        after.sort();
        let mut expected = before;
        expected.sort();
        assert_eq!(after, expected);
        assert_eq!(history.subpopulations().len(), 2);
    }

    #[test]
    fn test_wrong_initial_size_is_fatal() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd", "ef"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(4), &mut cache).unwrap();
        let err = driver.run(start, 2).unwrap_err();
        assert!(matches!(err, EvolutionError::InvariantViolation(_)));
    }

    #[test]
    fn test_short_selection_is_fatal() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        // One candidate held twice: the right size until dedupe merges it.
        let start = word_population(&mut cache, &["ab", "ba"]);
        let config = word_config(2)
            .with_mating(FunctionDescriptor::new("clone"))
            .with_num_mutations(0);

        let err = run_generations(&problem, &mut cache, start, 1, &config).unwrap_err();
        assert!(matches!(err, EvolutionError::InvariantViolation(ref m) if m.contains("survivors")));
    }

    #[test]
    fn test_zero_generations_scores_initial() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cde"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(2), &mut cache).unwrap();
        let result = driver.run(start, 0).unwrap();
        assert_eq!(result.generations, 0);
        assert_eq!(result.history.subpopulations().len(), 1);
        assert_eq!(result.final_population.get(1).unwrap().scalar_fitness(), Some(3.0));
    }

    #[test]
    fn test_exit_predicate_stops_early() {
        let problem = Arc::new(WordProblem {
            stop_after: Some(3),
            ..WordProblem::default()
        });
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(2), &mut cache).unwrap();

        let result = driver.run(start, 10).unwrap();

        assert!(result.exited_early);
        assert_eq!(result.generations, 2);
        assert_eq!(result.history.subpopulations().len(), 3);
    }

    #[test]
    fn test_cancellation() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(2), &mut cache).unwrap();
        let cancel = Arc::new(AtomicBool::new(true));

        let result = driver.run_with_cancel(start, 10, Some(cancel)).unwrap();

        assert!(result.cancelled, "expected cancelled result");
        assert_eq!(result.generations, 0);
        assert_eq!(driver.state(), DriverState::Terminated);
    }

    #[test]
    fn test_failures_do_not_stop_the_run() {
        let problem = Arc::new(WordProblem::failing_on('q'));
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd", "qq"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(3), &mut cache).unwrap();

        let result = driver.run(start, 2).unwrap();

        assert_eq!(result.generations, 2);
        let qq = driver.cache().get(&Word::new("qq").genetic_key()).unwrap();
        assert!(qq.is_failed());
        assert_eq!(qq.scalar_fitness(), Some(1e-4));
        assert!(result.best().unwrap().scalar_fitness().unwrap() >= 2.0);
    }

    #[test]
    fn test_final_normalization_over_history() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cde", "fghi"]);
        let config = word_config(3).with_normalization(vec![FunctionDescriptor::new("invert")]);

        let (_, history) = run_generations(&problem, &mut cache, start, 3, &config).unwrap();

        for member in history.all_members() {
            let len = member.genome().letters.len() as f64;
            let fitness = member.scalar_fitness().unwrap();
            assert!((fitness - 1.0 / len).abs() < 1e-12, "{member} normalized more than once");
        }
    }

    #[test]
    fn test_optimization_runs_on_every_candidate() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ba", "dc"]);
        let config = word_config(2).with_optimization(FunctionDescriptor::new("sort"));

        let (final_population, history) = run_generations(&problem, &mut cache, start, 2, &config).unwrap();

        assert!(history.all_members().all(|m| m.is_optimized() || m.is_failed()));
        assert!(final_population.get(0).unwrap().is_optimized());
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let problem = Arc::new(WordProblem::default());
        let run = || {
            let mut cache = ObjectCache::new();
            let start = word_population(&mut cache, &["ab", "cd", "ef"]);
            let (final_population, _) = run_generations(&problem, &mut cache, start, 4, &word_config(3)).unwrap();
            keys(&final_population)
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn test_dump_run() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let start = word_population(&mut cache, &["ab", "cd"]);
        let mut driver = EvolutionDriver::new(Arc::clone(&problem), word_config(2), &mut cache).unwrap();
        let result = driver.run(start, 2).unwrap();

        let dir = tempfile::tempdir().unwrap();
        result.dump(dir.path()).unwrap();

        let log = std::fs::read_to_string(dir.path().join("progress.log")).unwrap();
        assert_eq!(log.split("\n\n").filter(|g| !g.is_empty()).count(), 3);
        assert!(dir.path().join("database.json").exists());
    }

    #[test]
    fn test_invalid_config_is_rejected_up_front() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let config = word_config(2).with_generational_selection(FunctionDescriptor::new("nope"));
        assert!(EvolutionDriver::new(Arc::clone(&problem), config, &mut cache).is_err());
    }
}
