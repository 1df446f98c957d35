//! Run configuration.
//!
//! [`RunConfig`] holds every parameter that controls the generational loop.
//! It is the external string surface of the engine: it deserializes from
//! TOML or JSON, and every algorithm variant is named by a
//! [`FunctionDescriptor`].

use super::normalization::NormalizationPipeline;
use super::selection::Selection;
use crate::descriptor::FunctionDescriptor;
use crate::error::{EvolutionError, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The three selection roles of a generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionConfig {
    /// Picks the survivors that form the next generation.
    pub generational: FunctionDescriptor,
    /// Picks parent pairs for crossover.
    pub mating: FunctionDescriptor,
    /// Picks candidates to mutate.
    pub mutation: FunctionDescriptor,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            generational: FunctionDescriptor::new("fittest"),
            mating: FunctionDescriptor::new("pair_roulette"),
            mutation: FunctionDescriptor::new("roulette").with_param("allow_repeats", true),
        }
    }
}

/// Configuration for an evolution run.
///
/// # Defaults
///
/// ```
/// use u_genpop::ga::RunConfig;
///
/// let config = RunConfig::default();
/// assert_eq!(config.target_size, 20);
/// assert_eq!(config.failed_fitness, 1e-4);
/// assert!(config.validate().is_ok());
/// ```
///
/// # Builder Pattern
///
/// ```
/// use u_genpop::ga::RunConfig;
/// use u_genpop::FunctionDescriptor;
///
/// let config = RunConfig::default()
///     .with_target_size(50)
///     .with_fitness(FunctionDescriptor::new("cage"))
///     .with_normalization(vec![FunctionDescriptor::new("invert")])
///     .with_seed(42);
/// assert_eq!(config.target_size, 50);
/// ```
///
/// # From TOML
///
/// ```
/// use u_genpop::ga::RunConfig;
///
/// let config = RunConfig::from_toml_str(r#"
///     target_size = 10
///     num_generations = 3
///
///     [selection.generational]
///     name = "roulette"
///     params = { elitism = 2 }
///
///     [[normalization]]
///     name = "invert"
/// "#).unwrap();
/// assert_eq!(config.target_size, 10);
/// assert_eq!(config.selection.generational.name, "roulette");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Selection strategies per role.
    pub selection: SelectionConfig,

    /// Crossover function, dispatched by the problem.
    pub mating: FunctionDescriptor,

    /// Mutation function, dispatched by the problem.
    pub mutation: FunctionDescriptor,

    /// Fitness function, dispatched by the problem.
    pub fitness: FunctionDescriptor,

    /// Optimization function, dispatched by the problem.
    pub optimization: FunctionDescriptor,

    /// Normalization stages, applied in order after scoring.
    pub normalization: Vec<FunctionDescriptor>,

    /// Exact size of every generation.
    pub target_size: usize,

    /// Worker threads for optimization and fitness.
    pub process_count: usize,

    /// Generations to run when no explicit count is given.
    pub num_generations: usize,

    /// Parent pairs drawn from the mating stream per generation.
    pub num_crossovers: usize,

    /// Candidates drawn from the mutation stream per generation.
    pub num_mutations: usize,

    /// Per-candidate optimization limit in milliseconds.
    ///
    /// `None` disables the limit (the default).
    pub optimize_timeout_ms: Option<u64>,

    /// Fitness given to candidates whose optimization or scoring failed.
    ///
    /// Should sit below any real score so failures are rarely selected.
    pub failed_fitness: f64,

    /// Random seed for reproducibility.
    ///
    /// `None` uses a random seed.
    pub seed: Option<u64>,

    /// Whether to keep a database of every candidate ever scored.
    pub database: bool,
}

fn default_process_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            selection: SelectionConfig::default(),
            mating: FunctionDescriptor::new("crossover"),
            mutation: FunctionDescriptor::new("mutate"),
            fitness: FunctionDescriptor::new("fitness"),
            optimization: FunctionDescriptor::new("none"),
            normalization: Vec::new(),
            target_size: 20,
            process_count: default_process_count(),
            num_generations: 10,
            num_crossovers: 10,
            num_mutations: 5,
            optimize_timeout_ms: None,
            failed_fitness: 1e-4,
            seed: None,
            database: true,
        }
    }
}

impl RunConfig {
    /// Parses a configuration from TOML. Missing keys take their defaults.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Parses a configuration from JSON. Missing keys take their defaults.
    pub fn from_json_str(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn with_selection(mut self, selection: SelectionConfig) -> Self {
        self.selection = selection;
        self
    }

    pub fn with_generational_selection(mut self, d: FunctionDescriptor) -> Self {
        self.selection.generational = d;
        self
    }

    pub fn with_mating_selection(mut self, d: FunctionDescriptor) -> Self {
        self.selection.mating = d;
        self
    }

    pub fn with_mutation_selection(mut self, d: FunctionDescriptor) -> Self {
        self.selection.mutation = d;
        self
    }

    pub fn with_mating(mut self, d: FunctionDescriptor) -> Self {
        self.mating = d;
        self
    }

    pub fn with_mutation(mut self, d: FunctionDescriptor) -> Self {
        self.mutation = d;
        self
    }

    pub fn with_fitness(mut self, d: FunctionDescriptor) -> Self {
        self.fitness = d;
        self
    }

    pub fn with_optimization(mut self, d: FunctionDescriptor) -> Self {
        self.optimization = d;
        self
    }

    pub fn with_normalization(mut self, stages: Vec<FunctionDescriptor>) -> Self {
        self.normalization = stages;
        self
    }

    pub fn with_target_size(mut self, n: usize) -> Self {
        self.target_size = n;
        self
    }

    pub fn with_process_count(mut self, n: usize) -> Self {
        self.process_count = n;
        self
    }

    pub fn with_num_generations(mut self, n: usize) -> Self {
        self.num_generations = n;
        self
    }

    pub fn with_num_crossovers(mut self, n: usize) -> Self {
        self.num_crossovers = n;
        self
    }

    pub fn with_num_mutations(mut self, n: usize) -> Self {
        self.num_mutations = n;
        self
    }

    pub fn with_optimize_timeout_ms(mut self, ms: u64) -> Self {
        self.optimize_timeout_ms = Some(ms);
        self
    }

    pub fn with_failed_fitness(mut self, value: f64) -> Self {
        self.failed_fitness = value;
        self
    }

    /// Sets the random seed for reproducibility.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn with_database(mut self, enabled: bool) -> Self {
        self.database = enabled;
        self
    }

    pub fn optimize_timeout(&self) -> Option<Duration> {
        self.optimize_timeout_ms.map(Duration::from_millis)
    }

    /// Validates the configuration.
    ///
    /// Besides range checks this resolves every selection and normalization
    /// descriptor, so an unknown name fails here rather than mid-run.
    pub fn validate(&self) -> Result<()> {
        if self.target_size == 0 {
            return Err(EvolutionError::InvalidConfig("target_size must be at least 1".into()));
        }
        if self.process_count == 0 {
            return Err(EvolutionError::InvalidConfig("process_count must be at least 1".into()));
        }
        if self.optimize_timeout_ms == Some(0) {
            return Err(EvolutionError::InvalidConfig(
                "optimize_timeout_ms must be positive or None".into(),
            ));
        }
        if !self.failed_fitness.is_finite() {
            return Err(EvolutionError::InvalidConfig("failed_fitness must be finite".into()));
        }
        let generational = Selection::from_descriptor(&self.selection.generational)?;
        if generational.yields_pairs() {
            return Err(EvolutionError::InvalidConfig(format!(
                "generational selection {} yields pairs",
                self.selection.generational
            )));
        }
        if !Selection::from_descriptor(&self.selection.mating)?.yields_pairs() {
            return Err(EvolutionError::InvalidConfig(format!(
                "mating selection {} must yield pairs",
                self.selection.mating
            )));
        }
        if Selection::from_descriptor(&self.selection.mutation)?.yields_pairs() {
            return Err(EvolutionError::InvalidConfig(format!(
                "mutation selection {} yields pairs",
                self.selection.mutation
            )));
        }
        NormalizationPipeline::from_descriptors(&self.normalization)?;
        Ok(())
    }
}
