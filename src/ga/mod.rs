//! Generational evolution engine.
//!
//! Users define their problem by implementing [`EvolutionProblem`], which
//! interprets the [`FunctionDescriptor`](crate::FunctionDescriptor)s named
//! in a [`RunConfig`]: how to build, optimize, mate, mutate and score
//! genomes. The engine owns everything else.
//!
//! # Key Types
//!
//! - [`RunConfig`]: descriptors, sizes and run options (TOML/JSON loadable)
//! - [`EvolutionDriver`]: executes the generational state machine
//! - [`RunResult`]: final population, history, database and statistics
//! - [`Selection`]: fittest, roulette and pair-producing policies
//! - [`NormalizationPipeline`]: post-scoring transformations of fitness
//!
//! # Generation
//!
//! crossover → mutation → merge → dedupe → optimize → score → normalize →
//! select next. Optimization and scoring run on a bounded [`WorkerPool`];
//! results are reconciled through the candidate cache on the driver thread.
//!
//! # References
//!
//! - Holland (1975), *Adaptation in Natural and Artificial Systems*
//! - Goldberg (1989), *Genetic Algorithms in Search, Optimization, and Machine Learning*
//! - Baker (1987), "Reducing Bias and Inefficiency in the Selection Algorithm"

mod config;
mod evaluation;
pub mod fitness;
pub mod normalization;
mod operators;
mod progress;
mod runner;
pub mod selection;
pub mod types;

pub use config::{RunConfig, SelectionConfig};
pub use evaluation::{Job, Optimizer, WorkerPool};
pub use fitness::{default_penalty_coefficients, penalty_reward, FitnessEvaluator, FitnessReport, PENALTY_CAP};
pub use normalization::{Normalization, NormalizationPipeline, SHIFT_EPSILON};
pub use operators::{MatingEngine, MutationEngine, Offspring};
pub use progress::Progress;
pub use runner::{run_generations, DriverState, EvolutionDriver, GenerationStats, RunResult};
pub use selection::{MemberStream, PairStream, Selection};
pub use types::{EvolutionProblem, MeanScaling};
