//! Generational evolutionary optimization over content-addressed candidates.
//!
//! The crate runs a generic generational loop (crossover, mutation,
//! optimization, scoring, normalization, selection) over problems defined
//! by the [`ga::EvolutionProblem`] trait:
//!
//! - **Candidates**: evolvable units identified by a canonical
//!   [`GeneticKey`]. An [`ObjectCache`] guarantees that two structurally
//!   equal genomes resolve to the same shared [`Candidate`], so work done
//!   on one is never repeated on the other.
//! - **Populations**: ordered trees of candidate references with
//!   deduplication, set arithmetic and JSON persistence.
//! - **Function descriptors**: every pluggable operation (build, optimize,
//!   mate, mutate, score, select, normalize) is named by a serializable
//!   [`FunctionDescriptor`] so a run can be described in TOML or JSON.
//! - **Engine**: [`ga::EvolutionDriver`] executes the generational state
//!   machine with a bounded worker pool, per-candidate failure tolerance
//!   and a full run history.
//!
//! # Architecture
//!
//! The crate contains no domain concepts. Genomes, their construction and
//! their scoring are defined by consumers; the engine only sees keys,
//! descriptors and fitness values.

pub mod candidate;
pub mod descriptor;
pub mod error;
pub mod ga;
pub mod population;
pub mod random;

#[cfg(test)]
mod test_support;

pub use candidate::{Candidate, CandidateState, Fitness, GeneticKey, Genome, Member, ObjectCache};
pub use descriptor::FunctionDescriptor;
pub use error::{CandidateFailure, EvolutionError, Result, Stage};
pub use ga::{run_generations, EvolutionDriver, EvolutionProblem, RunConfig, RunResult};
pub use population::Population;
