//! Candidates and the content-addressed cache that owns them.
//!
//! - [`Genome`]: the domain contract (canonical key + structural equality)
//! - [`Candidate`]: a shared, mutable-in-place evolvable unit
//! - [`ObjectCache`]: run-scoped memo table, one instance per key

mod cache;
mod types;

pub use cache::ObjectCache;
pub use types::{Candidate, CandidateState, Fitness, GeneticKey, Genome, Member};
