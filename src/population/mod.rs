//! Hierarchical populations of cached candidates.
//!
//! A [`Population`] is a tree: each node holds candidates directly and owns
//! any number of child populations. Generations are recorded as children of
//! a history population, and mating pools are populations of two-member
//! children, so the shape itself carries meaning and every operation that
//! is not explicitly flattening keeps it.
//!
//! # References
//!
//! - Holland, J. H. (1975). *Adaptation in Natural and Artificial Systems*.
//! - Goldberg, D. E. (1989). *Genetic Algorithms in Search, Optimization,
//!   and Machine Learning*, ch. 3 (population bookkeeping).

mod build;
mod container;
mod dump;

pub use container::{AllMembers, Population};
