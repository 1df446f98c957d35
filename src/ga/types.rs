//! The contract between the generic evolution engine and a domain.
//!
//! [`EvolutionProblem`] bundles the external collaborators the engine calls:
//! candidate construction, optimization, crossover, mutation, fitness and
//! the exit predicate. Variants are chosen by a [`FunctionDescriptor`]'s
//! name and dispatched by the implementation.

use crate::candidate::{Fitness, GeneticKey, Genome};
use crate::descriptor::FunctionDescriptor;
use crate::error::Result;
use crate::ga::runner::GenerationStats;
use crate::population::Population;
use rand::Rng;

/// Inputs to the second, scaled pass of a means-scaling fitness function.
#[derive(Debug, Clone, Copy)]
pub struct MeanScaling<'a> {
    /// This candidate's measures from the first pass.
    pub unscaled: &'a [f64],
    /// Component-wise mean over every non-failed first-pass result.
    pub means: &'a [f64],
}

/// Defines an evolution problem.
///
/// This is the trait users implement to plug domain logic into the engine:
///
/// 1. **Construction**: build a genome from a descriptor
/// 2. **Optimization**: relax a genome in place before scoring
/// 3. **Crossover / mutation**: produce new genomes from existing ones
/// 4. **Fitness**: score a genome, optionally against population means
///
/// Every fallible operation returns a [`Result`]; the engine treats an
/// error as a failure of that one candidate, records it, and carries on.
///
/// # Thread Safety
///
/// `EvolutionProblem` must be `Send + Sync` because optimization and
/// fitness run on a worker pool. It is `'static` because an optimization
/// that overruns its timeout is left running on a detached thread that
/// holds its own `Arc` of the problem.
pub trait EvolutionProblem: Send + Sync + 'static {
    /// The candidate payload for this problem.
    type Genome: Genome;

    /// Builds a genome from its construction descriptor.
    fn build(&self, descriptor: &FunctionDescriptor) -> Result<Self::Genome>;

    /// Canonical key of the genome `descriptor` would build, if known
    /// without building it.
    ///
    /// When given, construction is skipped entirely on a cache hit.
    fn genetic_key_of(&self, _descriptor: &FunctionDescriptor) -> Option<GeneticKey> {
        None
    }

    /// Optimizes a genome in place. Runs on an independent copy.
    ///
    /// With a timeout configured each call runs on its own thread; a call
    /// that overruns is abandoned and its result discarded.
    ///
    /// The default implementation is a no-op.
    fn optimize(&self, _genome: &mut Self::Genome, _descriptor: &FunctionDescriptor) -> Result<()> {
        Ok(())
    }

    /// Produces zero or more offspring from two parents.
    ///
    /// The default implementation produces nothing.
    fn crossover<R: Rng>(
        &self,
        _parent1: &Self::Genome,
        _parent2: &Self::Genome,
        _descriptor: &FunctionDescriptor,
        _rng: &mut R,
    ) -> Result<Vec<Self::Genome>> {
        Ok(Vec::new())
    }

    /// Produces one mutant of `genome`.
    ///
    /// The default implementation returns an unchanged copy.
    fn mutate<R: Rng>(
        &self,
        genome: &Self::Genome,
        _descriptor: &FunctionDescriptor,
        _rng: &mut R,
    ) -> Result<Self::Genome> {
        Ok(genome.clone())
    }

    /// Scores a genome.
    ///
    /// For functions where [`scales_by_means`](Self::scales_by_means) is
    /// true this is called twice: first with `None`, returning the raw
    /// measures as a [`Fitness::Vector`], then with the population means.
    fn fitness(
        &self,
        genome: &Self::Genome,
        descriptor: &FunctionDescriptor,
        scaling: Option<MeanScaling<'_>>,
    ) -> Result<Fitness>;

    /// Whether the fitness function named by `descriptor` takes means.
    fn scales_by_means(&self, _descriptor: &FunctionDescriptor) -> bool {
        false
    }

    /// Early-exit predicate over the progress history.
    fn exit(&self, _history: &Population<Self::Genome>) -> bool {
        false
    }

    /// Called at the end of each generation.
    ///
    /// The default implementation is a no-op.
    fn on_generation(&self, _stats: &GenerationStats) {}
}
