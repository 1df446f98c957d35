//! Mating and mutation.
//!
//! Both engines draw from a [`Selection`] stream, hand genomes to the
//! problem's crossover or mutation function, and intern every result
//! through the [`ObjectCache`] so a rediscovered structure resolves to the
//! candidate already known, fitness and all.
//!
//! A failing crossover or mutation call loses only that call's output; it
//! is logged and counted, never fatal.

use super::selection::Selection;
use super::types::EvolutionProblem;
use crate::candidate::{Member, ObjectCache};
use crate::descriptor::FunctionDescriptor;
use crate::error::{Result, Stage};
use crate::population::Population;
use log::{debug, warn};
use rand::Rng;

/// New candidates produced by one operator pass.
#[derive(Debug)]
pub struct Offspring<G> {
    pub population: Population<G>,
    /// Crossover or mutation calls that returned an error.
    pub failures: usize,
}

/// Produces offspring from parent pairs.
pub struct MatingEngine<'a, P> {
    problem: &'a P,
    selection: &'a Selection,
    descriptor: &'a FunctionDescriptor,
    num_crossovers: usize,
}

impl<'a, P: EvolutionProblem> MatingEngine<'a, P> {
    pub fn new(
        problem: &'a P,
        selection: &'a Selection,
        descriptor: &'a FunctionDescriptor,
        num_crossovers: usize,
    ) -> Self {
        Self {
            problem,
            selection,
            descriptor,
            num_crossovers,
        }
    }

    /// Draws up to `num_crossovers` pairs, one two-member child per pair.
    pub fn parent_pool<R: Rng>(
        &self,
        population: &Population<P::Genome>,
        rng: &mut R,
    ) -> Result<Population<P::Genome>> {
        let mut pool = Population::new();
        for (a, b) in self
            .selection
            .select_pairs(population, rng)?
            .take(self.num_crossovers)
        {
            pool.add_subpopulation(Population::from_members([a, b]));
        }
        Ok(pool)
    }

    /// Runs crossover over a fresh parent pool.
    ///
    /// The result is flat and holds no candidate structurally equal to a
    /// member of `population`.
    pub fn mate<R: Rng>(
        &self,
        population: &Population<P::Genome>,
        cache: &mut ObjectCache<P::Genome>,
        rng: &mut R,
    ) -> Result<Offspring<P::Genome>> {
        let parents = self.parent_pool(population, rng)?;
        let mut offspring = Population::new();
        let mut failures = 0;

        for pair in parents.subpopulations() {
            let [a, b] = pair.members() else {
                continue;
            };
            match self
                .problem
                .crossover(&a.genome(), &b.genome(), self.descriptor, rng)
            {
                Ok(children) => {
                    for child in children {
                        offspring.add_member(cache.intern(child));
                    }
                }
                Err(e) => {
                    failures += 1;
                    warn!(
                        "[{}] {}: crossover of {} and {} failed: {e}",
                        Stage::Build,
                        self.descriptor,
                        a.key(),
                        b.key()
                    );
                }
            }
        }

        let offspring = offspring.subtract(population);
        debug!(
            "mating: {} pairs -> {} new offspring ({} failed)",
            parents.subpopulations().len(),
            offspring.len(),
            failures
        );
        Ok(Offspring {
            population: offspring,
            failures,
        })
    }
}

/// Produces mutants of selected candidates.
pub struct MutationEngine<'a, P> {
    problem: &'a P,
    selection: &'a Selection,
    descriptor: &'a FunctionDescriptor,
    num_mutations: usize,
}

impl<'a, P: EvolutionProblem> MutationEngine<'a, P> {
    pub fn new(
        problem: &'a P,
        selection: &'a Selection,
        descriptor: &'a FunctionDescriptor,
        num_mutations: usize,
    ) -> Self {
        Self {
            problem,
            selection,
            descriptor,
            num_mutations,
        }
    }

    /// Mutates up to `num_mutations` selected candidates.
    ///
    /// Mutants are not filtered against `population`; the generation's
    /// dedupe pass handles that.
    pub fn mutate<R: Rng>(
        &self,
        population: &Population<P::Genome>,
        cache: &mut ObjectCache<P::Genome>,
        rng: &mut R,
    ) -> Result<Offspring<P::Genome>> {
        let chosen: Vec<Member<P::Genome>> = self
            .selection
            .select(population, rng)?
            .take(self.num_mutations)
            .collect();

        let mut mutants = Population::new();
        let mut failures = 0;
        for parent in &chosen {
            match self.problem.mutate(&parent.genome(), self.descriptor, rng) {
                Ok(mutant) => mutants.add_member(cache.intern(mutant)),
                Err(e) => {
                    failures += 1;
                    warn!(
                        "[{}] {}: mutation of {} failed: {e}",
                        Stage::Build,
                        self.descriptor,
                        parent.key()
                    );
                }
            }
        }

        debug!(
            "mutation: {} selected -> {} mutants ({} failed)",
            chosen.len(),
            mutants.len(),
            failures
        );
        Ok(Offspring {
            population: mutants,
            failures,
        })
    }
}
