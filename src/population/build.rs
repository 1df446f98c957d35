//! Initial population construction.

use super::Population;
use crate::candidate::{Genome, ObjectCache};
use crate::descriptor::FunctionDescriptor;
use crate::error::Stage;
use crate::ga::types::EvolutionProblem;
use log::{info, warn};

impl<G: Genome> Population<G> {
    /// Builds one candidate per descriptor, through `cache`.
    ///
    /// When the problem can name the key up front the build is skipped on a
    /// cache hit. Descriptors that fail to build are logged and left out, so
    /// the result may be shorter than `descriptors`.
    pub fn build<P>(problem: &P, descriptors: &[FunctionDescriptor], cache: &mut ObjectCache<G>) -> Population<G>
    where
        P: EvolutionProblem<Genome = G>,
    {
        let mut population = Population::new();
        for descriptor in descriptors {
            let built = match problem.genetic_key_of(descriptor) {
                Some(key) => cache.get_or_create(key, || problem.build(descriptor)),
                None => problem.build(descriptor).map(|genome| cache.intern(genome)),
            };
            match built {
                Ok(member) => population.add_member(member),
                Err(e) => warn!("[{}] {descriptor}: {e}", Stage::Build),
            }
        }
        info!(
            "built initial population: {} of {} candidates",
            population.len(),
            descriptors.len()
        );
        population
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{word_descriptor, WordProblem};
    use std::sync::Arc;

    #[test]
    fn test_build_excludes_failures() {
        let problem = WordProblem::default();
        let mut cache = ObjectCache::new();
        let descriptors = vec![
            word_descriptor("ab"),
            FunctionDescriptor::new("nonsense"),
            word_descriptor("cd"),
        ];
        let pop = Population::build(&problem, &descriptors, &mut cache);
        assert_eq!(pop.len(), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_build_reuses_cached_candidates() {
        let problem = WordProblem::default();
        let mut cache = ObjectCache::new();
        let first = Population::build(&problem, &[word_descriptor("abc")], &mut cache);
        first.get(0).unwrap().set_raw_fitness(5.0);

        let second = Population::build(&problem, &[word_descriptor("cba")], &mut cache);
        let member = second.get(0).unwrap();
        assert!(Arc::ptr_eq(member, first.get(0).unwrap()));
        assert_eq!(member.scalar_fitness(), Some(5.0));
        assert_eq!(member.genome().letters, "abc", "hit must not rebuild");
    }

    #[test]
    fn test_build_from_no_descriptors() {
        let problem = WordProblem::default();
        let mut cache = ObjectCache::new();
        assert!(Population::build(&problem, &[], &mut cache).is_empty());
    }
}
