//! Shared fixtures: a string genome and a small problem over it.

use crate::candidate::{Fitness, GeneticKey, Genome, Member, ObjectCache};
use crate::descriptor::FunctionDescriptor;
use crate::error::{EvolutionError, Result};
use crate::ga::fitness::penalty_reward;
use crate::ga::types::{EvolutionProblem, MeanScaling};
use crate::population::Population;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// A word whose structure is its multiset of letters: anagrams are the
/// same candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Word {
    pub letters: String,
}

impl Word {
    pub fn new(letters: &str) -> Self {
        Self {
            letters: letters.to_string(),
        }
    }
}

impl Genome for Word {
    fn genetic_key(&self) -> GeneticKey {
        GeneticKey::canonical("word", self.letters.chars().map(|c| c.to_string()))
    }
}

/// Problem over [`Word`]s.
///
/// - build `word(letters=..)`; anything else is a build error
/// - optimize `sort` sorts letters and fails on words containing `x`,
///   `slow` sleeps for 30ms, `hang` for 3s
/// - crossover `splice` swaps halves, `clone` returns the first parent,
///   `none` produces nothing
/// - mutate `append` adds a random letter, `double` repeats the word
/// - fitness `length` scores the letter count, `measures` returns
///   `[len, vowels + 1]`, `scaled` is the means-scaling form of `measures`
#[derive(Debug, Default)]
pub struct WordProblem {
    /// Fitness fails for words containing this letter.
    pub fail_on: Option<char>,
    /// Exit once the history holds this many generations.
    pub stop_after: Option<usize>,
    pub optimize_calls: AtomicUsize,
    pub fitness_calls: AtomicUsize,
}

impl WordProblem {
    pub fn failing_on(letter: char) -> Self {
        Self {
            fail_on: Some(letter),
            ..Self::default()
        }
    }

    pub fn fitness_calls(&self) -> usize {
        self.fitness_calls.load(Ordering::SeqCst)
    }

    fn measures(word: &Word) -> Vec<f64> {
        let vowels = word.letters.chars().filter(|c| "aeiou".contains(*c)).count();
        vec![word.letters.len() as f64, vowels as f64 + 1.0]
    }
}

fn letters_of(descriptor: &FunctionDescriptor) -> Option<&str> {
    descriptor.param("letters").and_then(|v| v.as_str())
}

impl EvolutionProblem for WordProblem {
    type Genome = Word;

    fn build(&self, descriptor: &FunctionDescriptor) -> Result<Word> {
        match (descriptor.name.as_str(), letters_of(descriptor)) {
            ("word", Some(letters)) => Ok(Word::new(letters)),
            _ => Err(EvolutionError::Build {
                descriptor: descriptor.to_string(),
                message: "expected word(letters=..)".into(),
            }),
        }
    }

    fn genetic_key_of(&self, descriptor: &FunctionDescriptor) -> Option<GeneticKey> {
        match descriptor.name.as_str() {
            "word" => letters_of(descriptor).map(|l| Word::new(l).genetic_key()),
            _ => None,
        }
    }

    fn optimize(&self, genome: &mut Word, descriptor: &FunctionDescriptor) -> Result<()> {
        self.optimize_calls.fetch_add(1, Ordering::SeqCst);
        match descriptor.name.as_str() {
            "none" => Ok(()),
            "slow" => {
                std::thread::sleep(Duration::from_millis(30));
                Ok(())
            }
            "hang" => {
                std::thread::sleep(Duration::from_secs(3));
                Ok(())
            }
            "sort" if genome.letters.contains('x') => {
                Err(EvolutionError::Optimize(format!("cannot sort {}", genome.letters)))
            }
            "sort" => {
                let mut chars: Vec<char> = genome.letters.chars().collect();
                chars.sort_unstable();
                genome.letters = chars.into_iter().collect();
                Ok(())
            }
            other => Err(EvolutionError::UnknownFunction {
                kind: "optimization",
                name: other.to_string(),
            }),
        }
    }

    fn crossover<R: Rng>(
        &self,
        parent1: &Word,
        parent2: &Word,
        descriptor: &FunctionDescriptor,
        _rng: &mut R,
    ) -> Result<Vec<Word>> {
        match descriptor.name.as_str() {
            "none" => Ok(Vec::new()),
            "clone" => Ok(vec![parent1.clone()]),
            "splice" => {
                let (a1, a2) = parent1.letters.split_at(parent1.letters.len() / 2);
                let (b1, b2) = parent2.letters.split_at(parent2.letters.len() / 2);
                Ok(vec![
                    Word::new(&format!("{a1}{b2}")),
                    Word::new(&format!("{b1}{a2}")),
                ])
            }
            other => Err(EvolutionError::UnknownFunction {
                kind: "mating",
                name: other.to_string(),
            }),
        }
    }

    fn mutate<R: Rng>(&self, genome: &Word, descriptor: &FunctionDescriptor, rng: &mut R) -> Result<Word> {
        match descriptor.name.as_str() {
            "append" => {
                let letter = rng.random_range(b'a'..=b'z') as char;
                Ok(Word::new(&format!("{}{letter}", genome.letters)))
            }
            "double" => Ok(Word::new(&genome.letters.repeat(2))),
            other => Err(EvolutionError::UnknownFunction {
                kind: "mutation",
                name: other.to_string(),
            }),
        }
    }

    fn fitness(
        &self,
        genome: &Word,
        descriptor: &FunctionDescriptor,
        scaling: Option<MeanScaling<'_>>,
    ) -> Result<Fitness> {
        self.fitness_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(letter) = self.fail_on {
            if genome.letters.contains(letter) {
                return Err(EvolutionError::Fitness(format!("{} contains {letter}", genome.letters)));
            }
        }
        match (descriptor.name.as_str(), scaling) {
            ("length", _) => Ok(Fitness::Scalar(genome.letters.len() as f64)),
            ("measures", _) | ("scaled", None) => Ok(Fitness::Vector(Self::measures(genome))),
            ("scaled", Some(s)) => Ok(Fitness::Scalar(penalty_reward(s.unscaled, s.means, &[1.0, 1.0], &[1.0, 1.0])?)),
            (other, _) => Err(EvolutionError::UnknownFunction {
                kind: "fitness",
                name: other.to_string(),
            }),
        }
    }

    fn scales_by_means(&self, descriptor: &FunctionDescriptor) -> bool {
        descriptor.name == "scaled"
    }

    fn exit(&self, history: &Population<Word>) -> bool {
        self.stop_after
            .is_some_and(|n| history.subpopulations().len() >= n)
    }
}

/// Routes `log` output through the test harness. Safe to call repeatedly.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn word_descriptor(letters: &str) -> FunctionDescriptor {
    FunctionDescriptor::new("word").with_param("letters", letters)
}

/// Flat population of the given words, interned through `cache`.
pub fn word_population(cache: &mut ObjectCache<Word>, words: &[&str]) -> Population<Word> {
    Population::from_members(words.iter().map(|w| cache.intern(Word::new(w))))
}

/// Flat population of distinct words with the given raw fitness values.
pub fn scored_population(cache: &mut ObjectCache<Word>, fitness: &[f64]) -> Population<Word> {
    Population::from_members(fitness.iter().enumerate().map(|(i, &f)| {
        let member: Member<Word> = cache.intern(Word::new(&"s".repeat(i + 1)));
        member.set_raw_fitness(f);
        member
    }))
}

/// A three-level tree of 22 distinct words.
///
/// Different `variant`s never share a word; equal variants always intern
/// to the same candidates.
///
/// ```text
/// root (2)
/// ├── a (5)
/// │   └── a1 (5)
/// └── b (5)
///     └── b1 (5)
/// ```
pub fn nested_population(cache: &mut ObjectCache<Word>, variant: usize) -> Population<Word> {
    let prefix = (b'p' + (variant % 8) as u8) as char;
    let mut next = 0usize;
    let mut node = |cache: &mut ObjectCache<Word>, n: usize| {
        Population::from_members((0..n).map(|_| {
            next += 1;
            cache.intern(Word::new(&format!("{prefix}{}", "z".repeat(next))))
        }))
    };

    let mut root = node(cache, 2);
    let mut a = node(cache, 5);
    a.add_subpopulation(node(cache, 5));
    let mut b = node(cache, 5);
    b.add_subpopulation(node(cache, 5));
    root.add_subpopulation(a);
    root.add_subpopulation(b);
    root
}
