//! Selection strategies.
//!
//! A [`Selection`] turns a population into a lazy stream: single
//! candidates for survivor and mutation selection, or pairs for mating.
//! Streams borrow the run's RNG, and the caller takes as many draws as it
//! needs. Some streams are finite (`fittest`, `all_pairs`), the with-repeat
//! roulettes are not.
//!
//! All strategies assume **maximization** (higher fitness = better).
//! Candidates without a scalar fitness weigh zero and sort last.
//!
//! # References
//!
//! - Goldberg, D. E. (1989), *Genetic Algorithms in Search, Optimization,
//!   and Machine Learning*, roulette wheel selection
//! - De Jong, K. A. (1975), elitist selection

use crate::candidate::{Genome, Member};
use crate::descriptor::FunctionDescriptor;
use crate::error::{EvolutionError, Result};
use crate::population::Population;
use rand::Rng;

/// Lazy stream of selected candidates.
pub type MemberStream<'a, G> = Box<dyn Iterator<Item = Member<G>> + 'a>;

/// Lazy stream of selected parent pairs.
pub type PairStream<'a, G> = Box<dyn Iterator<Item = (Member<G>, Member<G>)> + 'a>;

/// Selection strategy.
///
/// # Examples
///
/// ```
/// use u_genpop::ga::Selection;
/// use u_genpop::FunctionDescriptor;
///
/// let d = FunctionDescriptor::new("roulette")
///     .with_param("elitism", 2)
///     .with_param("truncation", false);
/// let sel = Selection::from_descriptor(&d).unwrap();
/// assert_eq!(sel, Selection::Roulette { elitism: Some(2), truncation: None, allow_repeats: false });
/// assert!(!sel.yields_pairs());
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Candidates in descending fitness order. Finite.
    Fittest,

    /// Fitness-proportionate selection.
    ///
    /// Candidates are sorted by fitness and cut to the `truncation` fittest.
    /// The `elitism` fittest are yielded first, then draws are weighted by
    /// `fitness / total`. Without `allow_repeats` each candidate is drawn at
    /// most once and the stream ends when the pool is empty.
    ///
    /// # Complexity
    /// O(n log n) setup, O(n) per draw
    Roulette {
        elitism: Option<usize>,
        truncation: Option<usize>,
        allow_repeats: bool,
    },

    /// Every unordered pair of distinct members, each exactly once.
    AllPairs,

    /// [`AllPairs`](Self::AllPairs) over the `n` fittest members.
    AllPairsOfNFittest(usize),

    /// Endless fitness-proportionate pairs; the two parents of a pair are
    /// drawn without replacement.
    PairRoulette { truncation: Option<usize> },
}

impl Selection {
    /// Resolves a descriptor.
    ///
    /// | name | params |
    /// |---|---|
    /// | `fittest` | (`size`, ignored) |
    /// | `roulette` | `elitism`, `truncation` (int or false), `allow_repeats` (bool) |
    /// | `all_pairs` | |
    /// | `all_pairs_of_n_fittest` | `n` |
    /// | `pair_roulette` | `truncation` |
    ///
    /// `all_combinations`, `all_combinations_n_fittest` and `mating_roulette`
    /// are accepted as aliases, as is `duplicates` for `allow_repeats`.
    pub fn from_descriptor(d: &FunctionDescriptor) -> Result<Self> {
        match d.name.as_str() {
            "fittest" => {
                d.expect_only(&["size"])?;
                Ok(Selection::Fittest)
            }
            "roulette" => {
                d.expect_only(&["elitism", "truncation", "allow_repeats", "duplicates"])?;
                let allow_repeats = match d.bool_param("allow_repeats")? {
                    Some(v) => v,
                    None => d.bool_param("duplicates")?.unwrap_or(false),
                };
                Ok(Selection::Roulette {
                    elitism: d.count("elitism")?,
                    truncation: d.count("truncation")?,
                    allow_repeats,
                })
            }
            "all_pairs" | "all_combinations" => {
                d.expect_only(&[])?;
                Ok(Selection::AllPairs)
            }
            "all_pairs_of_n_fittest" | "all_combinations_n_fittest" => {
                d.expect_only(&["n"])?;
                let n = d.usize_param("n")?.ok_or_else(|| EvolutionError::InvalidParameter {
                    function: d.name.clone(),
                    param: "n".into(),
                    reason: "required".into(),
                })?;
                Ok(Selection::AllPairsOfNFittest(n))
            }
            "pair_roulette" | "mating_roulette" => {
                d.expect_only(&["truncation"])?;
                Ok(Selection::PairRoulette {
                    truncation: d.count("truncation")?,
                })
            }
            other => Err(EvolutionError::UnknownFunction {
                kind: "selection",
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Selection::Fittest => "fittest",
            Selection::Roulette { .. } => "roulette",
            Selection::AllPairs => "all_pairs",
            Selection::AllPairsOfNFittest(_) => "all_pairs_of_n_fittest",
            Selection::PairRoulette { .. } => "pair_roulette",
        }
    }

    /// Whether this strategy yields parent pairs rather than candidates.
    pub fn yields_pairs(&self) -> bool {
        matches!(
            self,
            Selection::AllPairs | Selection::AllPairsOfNFittest(_) | Selection::PairRoulette { .. }
        )
    }

    /// Streams single candidates from `population`.
    ///
    /// # Errors
    /// - [`EvolutionError::InvalidConfig`] for pair strategies
    /// - [`EvolutionError::DegenerateFitness`] when roulette weights are
    ///   negative or sum to zero
    pub fn select<'a, G: Genome, R: Rng>(
        &self,
        population: &Population<G>,
        rng: &'a mut R,
    ) -> Result<MemberStream<'a, G>> {
        let members: Vec<Member<G>> = population.all_members().cloned().collect();
        match *self {
            Selection::Fittest => Ok(Box::new(sorted_by_fitness(members).into_iter())),
            Selection::Roulette {
                elitism,
                truncation,
                allow_repeats,
            } => {
                let mut pool = sorted_by_fitness(members);
                if let Some(t) = truncation {
                    pool.truncate(t);
                }
                let mut weights: Vec<f64> = pool.iter().map(weight).collect();
                checked_total(&weights, self.name())?;

                let elite_count = elitism.unwrap_or(0).min(pool.len());
                let elites = if allow_repeats {
                    pool[..elite_count].to_vec()
                } else {
                    weights.drain(..elite_count);
                    pool.drain(..elite_count).collect()
                };
                Ok(Box::new(RouletteWheel {
                    elites: elites.into_iter(),
                    pool,
                    weights,
                    allow_repeats,
                    rng,
                }))
            }
            _ => Err(EvolutionError::InvalidConfig(format!(
                "{} yields pairs, not candidates",
                self.name()
            ))),
        }
    }

    /// Streams parent pairs from `population`.
    ///
    /// # Errors
    /// - [`EvolutionError::InvalidConfig`] for single-candidate strategies
    /// - [`EvolutionError::DegenerateFitness`] when roulette weights are
    ///   negative or sum to zero
    pub fn select_pairs<'a, G: Genome, R: Rng>(
        &self,
        population: &Population<G>,
        rng: &'a mut R,
    ) -> Result<PairStream<'a, G>> {
        // Parents are paired by candidate, so a candidate held twice counts once.
        let members = population.unique_members();
        match *self {
            Selection::AllPairs => Ok(Box::new(AllPairs::new(members))),
            Selection::AllPairsOfNFittest(n) => {
                let mut pool = sorted_by_fitness(members);
                pool.truncate(n);
                Ok(Box::new(AllPairs::new(pool)))
            }
            Selection::PairRoulette { truncation } => {
                let mut pool = sorted_by_fitness(members);
                if let Some(t) = truncation {
                    pool.truncate(t);
                }
                let weights: Vec<f64> = pool.iter().map(weight).collect();
                let total = checked_total(&weights, self.name())?;
                Ok(Box::new(PairWheel {
                    pool,
                    weights,
                    total,
                    rng,
                }))
            }
            _ => Err(EvolutionError::InvalidConfig(format!(
                "{} yields candidates, not pairs",
                self.name()
            ))),
        }
    }
}

/// Roulette weight of a candidate: its scalar fitness, or zero.
fn weight<G: Genome>(member: &Member<G>) -> f64 {
    match member.scalar_fitness() {
        Some(f) if !f.is_nan() => f,
        _ => 0.0,
    }
}

/// Stable sort, fittest first. Unscored candidates go last.
fn sorted_by_fitness<G: Genome>(mut members: Vec<Member<G>>) -> Vec<Member<G>> {
    let key = |m: &Member<G>| match m.scalar_fitness() {
        Some(f) if !f.is_nan() => f,
        _ => f64::NEG_INFINITY,
    };
    members.sort_by(|a, b| key(b).total_cmp(&key(a)));
    members
}

/// Sum of roulette weights, rejecting wheels that cannot be spun.
///
/// An empty pool is fine and yields nothing.
fn checked_total(weights: &[f64], strategy: &str) -> Result<f64> {
    if weights.is_empty() {
        return Ok(0.0);
    }
    if let Some(w) = weights.iter().find(|w| **w < 0.0) {
        return Err(EvolutionError::DegenerateFitness(format!(
            "{strategy} needs non-negative fitness, found {w}"
        )));
    }
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        return Err(EvolutionError::DegenerateFitness(format!(
            "{strategy} needs a positive finite fitness total, found {total}"
        )));
    }
    Ok(total)
}

/// Cumulative-sum wheel spin over positive weights, skipping `skip`.
///
/// `total` must be positive and cover at least one unskipped weight.
fn spin<R: Rng>(weights: &[f64], skip: Option<usize>, total: f64, rng: &mut R) -> usize {
    let threshold = rng.random_range(0.0..total);
    let mut cumulative = 0.0;
    let mut last = 0;
    for (i, &w) in weights.iter().enumerate() {
        if Some(i) == skip || w <= 0.0 {
            continue;
        }
        cumulative += w;
        last = i;
        if cumulative > threshold {
            return i;
        }
    }
    // Rounding left the threshold past the final cumulative sum.
    last
}

struct RouletteWheel<'a, G, R> {
    elites: std::vec::IntoIter<Member<G>>,
    pool: Vec<Member<G>>,
    weights: Vec<f64>,
    allow_repeats: bool,
    rng: &'a mut R,
}

impl<G: Genome, R: Rng> Iterator for RouletteWheel<'_, G, R> {
    type Item = Member<G>;

    fn next(&mut self) -> Option<Member<G>> {
        if let Some(elite) = self.elites.next() {
            return Some(elite);
        }
        if self.pool.is_empty() {
            return None;
        }
        let total: f64 = self.weights.iter().sum();
        // Once only zero weights remain the rest are drawn uniformly.
        let idx = if total > 0.0 {
            spin(&self.weights, None, total, self.rng)
        } else {
            self.rng.random_range(0..self.pool.len())
        };
        if self.allow_repeats {
            Some(self.pool[idx].clone())
        } else {
            self.weights.remove(idx);
            Some(self.pool.remove(idx))
        }
    }
}

struct PairWheel<'a, G, R> {
    pool: Vec<Member<G>>,
    weights: Vec<f64>,
    total: f64,
    rng: &'a mut R,
}

impl<G: Genome, R: Rng> Iterator for PairWheel<'_, G, R> {
    type Item = (Member<G>, Member<G>);

    fn next(&mut self) -> Option<Self::Item> {
        let n = self.pool.len();
        if n < 2 {
            return None;
        }
        let first = spin(&self.weights, None, self.total, self.rng);
        let rest = self.total - self.weights[first];
        let second = if rest > 0.0 {
            spin(&self.weights, Some(first), rest, self.rng)
        } else {
            let j = self.rng.random_range(0..n - 1);
            if j >= first {
                j + 1
            } else {
                j
            }
        };
        Some((self.pool[first].clone(), self.pool[second].clone()))
    }
}

struct AllPairs<G> {
    pool: Vec<Member<G>>,
    i: usize,
    j: usize,
}

impl<G> AllPairs<G> {
    fn new(pool: Vec<Member<G>>) -> Self {
        Self { pool, i: 0, j: 1 }
    }
}

impl<G: Genome> Iterator for AllPairs<G> {
    type Item = (Member<G>, Member<G>);

    fn next(&mut self) -> Option<Self::Item> {
        while self.i < self.pool.len() {
            if self.j < self.pool.len() {
                let pair = (self.pool[self.i].clone(), self.pool[self.j].clone());
                self.j += 1;
                return Some(pair);
            }
            self.i += 1;
            self.j = self.i + 1;
        }
        None
    }
}
