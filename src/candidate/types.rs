//! Candidate value types and the domain contract.
//!
//! The engine never looks inside a candidate's payload. A domain plugs in
//! by implementing [`Genome`], which only has to produce a canonical
//! [`GeneticKey`] and, optionally, a structural equality test.

use crate::error::CandidateFailure;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};

/// Canonical, order-independent identifier of a candidate's construction
/// inputs. Used to address the [`ObjectCache`](super::ObjectCache).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GeneticKey(String);

impl GeneticKey {
    /// Wraps an already-canonical key.
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Builds a key from a kind label and an unordered set of components.
    ///
    /// Components are sorted before joining, so the same components given in
    /// a different order produce the same key.
    ///
    /// ```
    /// use u_genpop::GeneticKey;
    ///
    /// let a = GeneticKey::canonical("cage", ["linker-2", "amine-1"]);
    /// let b = GeneticKey::canonical("cage", ["amine-1", "linker-2"]);
    /// assert_eq!(a, b);
    /// assert_eq!(a.as_str(), "cage[amine-1|linker-2]");
    /// ```
    pub fn canonical<I, S>(kind: &str, components: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut parts: Vec<String> = components
            .into_iter()
            .map(|s| s.as_ref().to_string())
            .collect();
        parts.sort_unstable();
        Self(format!("{kind}[{}]", parts.join("|")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GeneticKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fitness of a candidate: a scalar, or a vector of measures awaiting
/// normalization.
///
/// Higher scalar fitness is better.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Fitness {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl Fitness {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            Fitness::Scalar(v) => Some(*v),
            Fitness::Vector(_) => None,
        }
    }

    /// Components of the fitness; a scalar is a one-element vector.
    pub fn components(&self) -> Vec<f64> {
        match self {
            Fitness::Scalar(v) => vec![*v],
            Fitness::Vector(v) => v.clone(),
        }
    }

    /// Rebuilds a fitness of the same shape from new components.
    pub(crate) fn with_components(&self, components: Vec<f64>) -> Fitness {
        match self {
            Fitness::Scalar(_) => Fitness::Scalar(components.first().copied().unwrap_or(0.0)),
            Fitness::Vector(_) => Fitness::Vector(components),
        }
    }
}

impl From<f64> for Fitness {
    fn from(v: f64) -> Self {
        Fitness::Scalar(v)
    }
}

impl From<Vec<f64>> for Fitness {
    fn from(v: Vec<f64>) -> Self {
        Fitness::Vector(v)
    }
}

impl fmt::Display for Fitness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fitness::Scalar(v) => write!(f, "{v}"),
            Fitness::Vector(v) => write!(f, "{v:?}"),
        }
    }
}

/// The opaque payload of a candidate.
///
/// # Implementing
///
/// ```
/// use u_genpop::{GeneticKey, Genome};
///
/// #[derive(Clone, Debug)]
/// struct Cage {
///     building_blocks: Vec<String>,
///     topology: String,
/// }
///
/// impl Genome for Cage {
///     fn genetic_key(&self) -> GeneticKey {
///         let mut parts = self.building_blocks.clone();
///         parts.push(format!("topology:{}", self.topology));
///         GeneticKey::canonical("cage", parts)
///     }
/// }
/// ```
pub trait Genome: Clone + Send + Sync + fmt::Debug + 'static {
    /// Canonical key over the construction inputs.
    fn genetic_key(&self) -> GeneticKey;

    /// Structural equivalence. Independent of identity and fitness.
    ///
    /// The default compares genetic keys.
    fn same(&self, other: &Self) -> bool {
        self.genetic_key() == other.genetic_key()
    }
}

/// Everything about a candidate that the pipeline stages mutate.
///
/// Workers receive an independent clone of this state and hand back the
/// modified copy, which is then reconciled into the cache.
///
/// `raw_fitness` is what the fitness function returned; `fitness` is the
/// normalized value selection reads. Normalization always starts again
/// from `raw_fitness`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateState<G> {
    pub genome: G,
    #[serde(default)]
    pub id: Option<u64>,
    #[serde(default)]
    pub raw_fitness: Option<Fitness>,
    #[serde(default)]
    pub fitness: Option<Fitness>,
    #[serde(default)]
    pub raw_measures: Option<Vec<f64>>,
    #[serde(default)]
    pub optimized: bool,
    #[serde(default)]
    pub failed: bool,
    #[serde(default)]
    pub failures: Vec<CandidateFailure>,
}

impl<G> CandidateState<G> {
    pub fn new(genome: G) -> Self {
        Self {
            genome,
            id: None,
            raw_fitness: None,
            fitness: None,
            raw_measures: None,
            optimized: false,
            failed: false,
            failures: Vec::new(),
        }
    }

    /// Marks the state failed, records why and, when given, applies the
    /// sentinel fitness.
    pub fn record_failure(&mut self, failure: CandidateFailure, sentinel: Option<f64>) {
        self.failed = true;
        if let Some(v) = sentinel {
            self.fitness = Some(Fitness::Scalar(v));
        }
        self.failures.push(failure);
    }
}

/// A cached, shared candidate.
///
/// Identity is the `Arc` allocation: the [`ObjectCache`](super::ObjectCache)
/// hands out the same instance for equal keys.
#[derive(Debug)]
pub struct Candidate<G> {
    key: GeneticKey,
    state: RwLock<CandidateState<G>>,
}

/// Shared handle to a cached candidate.
pub type Member<G> = Arc<Candidate<G>>;

impl<G: Genome> Candidate<G> {
    pub(crate) fn with_state(key: GeneticKey, state: CandidateState<G>) -> Self {
        Self {
            key,
            state: RwLock::new(state),
        }
    }

    pub fn key(&self) -> &GeneticKey {
        &self.key
    }

    /// Read access to the current state.
    pub fn state(&self) -> RwLockReadGuard<'_, CandidateState<G>> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Independent copy of the current state.
    pub fn snapshot(&self) -> CandidateState<G> {
        self.state().clone()
    }

    /// Mutates the state in place.
    pub fn modify<T>(&self, f: impl FnOnce(&mut CandidateState<G>) -> T) -> T {
        let mut guard = self.state.write().unwrap_or_else(PoisonError::into_inner);
        f(&mut guard)
    }

    /// Overwrites the whole state.
    pub fn replace_state(&self, state: CandidateState<G>) {
        self.modify(|s| *s = state);
    }

    pub fn genome(&self) -> G {
        self.state().genome.clone()
    }

    pub fn id(&self) -> Option<u64> {
        self.state().id
    }

    pub fn fitness(&self) -> Option<Fitness> {
        self.state().fitness.clone()
    }

    pub fn scalar_fitness(&self) -> Option<f64> {
        self.state().fitness.as_ref().and_then(Fitness::as_scalar)
    }

    pub fn set_fitness(&self, fitness: impl Into<Fitness>) {
        let fitness = fitness.into();
        self.modify(|s| s.fitness = Some(fitness));
    }

    pub fn raw_fitness(&self) -> Option<Fitness> {
        self.state().raw_fitness.clone()
    }

    /// Records a fitness function result as both raw and current fitness.
    pub fn set_raw_fitness(&self, fitness: impl Into<Fitness>) {
        let fitness = fitness.into();
        self.modify(|s| {
            s.fitness = Some(fitness.clone());
            s.raw_fitness = Some(fitness);
        });
    }

    pub fn raw_measures(&self) -> Option<Vec<f64>> {
        self.state().raw_measures.clone()
    }

    pub fn is_optimized(&self) -> bool {
        self.state().optimized
    }

    pub fn is_failed(&self) -> bool {
        self.state().failed
    }

    pub fn failures(&self) -> Vec<CandidateFailure> {
        self.state().failures.clone()
    }

    /// Structural equivalence with `other`.
    pub fn same(&self, other: &Candidate<G>) -> bool {
        if std::ptr::eq(self, other) || self.key == other.key {
            return true;
        }
        let a = self.state();
        let b = other.state();
        a.genome.same(&b.genome)
    }
}

impl<G: Genome> fmt::Display for Candidate<G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state();
        match state.id {
            Some(id) => write!(f, "#{id} {}", self.key)?,
            None => write!(f, "{}", self.key)?,
        }
        if let Some(fit) = &state.fitness {
            write!(f, " fitness={fit}")?;
        }
        if state.failed {
            f.write_str(" (failed)")?;
        }
        Ok(())
    }
}
