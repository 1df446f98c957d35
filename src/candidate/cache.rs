//! Content-addressed candidate cache.
//!
//! [`ObjectCache`] replaces a process-global memo table with a run-scoped
//! arena passed explicitly to whatever builds candidates. Equal keys always
//! resolve to the same [`Candidate`] instance; entries are never evicted.

use super::types::{Candidate, CandidateState, GeneticKey, Genome, Member};
use crate::error::Result;
use std::collections::HashMap;
use std::sync::Arc;

/// Memo table mapping [`GeneticKey`] to the one shared candidate instance.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use u_genpop::{GeneticKey, Genome, ObjectCache};
///
/// #[derive(Clone, Debug)]
/// struct Pair(String, String);
///
/// impl Genome for Pair {
///     fn genetic_key(&self) -> GeneticKey {
///         GeneticKey::canonical("pair", [&self.0, &self.1])
///     }
/// }
///
/// let mut cache = ObjectCache::new();
/// let a = cache.intern(Pair("x".into(), "y".into()));
/// let b = cache.intern(Pair("y".into(), "x".into()));
/// assert!(Arc::ptr_eq(&a, &b));
/// assert_eq!(cache.len(), 1);
/// ```
#[derive(Debug)]
pub struct ObjectCache<G> {
    entries: HashMap<GeneticKey, Member<G>>,
}

impl<G: Genome> Default for ObjectCache<G> {
    fn default() -> Self {
        Self::new()
    }
}

impl<G: Genome> ObjectCache<G> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &GeneticKey) -> Option<Member<G>> {
        self.entries.get(key).cloned()
    }

    pub fn contains_key(&self, key: &GeneticKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the cached candidate for `key`, or builds it with `factory`.
    ///
    /// The factory is not invoked on a hit. A factory error propagates and
    /// nothing is cached. `key` is authoritative: the candidate is stored
    /// under it whatever the built genome would compute.
    pub fn get_or_create<F>(&mut self, key: GeneticKey, factory: F) -> Result<Member<G>>
    where
        F: FnOnce() -> Result<G>,
    {
        if let Some(existing) = self.entries.get(&key) {
            return Ok(Arc::clone(existing));
        }
        let genome = factory()?;
        Ok(self.insert_new(key, CandidateState::new(genome)))
    }

    /// Registers an already-built genome under its own key.
    ///
    /// On a hit the existing instance is returned and `genome` is dropped.
    pub fn intern(&mut self, genome: G) -> Member<G> {
        let key = genome.genetic_key();
        if let Some(existing) = self.entries.get(&key) {
            return Arc::clone(existing);
        }
        self.insert_new(key, CandidateState::new(genome))
    }

    /// Registers a full state under `key` unless the key is already cached.
    ///
    /// Used when rehydrating dumps: a cache hit wins over the stored state.
    pub fn intern_state(&mut self, key: GeneticKey, state: CandidateState<G>) -> Member<G> {
        if let Some(existing) = self.entries.get(&key) {
            return Arc::clone(existing);
        }
        self.insert_new(key, state)
    }

    /// Force-overwrites the entry at `key` with `state`.
    ///
    /// An existing instance is updated in place so every population holding
    /// it observes the new state; a missing key gets a fresh entry.
    pub fn update(&mut self, key: &GeneticKey, state: CandidateState<G>) -> Member<G> {
        match self.entries.get(key) {
            Some(existing) => {
                existing.replace_state(state);
                Arc::clone(existing)
            }
            None => self.insert_new(key.clone(), state),
        }
    }

    pub fn members(&self) -> impl Iterator<Item = &Member<G>> {
        self.entries.values()
    }

    fn insert_new(&mut self, key: GeneticKey, state: CandidateState<G>) -> Member<G> {
        let member = Arc::new(Candidate::with_state(key.clone(), state));
        self.entries.insert(key, Arc::clone(&member));
        member
    }
}
