//! JSON dump and load of population trees.
//!
//! The format mirrors the in-memory shape:
//!
//! ```json
//! {
//!   "members": [{ "key": "word[a|b]", "state": { "genome": ..., "fitness": 2.0 } }],
//!   "subpopulations": [{ "members": [], "subpopulations": [] }]
//! }
//! ```
//!
//! Loading goes through an [`ObjectCache`], so a key that is already cached
//! resolves to the existing instance instead of a duplicate.

use super::Population;
use crate::candidate::{CandidateState, GeneticKey, Genome, ObjectCache};
use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Serialize, Deserialize)]
struct MemberRecord<G> {
    key: GeneticKey,
    state: CandidateState<G>,
}

#[derive(Serialize, Deserialize)]
struct PopulationRecord<G> {
    #[serde(default = "Vec::new")]
    members: Vec<MemberRecord<G>>,
    #[serde(default = "Vec::new")]
    subpopulations: Vec<PopulationRecord<G>>,
}

impl<G: Genome> PopulationRecord<G> {
    fn capture(population: &Population<G>) -> Self {
        Self {
            members: population
                .members()
                .iter()
                .map(|m| MemberRecord {
                    key: m.key().clone(),
                    state: m.snapshot(),
                })
                .collect(),
            subpopulations: population.subpopulations().iter().map(Self::capture).collect(),
        }
    }

    fn restore(self, cache: &mut ObjectCache<G>) -> Population<G> {
        let mut population =
            Population::from_members(self.members.into_iter().map(|r| cache.intern_state(r.key, r.state)));
        for child in self.subpopulations {
            population.add_subpopulation(child.restore(cache));
        }
        population
    }
}

impl<G: Genome + Serialize> Population<G> {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&PopulationRecord::capture(self))?)
    }

    /// Writes the population as JSON to `path`.
    pub fn dump(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.to_json()?)?;
        Ok(())
    }
}

impl<G: Genome + DeserializeOwned> Population<G> {
    /// Rebuilds a population from JSON, interning members through `cache`.
    pub fn from_json(json: &str, cache: &mut ObjectCache<G>) -> Result<Self> {
        let record: PopulationRecord<G> = serde_json::from_str(json)?;
        Ok(record.restore(cache))
    }

    pub fn load(path: impl AsRef<Path>, cache: &mut ObjectCache<G>) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?, cache)
    }
}
