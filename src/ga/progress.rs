//! Run history.
//!
//! [`Progress`] keeps the ever-growing history population (one child per
//! generation, the initial population first) and, optionally, a database
//! of every distinct candidate the run has scored. Neither is ever pruned.

use crate::candidate::Genome;
use crate::error::Result;
use crate::population::Population;
use serde::Serialize;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct Progress<G> {
    history: Population<G>,
    database: Option<Population<G>>,
}

impl<G: Genome> Progress<G> {
    pub fn new(track_database: bool) -> Self {
        Self {
            history: Population::new(),
            database: track_database.then(Population::new),
        }
    }

    /// Appends one generation to the history.
    pub fn record(&mut self, generation: Population<G>) {
        self.history.add_subpopulation(generation);
    }

    /// Adds every candidate of `population` to the database, skipping ones
    /// it already holds.
    pub fn record_database(&mut self, population: &Population<G>) {
        if let Some(db) = &mut self.database {
            db.add_members(population.unique_members(), false);
        }
    }

    pub fn history(&self) -> &Population<G> {
        &self.history
    }

    pub fn database(&self) -> Option<&Population<G>> {
        self.database.as_ref()
    }

    pub fn generations(&self) -> usize {
        self.history.subpopulations().len()
    }

    /// Rebuilds a progress record from a finished run.
    pub fn from_parts(history: Population<G>, database: Option<Population<G>>) -> Self {
        Self { history, database }
    }

    pub fn into_parts(self) -> (Population<G>, Option<Population<G>>) {
        (self.history, self.database)
    }

    /// One `<id> <key> <fitness>` line per member, generations separated by
    /// a blank line.
    pub fn progress_log(&self) -> String {
        let mut out = String::new();
        for generation in self.history.subpopulations() {
            for member in generation {
                let state = member.state();
                let id = state.id.map_or_else(|| "-".to_string(), |id| id.to_string());
                let fitness = state
                    .fitness
                    .as_ref()
                    .map_or_else(|| "-".to_string(), |f| f.to_string());
                let _ = writeln!(out, "{id} {} {fitness}", member.key());
            }
            out.push('\n');
        }
        out
    }
}

impl<G: Genome + Serialize> Progress<G> {
    /// Writes `progress.log`, `progress.json` and, when tracked,
    /// `database.json` into `dir`, creating it if needed.
    pub fn dump(&self, dir: impl AsRef<Path>) -> Result<()> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        fs::write(dir.join("progress.log"), self.progress_log())?;
        self.history.dump(dir.join("progress.json"))?;
        if let Some(db) = &self.database {
            db.dump(dir.join("database.json"))?;
        }
        Ok(())
    }
}
