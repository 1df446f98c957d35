//! Error types for the evolution engine.
//!
//! Two kinds of failure exist:
//!
//! - **Per-candidate** failures ([`EvolutionError::Build`],
//!   [`EvolutionError::Optimize`], [`EvolutionError::Fitness`]) are caught
//!   by the engine, recorded on the candidate as a [`CandidateFailure`] and
//!   never abort a generation.
//! - **Fatal** failures ([`EvolutionError::InvariantViolation`],
//!   configuration errors) propagate and terminate the run.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EvolutionError {
    #[error("build failed for {descriptor}: {message}")]
    Build { descriptor: String, message: String },

    #[error("optimization failed: {0}")]
    Optimize(String),

    #[error("fitness calculation failed: {0}")]
    Fitness(String),

    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("degenerate fitness: {0}")]
    DegenerateFitness(String),

    #[error("unknown {kind} function: {name}")]
    UnknownFunction { kind: &'static str, name: String },

    #[error("invalid parameter `{param}` for {function}: {reason}")]
    InvalidParameter {
        function: String,
        param: String,
        reason: String,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

pub type Result<T> = std::result::Result<T, EvolutionError>;

/// The pipeline stage in which a per-candidate failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Build,
    Optimize,
    Fitness,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Build => "build",
            Stage::Optimize => "optimize",
            Stage::Fitness => "fitness",
        };
        f.write_str(s)
    }
}

/// A failure recorded against a single candidate.
///
/// Carries enough context (stage + descriptor) to reproduce the failing
/// call outside of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateFailure {
    pub stage: Stage,
    pub descriptor: String,
    pub message: String,
}

impl CandidateFailure {
    pub fn new(stage: Stage, descriptor: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            stage,
            descriptor: descriptor.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CandidateFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.stage, self.descriptor, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = EvolutionError::UnknownFunction {
            kind: "selection",
            name: "tournament".into(),
        };
        assert_eq!(err.to_string(), "unknown selection function: tournament");

        let err = EvolutionError::InvariantViolation("population size 4 != 5".into());
        assert!(err.to_string().contains("population size 4 != 5"));
    }

    #[test]
    fn test_failure_display() {
        let failure = CandidateFailure::new(Stage::Fitness, "cage", "window missing");
        assert_eq!(failure.to_string(), "[fitness] cage: window missing");
    }

    #[test]
    fn test_json_error_converts() {
        let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: EvolutionError = parsed.unwrap_err().into();
        assert!(matches!(err, EvolutionError::Json(_)));
    }
}
