//! Runtime algorithm selection by name + parameters.
//!
//! A [`FunctionDescriptor`] is the external string surface for choosing an
//! algorithm variant: selection strategies, normalization stages, and the
//! problem's own mating, mutation, optimization and fitness functions are
//! all addressed this way.
//!
//! Equality compares the name and the *unordered* parameter set, so two
//! descriptors written with their parameters in a different order are equal.
//!
//! # Examples
//!
//! ```
//! use u_genpop::FunctionDescriptor;
//!
//! let a = FunctionDescriptor::new("roulette")
//!     .with_param("elitism", 2)
//!     .with_param("truncation", 10);
//! let b = FunctionDescriptor::new("roulette")
//!     .with_param("truncation", 10)
//!     .with_param("elitism", 2);
//! assert_eq!(a, b);
//! assert_eq!(a.count("elitism").unwrap(), Some(2));
//! ```

use crate::error::{EvolutionError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Name + parameter map selecting an algorithm variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionDescriptor {
    pub name: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl FunctionDescriptor {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            params: BTreeMap::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    fn invalid(&self, key: &str, reason: impl Into<String>) -> EvolutionError {
        EvolutionError::InvalidParameter {
            function: self.name.clone(),
            param: key.to_string(),
            reason: reason.into(),
        }
    }

    /// Reads a non-negative integer parameter.
    pub fn usize_param(&self, key: &str) -> Result<Option<usize>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_u64()
                .map(|n| Some(n as usize))
                .ok_or_else(|| self.invalid(key, format!("expected a non-negative integer, got {v}"))),
        }
    }

    /// Reads a count that may be disabled with `false`.
    ///
    /// `false`, `null` or a missing key mean "disabled" (`None`); an integer
    /// enables the option with that count. `true` is rejected since it
    /// carries no count.
    pub fn count(&self, key: &str) -> Result<Option<usize>> {
        match self.params.get(key) {
            None | Some(Value::Null) | Some(Value::Bool(false)) => Ok(None),
            Some(Value::Bool(true)) => Err(self.invalid(key, "expected an integer or false, got true")),
            Some(_) => self.usize_param(key),
        }
    }

    pub fn f64_param(&self, key: &str) -> Result<Option<f64>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_f64()
                .map(Some)
                .ok_or_else(|| self.invalid(key, format!("expected a number, got {v}"))),
        }
    }

    pub fn bool_param(&self, key: &str) -> Result<Option<bool>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => v
                .as_bool()
                .map(Some)
                .ok_or_else(|| self.invalid(key, format!("expected a boolean, got {v}"))),
        }
    }

    pub fn f64_list_param(&self, key: &str) -> Result<Option<Vec<f64>>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_f64()
                        .ok_or_else(|| self.invalid(key, format!("expected numbers, got {v}")))
                })
                .collect::<Result<Vec<f64>>>()
                .map(Some),
            Some(v) => Err(self.invalid(key, format!("expected a list of numbers, got {v}"))),
        }
    }

    pub fn usize_list_param(&self, key: &str) -> Result<Option<Vec<usize>>> {
        match self.params.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|v| {
                    v.as_u64().map(|n| n as usize).ok_or_else(|| {
                        self.invalid(key, format!("expected non-negative integers, got {v}"))
                    })
                })
                .collect::<Result<Vec<usize>>>()
                .map(Some),
            Some(v) => Err(self.invalid(key, format!("expected a list of integers, got {v}"))),
        }
    }

    /// Rejects any parameter not named in `allowed`.
    pub fn expect_only(&self, allowed: &[&str]) -> Result<()> {
        match self.params.keys().find(|k| !allowed.contains(&k.as_str())) {
            Some(key) => Err(self.invalid(key, "unexpected parameter")),
            None => Ok(()),
        }
    }
}

impl fmt::Display for FunctionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, (k, v)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str(")")
    }
}
