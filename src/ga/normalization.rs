//! Fitness normalization.
//!
//! A [`NormalizationPipeline`] runs an ordered list of [`Normalization`]
//! stages over a population once raw fitness is attached. Each pass starts
//! again from every candidate's raw fitness, so normalizing the same
//! candidates twice (once per generation, then over the whole history)
//! gives the same result as normalizing once.
//!
//! Failed candidates take no part in the stages and receive the sentinel
//! fitness at the end of the pass.

use crate::candidate::{Fitness, Genome, Member};
use crate::descriptor::FunctionDescriptor;
use crate::error::{CandidateFailure, EvolutionError, Result, Stage};
use crate::population::Population;
use log::{debug, warn};

/// Margin added by `shift_positive` so shifted minima land above zero.
pub const SHIFT_EPSILON: f64 = 1e-6;

/// A single normalization stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Normalization {
    /// `Σ wᵢ · vᵢ^eᵢ`, collapsing a vector to a scalar. Exponents default
    /// to 1.
    Combine {
        weights: Vec<f64>,
        exponents: Option<Vec<f64>>,
    },

    /// Divides each component by its largest magnitude over the population.
    RescaleToUnitMagnitude,

    /// `v[i] - min(v[i]) + ε` for the selected components, or for all of
    /// them when `indices` is `None`. A scalar is component 0.
    ShiftPositive { indices: Option<Vec<usize>> },

    /// `1 / v` per component.
    Invert,
}

impl Normalization {
    /// Resolves a descriptor.
    ///
    /// | name | params |
    /// |---|---|
    /// | `combine` | `weights`, optional `exponents` |
    /// | `rescale_to_unit_magnitude` (alias `magnitudes`) | |
    /// | `shift_positive` (alias `shift_elements`) | optional `indices` |
    /// | `invert` | |
    pub fn from_descriptor(d: &FunctionDescriptor) -> Result<Self> {
        match d.name.as_str() {
            "combine" => {
                d.expect_only(&["weights", "exponents"])?;
                let weights = d.f64_list_param("weights")?.ok_or_else(|| EvolutionError::InvalidParameter {
                    function: d.name.clone(),
                    param: "weights".into(),
                    reason: "required".into(),
                })?;
                let exponents = d.f64_list_param("exponents")?;
                if let Some(e) = &exponents {
                    if e.len() != weights.len() {
                        return Err(EvolutionError::InvalidParameter {
                            function: d.name.clone(),
                            param: "exponents".into(),
                            reason: format!("{} exponents for {} weights", e.len(), weights.len()),
                        });
                    }
                }
                Ok(Normalization::Combine { weights, exponents })
            }
            "rescale_to_unit_magnitude" | "magnitudes" => {
                d.expect_only(&[])?;
                Ok(Normalization::RescaleToUnitMagnitude)
            }
            "shift_positive" | "shift_elements" => {
                d.expect_only(&["indices"])?;
                Ok(Normalization::ShiftPositive {
                    indices: d.usize_list_param("indices")?,
                })
            }
            "invert" => {
                d.expect_only(&[])?;
                Ok(Normalization::Invert)
            }
            other => Err(EvolutionError::UnknownFunction {
                kind: "normalization",
                name: other.to_string(),
            }),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Normalization::Combine { .. } => "combine",
            Normalization::RescaleToUnitMagnitude => "rescale_to_unit_magnitude",
            Normalization::ShiftPositive { .. } => "shift_positive",
            Normalization::Invert => "invert",
        }
    }

    /// Applies the stage to `members`, which must all be scored and not
    /// failed. Returns the members this stage failed.
    pub fn apply<G: Genome>(&self, members: &[Member<G>]) -> Result<Vec<Member<G>>> {
        let fitness: Vec<Fitness> = members.iter().filter_map(|m| m.fitness()).collect();
        if fitness.len() != members.len() {
            return Err(EvolutionError::InvariantViolation(format!(
                "{} applied to unscored candidates",
                self.name()
            )));
        }
        let mut failed = Vec::new();

        match self {
            Normalization::Combine { weights, exponents } => {
                for (member, f) in members.iter().zip(&fitness) {
                    let v = f.components();
                    if v.len() != weights.len() {
                        return Err(EvolutionError::InvalidParameter {
                            function: self.name().into(),
                            param: "weights".into(),
                            reason: format!("{} weights for {} fitness components", weights.len(), v.len()),
                        });
                    }
                    if let Some(e) = exponents.as_ref().filter(|e| e.len() != weights.len()) {
                        return Err(EvolutionError::InvalidParameter {
                            function: self.name().into(),
                            param: "exponents".into(),
                            reason: format!("{} exponents for {} weights", e.len(), weights.len()),
                        });
                    }
                    let total: f64 = v
                        .iter()
                        .enumerate()
                        .map(|(i, x)| {
                            let e = exponents.as_ref().map_or(1.0, |e| e[i]);
                            weights[i] * x.powf(e)
                        })
                        .sum();
                    member.set_fitness(total);
                }
            }
            Normalization::RescaleToUnitMagnitude => {
                let mut largest: Vec<f64> = Vec::new();
                for f in &fitness {
                    for (i, x) in f.components().into_iter().enumerate() {
                        if i == largest.len() {
                            largest.push(0.0);
                        }
                        largest[i] = largest[i].max(x.abs());
                    }
                }
                for (member, f) in members.iter().zip(&fitness) {
                    let scaled = f
                        .components()
                        .into_iter()
                        .enumerate()
                        .map(|(i, x)| if largest[i] > 0.0 { x / largest[i] } else { x })
                        .collect();
                    member.set_fitness(f.with_components(scaled));
                }
            }
            Normalization::ShiftPositive { indices } => {
                let width = fitness.iter().map(|f| f.components().len()).max().unwrap_or(0);
                let selected: Vec<usize> = match indices {
                    Some(idx) => idx.clone(),
                    None => (0..width).collect(),
                };
                if let Some(&bad) = selected.iter().find(|&&i| i >= width) {
                    if !members.is_empty() {
                        return Err(EvolutionError::InvalidParameter {
                            function: self.name().into(),
                            param: "indices".into(),
                            reason: format!("index {bad} out of range for {width} components"),
                        });
                    }
                }
                let minima: Vec<(usize, f64)> = selected
                    .iter()
                    .map(|&i| {
                        let min = fitness
                            .iter()
                            .filter_map(|f| f.components().get(i).copied())
                            .fold(f64::INFINITY, f64::min);
                        (i, min)
                    })
                    .collect();
                for (member, f) in members.iter().zip(&fitness) {
                    let mut v = f.components();
                    for &(i, min) in &minima {
                        if let Some(x) = v.get_mut(i) {
                            *x = *x - min + SHIFT_EPSILON;
                        }
                    }
                    member.set_fitness(f.with_components(v));
                }
            }
            Normalization::Invert => {
                for (member, f) in members.iter().zip(&fitness) {
                    let v = f.components();
                    if v.iter().any(|&x| x == 0.0) {
                        failed.push(member.clone());
                        continue;
                    }
                    member.set_fitness(f.with_components(v.iter().map(|x| 1.0 / x).collect()));
                }
            }
        }
        Ok(failed)
    }
}

/// Ordered normalization stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizationPipeline {
    stages: Vec<Normalization>,
}

impl NormalizationPipeline {
    pub fn new(stages: Vec<Normalization>) -> Self {
        Self { stages }
    }

    pub fn from_descriptors(descriptors: &[FunctionDescriptor]) -> Result<Self> {
        let stages = descriptors
            .iter()
            .map(Normalization::from_descriptor)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { stages })
    }

    pub fn stages(&self) -> &[Normalization] {
        &self.stages
    }

    /// Normalizes every distinct member of `population`.
    ///
    /// Scored members restart from their raw fitness and go through each
    /// stage in order. Members a stage cannot handle are marked failed and,
    /// like every other failed member, end with `failed_fitness`.
    /// Unscored members are left alone. Returns the number of members newly
    /// failed by this pass.
    pub fn apply<G: Genome>(&self, population: &Population<G>, failed_fitness: f64) -> Result<usize> {
        let members = population.unique_members();
        let mut active: Vec<Member<G>> = Vec::new();
        for member in &members {
            let scored = member.modify(|s| {
                if s.failed || s.raw_fitness.is_none() {
                    return false;
                }
                s.fitness = s.raw_fitness.clone();
                true
            });
            if scored {
                active.push(member.clone());
            }
        }

        let mut newly_failed = 0;
        for stage in &self.stages {
            let failed = stage.apply(&active)?;
            for member in &failed {
                let failure = CandidateFailure::new(Stage::Fitness, stage.name(), "zero component cannot be inverted");
                warn!("{}: {failure}", member.key());
                member.modify(|s| s.record_failure(failure, None));
            }
            newly_failed += failed.len();
            active.retain(|m| !m.is_failed());
        }

        for member in &members {
            member.modify(|s| {
                if s.failed {
                    s.fitness = Some(Fitness::Scalar(failed_fitness));
                }
            });
        }
        debug!(
            "normalized {} candidates through {} stages",
            active.len(),
            self.stages.len()
        );
        Ok(newly_failed)
    }
}
