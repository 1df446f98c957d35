//! Fitness evaluation.
//!
//! [`FitnessEvaluator`] scores the distinct members of a population on the
//! worker pool. Functions that do not scale by means are called once per
//! unscored candidate. Means-scaling functions run in two passes:
//!
//! 1. every candidate without cached measures is measured (`scaling: None`)
//! 2. once *all* measures are in, the component-wise mean over the
//!    non-failed results is taken and every non-failed member is scored
//!    again against it
//!
//! The second pass covers already-scored members too, since the means
//! depend on the current population. A candidate whose scoring fails gets
//! the sentinel fitness and a recorded failure; the generation goes on.

use super::evaluation::{reconcile, snapshot_jobs, Job, WorkerPool};
use super::types::{EvolutionProblem, MeanScaling};
use crate::candidate::{CandidateState, Member, ObjectCache};
use crate::descriptor::FunctionDescriptor;
use crate::error::{CandidateFailure, EvolutionError, Result, Stage};
use crate::population::Population;
use log::{debug, warn};

/// Upper bound on the penalty term of [`penalty_reward`].
pub const PENALTY_CAP: f64 = 1e101;

/// Default `penalty_reward` coefficients for `n` measures: all 1 except a
/// 0.2 weight on the final reward measure.
pub fn default_penalty_coefficients(n: usize) -> Vec<f64> {
    let mut coeffs = vec![1.0; n];
    if let Some(last) = coeffs.last_mut() {
        *last = 0.2;
    }
    coeffs
}

/// Scales measures by population means and folds them into one score.
///
/// `vars[i] = coeffs[i] * (unscaled[i] / means[i]) ^ exponents[i]`, where a
/// zero mean counts as 1. Every measure but the last is a penalty: the
/// score is `1 / Σ vars[..n-1]` (capped at [`PENALTY_CAP`]) plus the last
/// measure as a reward.
///
/// # Examples
///
/// ```
/// use u_genpop::ga::penalty_reward;
///
/// // scaled = [0.5, 2.0]; penalty = 1 / 0.5; reward = 2.0
/// let score = penalty_reward(&[1.0, 4.0], &[2.0, 2.0], &[1.0, 1.0], &[1.0, 1.0]).unwrap();
/// assert!((score - 4.0).abs() < 1e-12);
/// ```
pub fn penalty_reward(unscaled: &[f64], means: &[f64], coeffs: &[f64], exponents: &[f64]) -> Result<f64> {
    let n = unscaled.len();
    if n == 0 {
        return Err(EvolutionError::Fitness("no measures to scale".into()));
    }
    if means.len() != n || coeffs.len() != n || exponents.len() != n {
        return Err(EvolutionError::Fitness(format!(
            "{n} measures but {} means, {} coefficients, {} exponents",
            means.len(),
            coeffs.len(),
            exponents.len()
        )));
    }

    let vars: Vec<f64> = (0..n)
        .map(|i| {
            let mean = if means[i] == 0.0 { 1.0 } else { means[i] };
            coeffs[i] * (unscaled[i] / mean).powf(exponents[i])
        })
        .collect();

    let penalty_sum: f64 = vars[..n - 1].iter().sum();
    let penalty = if penalty_sum == 0.0 {
        PENALTY_CAP
    } else {
        (1.0 / penalty_sum).min(PENALTY_CAP)
    };
    Ok(penalty + vars[n - 1])
}

/// Component-wise mean of equal-length rows.
///
/// The first row fixes the length; rows of any other length are left out.
fn column_means(rows: &[Vec<f64>]) -> Vec<f64> {
    let Some(width) = rows.first().map(Vec::len) else {
        return Vec::new();
    };
    let mut sums = vec![0.0; width];
    let mut count = 0usize;
    for row in rows.iter().filter(|r| r.len() == width) {
        for (sum, v) in sums.iter_mut().zip(row) {
            *sum += v;
        }
        count += 1;
    }
    sums.into_iter().map(|s| s / count as f64).collect()
}

/// Outcome of one evaluation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FitnessReport {
    /// Candidates given a fitness by this pass.
    pub scored: usize,
    /// Candidates that failed during this pass.
    pub failed: usize,
}

/// Scores populations with the problem's fitness function.
pub struct FitnessEvaluator<'a, P> {
    problem: &'a P,
    descriptor: &'a FunctionDescriptor,
    failed_fitness: f64,
}

impl<'a, P: EvolutionProblem> FitnessEvaluator<'a, P> {
    pub fn new(problem: &'a P, descriptor: &'a FunctionDescriptor, failed_fitness: f64) -> Self {
        Self {
            problem,
            descriptor,
            failed_fitness,
        }
    }

    /// Scores the distinct members of `population`.
    pub fn evaluate(
        &self,
        population: &Population<P::Genome>,
        cache: &mut ObjectCache<P::Genome>,
        pool: &WorkerPool,
    ) -> FitnessReport {
        let members = population.unique_members();
        let report = if self.problem.scales_by_means(self.descriptor) {
            self.evaluate_scaled(&members, cache, pool)
        } else {
            self.evaluate_direct(&members, cache, pool)
        };
        debug!(
            "fitness {}: {} scored, {} failed",
            self.descriptor, report.scored, report.failed
        );
        report
    }

    fn evaluate_direct(
        &self,
        members: &[Member<P::Genome>],
        cache: &mut ObjectCache<P::Genome>,
        pool: &WorkerPool,
    ) -> FitnessReport {
        let jobs = snapshot_jobs(members, |s| s.raw_fitness.is_none() && !s.failed);
        let results = pool.map(jobs, |(key, mut state)| {
            match self.problem.fitness(&state.genome, self.descriptor, None) {
                Ok(fitness) => {
                    state.fitness = Some(fitness.clone());
                    state.raw_fitness = Some(fitness);
                }
                Err(e) => self.fail(&mut state, e),
            }
            (key, state)
        });
        self.finish(cache, members, results)
    }

    fn evaluate_scaled(
        &self,
        members: &[Member<P::Genome>],
        cache: &mut ObjectCache<P::Genome>,
        pool: &WorkerPool,
    ) -> FitnessReport {
        let jobs = snapshot_jobs(members, |s| s.raw_measures.is_none() && !s.failed);
        let measured = pool.map(jobs, |(key, mut state)| {
            match self.problem.fitness(&state.genome, self.descriptor, None) {
                Ok(fitness) => state.raw_measures = Some(fitness.components()),
                Err(e) => self.fail(&mut state, e),
            }
            (key, state)
        });
        // Every first-pass result is collected before the means are taken.
        let first = self.finish(cache, members, measured);

        let rows: Vec<Vec<f64>> = members
            .iter()
            .filter_map(|m| {
                let s = m.state();
                if s.failed {
                    None
                } else {
                    s.raw_measures.clone()
                }
            })
            .collect();
        let means = column_means(&rows);
        debug!("fitness {}: means {:?} over {} candidates", self.descriptor, means, rows.len());

        let jobs = snapshot_jobs(members, |s| !s.failed && s.raw_measures.is_some());
        let results = pool.map(jobs, |(key, mut state)| {
            let unscaled = state.raw_measures.clone().unwrap_or_default();
            let scored = if unscaled.len() == means.len() {
                let scaling = MeanScaling {
                    unscaled: &unscaled,
                    means: &means,
                };
                self.problem.fitness(&state.genome, self.descriptor, Some(scaling))
            } else {
                Err(EvolutionError::Fitness(format!(
                    "expected {} measures, got {}",
                    means.len(),
                    unscaled.len()
                )))
            };
            match scored {
                Ok(fitness) => {
                    state.fitness = Some(fitness.clone());
                    state.raw_fitness = Some(fitness);
                }
                Err(e) => self.fail(&mut state, e),
            }
            (key, state)
        });
        let second = self.finish(cache, members, results);

        FitnessReport {
            scored: second.scored,
            failed: first.failed + second.failed,
        }
    }

    fn fail(&self, state: &mut CandidateState<P::Genome>, error: EvolutionError) {
        state.raw_fitness = None;
        let failure = CandidateFailure::new(Stage::Fitness, self.descriptor.to_string(), error.to_string());
        state.record_failure(failure, Some(self.failed_fitness));
    }

    fn finish(
        &self,
        cache: &mut ObjectCache<P::Genome>,
        members: &[Member<P::Genome>],
        results: Vec<Job<P::Genome>>,
    ) -> FitnessReport {
        let mut report = FitnessReport::default();
        for (key, state) in &results {
            if state.failed {
                report.failed += 1;
                if let Some(failure) = state.failures.last() {
                    warn!("{key}: {failure}");
                }
            } else {
                report.scored += 1;
            }
        }
        reconcile(cache, members, results);
        report
    }
}
