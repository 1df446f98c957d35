//! Bounded worker pool and the optimize stage.
//!
//! Workers never touch shared candidates. Each job is a
//! `(GeneticKey, CandidateState)` snapshot; the worker mutates its own copy
//! and hands it back, and the driver thread reconciles every returned
//! state into the [`ObjectCache`] with [`ObjectCache::update`]. Because the
//! cache updates in place, every population holding the candidate sees the
//! result.
//!
//! With the `parallel` feature the pool is a dedicated rayon pool sized to
//! `process_count`; without it jobs run in order on the calling thread.

use super::types::EvolutionProblem;
use crate::candidate::{CandidateState, GeneticKey, Genome, Member, ObjectCache};
use crate::descriptor::FunctionDescriptor;
use crate::error::{CandidateFailure, EvolutionError, Result, Stage};
use crate::population::Population;
use log::{debug, warn};
use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

/// A snapshot sent to a worker, or the updated state it sends back.
pub type Job<G> = (GeneticKey, CandidateState<G>);

/// Fixed-size pool mapping jobs to results, order preserved.
#[derive(Debug)]
pub struct WorkerPool {
    threads: usize,
    #[cfg(feature = "parallel")]
    pool: rayon::ThreadPool,
}

impl WorkerPool {
    /// Starts a pool of `threads` workers (at least one).
    pub fn new(threads: usize) -> Result<Self> {
        let threads = threads.max(1);
        #[cfg(feature = "parallel")]
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("genpop-worker-{i}"))
            .build()
            .map_err(|e| EvolutionError::InvalidConfig(format!("cannot start worker pool: {e}")))?;
        Ok(Self {
            threads,
            #[cfg(feature = "parallel")]
            pool,
        })
    }

    pub fn threads(&self) -> usize {
        self.threads
    }

    /// Applies `f` to every item; results come back in input order.
    pub fn map<T, U, F>(&self, items: Vec<T>, f: F) -> Vec<U>
    where
        T: Send,
        U: Send,
        F: Fn(T) -> U + Sync + Send,
    {
        #[cfg(feature = "parallel")]
        {
            use rayon::prelude::*;
            self.pool.install(|| items.into_par_iter().map(f).collect())
        }
        #[cfg(not(feature = "parallel"))]
        {
            items.into_iter().map(f).collect()
        }
    }
}

/// Snapshots of the `members` whose state passes `filter`.
pub(crate) fn snapshot_jobs<G: Genome>(
    members: &[Member<G>],
    filter: impl Fn(&CandidateState<G>) -> bool,
) -> Vec<Job<G>> {
    members
        .iter()
        .filter_map(|m| {
            let state = m.state();
            filter(&state).then(|| (m.key().clone(), state.clone()))
        })
        .collect()
}

/// Writes worker results back through the cache.
///
/// A member that did not come from `cache` is updated directly so the
/// population still observes its result.
pub(crate) fn reconcile<G: Genome>(cache: &mut ObjectCache<G>, members: &[Member<G>], results: Vec<Job<G>>) {
    let held: HashMap<&GeneticKey, &Member<G>> = members.iter().map(|m| (m.key(), m)).collect();
    for (key, state) in results {
        let updated = cache.update(&key, state);
        if let Some(member) = held.get(&key) {
            if !Arc::ptr_eq(member, &updated) {
                member.replace_state(updated.snapshot());
            }
        }
    }
}

/// Runs the problem's optimization over not-yet-optimized candidates.
pub struct Optimizer<'a, P> {
    problem: &'a Arc<P>,
    descriptor: &'a FunctionDescriptor,
    timeout: Option<Duration>,
    failed_fitness: f64,
}

impl<'a, P: EvolutionProblem> Optimizer<'a, P> {
    pub fn new(
        problem: &'a Arc<P>,
        descriptor: &'a FunctionDescriptor,
        timeout: Option<Duration>,
        failed_fitness: f64,
    ) -> Self {
        Self {
            problem,
            descriptor,
            timeout,
            failed_fitness,
        }
    }

    /// Optimizes every distinct member that is neither optimized nor failed.
    ///
    /// A candidate whose optimization errors, or overruns the timeout, keeps
    /// its previous genome, is marked failed and gets the sentinel fitness.
    /// An overrunning call is abandoned at the timeout so the stage goes on
    /// without it. Returns the number of failures.
    pub fn optimize(
        &self,
        population: &Population<P::Genome>,
        cache: &mut ObjectCache<P::Genome>,
        pool: &WorkerPool,
    ) -> usize {
        let members = population.unique_members();
        let jobs = snapshot_jobs(&members, |s| !s.optimized && !s.failed);
        if jobs.is_empty() {
            return 0;
        }
        let submitted = jobs.len();

        let results = pool.map(jobs, |(key, mut state)| {
            let outcome = match self.timeout {
                Some(limit) => self.optimize_within(state.genome.clone(), limit),
                None => {
                    let mut genome = state.genome.clone();
                    self.problem.optimize(&mut genome, self.descriptor).map(|()| genome)
                }
            };
            match outcome {
                Ok(genome) => {
                    state.genome = genome;
                    state.optimized = true;
                }
                Err(e) => {
                    let failure = CandidateFailure::new(Stage::Optimize, self.descriptor.to_string(), e.to_string());
                    state.record_failure(failure, Some(self.failed_fitness));
                }
            }
            (key, state)
        });

        let mut failures = 0;
        for (key, state) in &results {
            if let Some(failure) = state.failures.last().filter(|_| state.failed) {
                failures += 1;
                warn!("{key}: {failure}");
            }
        }
        reconcile(cache, &members, results);
        debug!("optimize: {submitted} candidates, {failures} failed");
        failures
    }

    /// Runs one optimization on a detached thread and waits at most `limit`.
    fn optimize_within(&self, mut genome: P::Genome, limit: Duration) -> Result<P::Genome> {
        let (tx, rx) = mpsc::channel();
        let problem = Arc::clone(self.problem);
        let descriptor = self.descriptor.clone();
        thread::Builder::new()
            .name("genpop-optimize".into())
            .spawn(move || {
                let outcome = problem.optimize(&mut genome, &descriptor).map(|()| genome);
                // The receiver is gone once the call has been abandoned.
                let _ = tx.send(outcome);
            })?;

        match rx.recv_timeout(limit) {
            Ok(outcome) => outcome,
            Err(RecvTimeoutError::Timeout) => Err(EvolutionError::Optimize(format!(
                "exceeded {}ms",
                limit.as_millis()
            ))),
            Err(RecvTimeoutError::Disconnected) => {
                Err(EvolutionError::Optimize("optimization thread panicked".into()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{word_population, Word, WordProblem};
    use std::sync::atomic::Ordering;
    use std::time::Instant;

    #[test]
    fn test_pool_map_preserves_order() {
        let pool = WorkerPool::new(4).unwrap();
        let out = pool.map((0..100).collect(), |x: i32| x * 2);
        assert_eq!(out, (0..100).map(|x| x * 2).collect::<Vec<_>>());
    }

    #[test]
    fn test_pool_has_at_least_one_thread() {
        assert_eq!(WorkerPool::new(0).unwrap().threads(), 1);
    }

    #[test]
    fn test_optimize_updates_in_place() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let pop = word_population(&mut cache, &["cba", "fed"]);
        let held = pop.get(0).unwrap().clone();
        let sort = FunctionDescriptor::new("sort");
        let pool = WorkerPool::new(2).unwrap();

        let failures = Optimizer::new(&problem, &sort, None, 1e-4).optimize(&pop, &mut cache, &pool);

        assert_eq!(failures, 0);
        assert!(held.is_optimized());
        assert_eq!(held.genome().letters, "abc");
        assert_eq!(cache.get(held.key()).unwrap().genome().letters, "abc");
    }

    #[test]
    fn test_optimize_skips_optimized_candidates() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let mut pop = word_population(&mut cache, &["ab", "cd"]);
        let sort = FunctionDescriptor::new("sort");
        let pool = WorkerPool::new(1).unwrap();
        let optimizer = Optimizer::new(&problem, &sort, None, 1e-4);

        optimizer.optimize(&pop, &mut cache, &pool);
        assert_eq!(problem.optimize_calls.load(Ordering::SeqCst), 2);

        pop.add_member(cache.intern(Word::new("ef")));
        // Duplicates are optimized once.
        pop.add_member(cache.intern(Word::new("fe")));
        optimizer.optimize(&pop, &mut cache, &pool);
        assert_eq!(problem.optimize_calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_optimize_failure_marks_candidate() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let pop = word_population(&mut cache, &["xyz", "ab"]);
        let sort = FunctionDescriptor::new("sort");
        let pool = WorkerPool::new(2).unwrap();

        let failures = Optimizer::new(&problem, &sort, None, 1e-4).optimize(&pop, &mut cache, &pool);

        assert_eq!(failures, 1);
        let bad = pop.get(0).unwrap();
        assert!(bad.is_failed());
        assert!(!bad.is_optimized());
        assert_eq!(bad.scalar_fitness(), Some(1e-4));
        assert_eq!(bad.failures()[0].stage, Stage::Optimize);
        assert_eq!(bad.genome().letters, "xyz", "failed copy is discarded");
        assert!(pop.get(1).unwrap().is_optimized(), "siblings are unaffected");
    }

    #[test]
    fn test_optimize_timeout_marks_candidate() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let pop = word_population(&mut cache, &["ab"]);
        let slow = FunctionDescriptor::new("slow");
        let pool = WorkerPool::new(1).unwrap();

        let optimizer = Optimizer::new(&problem, &slow, Some(Duration::from_millis(1)), 1e-4);
        assert_eq!(optimizer.optimize(&pop, &mut cache, &pool), 1);
        let member = pop.get(0).unwrap();
        assert!(member.is_failed());
        assert!(member.failures()[0].message.contains("exceeded"));

        // Failed candidates are not retried.
        assert_eq!(optimizer.optimize(&pop, &mut cache, &pool), 0);
    }

    #[test]
    fn test_optimize_timeout_does_not_wait_for_hung_calls() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let pop = word_population(&mut cache, &["ab", "cd", "ef"]);
        let hang = FunctionDescriptor::new("hang");
        let pool = WorkerPool::new(2).unwrap();

        let started = Instant::now();
        let failures = Optimizer::new(&problem, &hang, Some(Duration::from_millis(20)), 1e-4)
            .optimize(&pop, &mut cache, &pool);

        assert_eq!(failures, 3);
        assert!(
            started.elapsed() < Duration::from_millis(1000),
            "stage took {:?}",
            started.elapsed()
        );
        assert!(pop.all_members().all(|m| m.is_failed() && !m.is_optimized()));
    }

    #[test]
    fn test_optimize_within_timeout_succeeds() {
        let problem = Arc::new(WordProblem::default());
        let mut cache = ObjectCache::new();
        let pop = word_population(&mut cache, &["ab"]);
        let slow = FunctionDescriptor::new("slow");
        let pool = WorkerPool::new(1).unwrap();

        let optimizer = Optimizer::new(&problem, &slow, Some(Duration::from_secs(5)), 1e-4);
        assert_eq!(optimizer.optimize(&pop, &mut cache, &pool), 0);
        assert!(pop.get(0).unwrap().is_optimized());
    }

    #[test]
    fn test_reconcile_updates_foreign_members() {
        let mut cache = ObjectCache::new();
        let foreign: Member<Word> = Arc::new(crate::candidate::Candidate::with_state(
            Word::new("ab").genetic_key(),
            CandidateState::new(Word::new("ab")),
        ));
        let mut state = foreign.snapshot();
        state.optimized = true;

        reconcile(&mut cache, &[foreign.clone()], vec![(foreign.key().clone(), state)]);
        assert!(foreign.is_optimized());
        assert!(cache.contains_key(foreign.key()));
    }
}
