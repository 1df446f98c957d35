//! Criterion benchmarks for u-genpop.
//!
//! Uses a synthetic OneMax problem to measure engine overhead (caching,
//! selection, deduplication, worker dispatch) independent of any domain.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::Rng;
use std::sync::Arc;
use u_genpop::ga::{EvolutionProblem, MeanScaling, RunConfig, Selection};
use u_genpop::random::create_rng;
use u_genpop::{
    run_generations, EvolutionError, Fitness, FunctionDescriptor, GeneticKey, Genome, ObjectCache, Population,
    Result,
};

// ===========================================================================
// OneMax: maximize the number of set bits
// ===========================================================================

#[derive(Debug, Clone)]
struct Bits(Vec<bool>);

impl Genome for Bits {
    fn genetic_key(&self) -> GeneticKey {
        GeneticKey::new(self.0.iter().map(|&b| if b { '1' } else { '0' }).collect::<String>())
    }
}

struct OneMax {
    len: usize,
}

impl EvolutionProblem for OneMax {
    type Genome = Bits;

    fn build(&self, descriptor: &FunctionDescriptor) -> Result<Bits> {
        let seed = descriptor.usize_param("seed")?.unwrap_or(0) as u64;
        let mut rng = create_rng(seed);
        Ok(Bits((0..self.len).map(|_| rng.random_bool(0.3)).collect()))
    }

    fn crossover<R: Rng>(&self, p1: &Bits, p2: &Bits, _d: &FunctionDescriptor, rng: &mut R) -> Result<Vec<Bits>> {
        let point = rng.random_range(0..self.len);
        let mut child = p1.clone();
        child.0[point..].copy_from_slice(&p2.0[point..]);
        Ok(vec![child])
    }

    fn mutate<R: Rng>(&self, genome: &Bits, _d: &FunctionDescriptor, rng: &mut R) -> Result<Bits> {
        let mut mutant = genome.clone();
        let i = rng.random_range(0..self.len);
        mutant.0[i] = !mutant.0[i];
        Ok(mutant)
    }

    fn fitness(&self, genome: &Bits, descriptor: &FunctionDescriptor, _s: Option<MeanScaling<'_>>) -> Result<Fitness> {
        match descriptor.name.as_str() {
            "ones" => Ok(Fitness::Scalar(genome.0.iter().filter(|&&b| b).count() as f64 + 1.0)),
            other => Err(EvolutionError::UnknownFunction {
                kind: "fitness",
                name: other.to_string(),
            }),
        }
    }
}

fn initial(problem: &OneMax, cache: &mut ObjectCache<Bits>, size: usize) -> Population<Bits> {
    let descriptors: Vec<FunctionDescriptor> = (0..size)
        .map(|i| FunctionDescriptor::new("random").with_param("seed", i))
        .collect();
    Population::build(problem, &descriptors, cache)
}

fn config(size: usize) -> RunConfig {
    RunConfig::default()
        .with_target_size(size)
        .with_fitness(FunctionDescriptor::new("ones"))
        .with_num_crossovers(size / 2)
        .with_num_mutations(size / 4)
        .with_seed(42)
}

// ===========================================================================
// Benchmarks
// ===========================================================================

fn bench_run_onemax(c: &mut Criterion) {
    let mut group = c.benchmark_group("run_onemax");
    group.sample_size(10);

    for size in [20, 50, 100] {
        let problem = Arc::new(OneMax { len: 64 });
        let config = config(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &(problem, config), |b, (p, c)| {
            b.iter(|| {
                let mut cache = ObjectCache::new();
                let start = initial(p, &mut cache, c.target_size);
                black_box(run_generations(p, &mut cache, start, 10, c).ok());
            });
        });
    }
    group.finish();
}

fn bench_selection(c: &mut Criterion) {
    let mut group = c.benchmark_group("selection");

    let problem = OneMax { len: 64 };
    let mut cache = ObjectCache::new();
    let population = initial(&problem, &mut cache, 200);
    for member in &population {
        let ones = member.genome().0.iter().filter(|&&b| b).count();
        member.set_raw_fitness(ones as f64 + 1.0);
    }

    let policies = [
        ("fittest", Selection::Fittest),
        (
            "roulette",
            Selection::Roulette {
                elitism: Some(2),
                truncation: None,
                allow_repeats: false,
            },
        ),
        ("pair_roulette", Selection::PairRoulette { truncation: None }),
    ];
    for (name, policy) in policies {
        group.bench_function(name, |b| {
            let mut rng = create_rng(7);
            b.iter(|| {
                if policy.yields_pairs() {
                    let pairs = policy.select_pairs(&population, &mut rng).map(|s| s.take(50).count());
                    black_box(pairs.ok());
                } else {
                    let picked = policy.select(&population, &mut rng).map(|s| s.take(50).count());
                    black_box(picked.ok());
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_run_onemax, bench_selection);
criterion_main!(benches);
