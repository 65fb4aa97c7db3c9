//! Benchmark for sealing blocks of transfers with varying conflict levels and sizes.

use block_sealer::{
    BlockParameters, ChainConfig, DevEngine, MemoryChain, RevmApplier, Sealer, SealerConfig,
    Workload, WorkloadConfig,
};
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

type BenchSealer = Sealer<MemoryChain, DevEngine, block_sealer::MemoryPool, RevmApplier>;

fn sealer(workload: &Workload) -> BenchSealer {
    let chain = MemoryChain::new(ChainConfig::default(), workload.genesis(), 30_000_000);
    let pool = workload.memory_pool().expect("workload transactions recover");
    Sealer::new(chain, DevEngine::new(), pool, RevmApplier::new(), SealerConfig::default())
}

fn params() -> BlockParameters {
    BlockParameters { timestamp: 12, gas_limit: 30_000_000, ..Default::default() }
}

/// Seals priority-only blocks with different conflict factors.
fn bench_conflict_levels(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal_block/conflict_levels");

    let conflict_factors = [0.0, 0.25, 0.5, 0.75, 1.0];
    let num_priority = 500;

    for &conflict_factor in &conflict_factors {
        let config = WorkloadConfig {
            num_accounts: 1000,
            num_priority,
            num_pool: 0,
            conflict_factor,
            ..Default::default()
        };

        // Pre-generate workload (including signing) outside the benchmark loop.
        let workload = Workload::generate(config);
        let sealer = sealer(&workload);

        group.throughput(Throughput::Elements(num_priority as u64));
        group.bench_with_input(
            BenchmarkId::new("priority", format!("conflict_{:.0}%", conflict_factor * 100.0)),
            &workload,
            |b, workload| {
                b.iter(|| {
                    let txs = black_box(workload.priority.clone());
                    let sealed = sealer.seal_block(&params(), txs, false, false);
                    sealed.map(|sealed| sealed.receipts.len())
                });
            },
        );
    }

    group.finish();
}

/// Seals blocks filled from pools of different sizes.
fn bench_pool_fill(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal_block/pool_fill");

    for &num_pool in &[100, 500, 1000] {
        let config =
            WorkloadConfig { num_accounts: 2000, num_priority: 0, num_pool, ..Default::default() };
        let workload = Workload::generate(config);
        let sealer = sealer(&workload);

        group.throughput(Throughput::Elements(num_pool as u64));
        group.bench_with_input(BenchmarkId::new("pool", num_pool), &num_pool, |b, _| {
            b.iter(|| {
                let sealed = sealer.seal_block(&params(), Vec::new(), true, false);
                sealed.map(|sealed| sealed.receipts.len())
            });
        });
    }

    group.finish();
}

/// Measures the cost of call tracing.
fn bench_tracing(c: &mut Criterion) {
    let mut group = c.benchmark_group("seal_block/tracing");

    let config =
        WorkloadConfig { num_accounts: 1000, num_priority: 500, num_pool: 0, ..Default::default() };
    let workload = Workload::generate(config);
    let sealer = sealer(&workload);

    for trace in [false, true] {
        group.throughput(Throughput::Elements(500));
        group.bench_with_input(BenchmarkId::new("trace", trace), &trace, |b, &trace| {
            b.iter(|| {
                sealer
                    .seal_block(&params(), workload.priority.clone(), false, trace)
                    .map(|sealed| sealed.receipts.len())
            });
        });
    }

    group.finish();
}

criterion_group!(benches, bench_conflict_levels, bench_pool_fill, bench_tracing);
criterion_main!(benches);
