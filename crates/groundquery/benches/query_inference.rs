//! Benchmarks for query inference
//!
//! Measures, over a growing number of entities:
//! - ILP inference of a determiner over a conjunction
//! - dual decomposition of a conjunction
//! - building the linear program alone

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use groundquery::{and_truth_table, CombinatorNode, EnginePool, IlpInference};
use groundquery_tensor::{DiscreteVariable, VariableSet, WeightedRelationTable};
use std::hint::black_box;

/// Deterministic pseudo-random `(false, true)` weights.
fn weights(count: usize, seed: usize) -> Vec<(f64, f64)> {
    (0..count)
        .map(|i| {
            let x = ((i * 7919 + seed * 104_729) % 1000) as f64 / 100.0 - 5.0;
            (0.0, x)
        })
        .collect()
}

fn unary(name: &str, value_var: usize, weights: &[(f64, f64)]) -> CombinatorNode {
    let names: Vec<String> = (0..weights.len()).map(|i| format!("e{}", i)).collect();
    let table = WeightedRelationTable::from_boolean_weights(
        VariableSet::singleton(0, DiscreteVariable::new("entity", names)),
        value_var,
        weights,
    )
    .unwrap();
    CombinatorNode::predicate(name, table, false).unwrap()
}

fn conjunction(entities: usize) -> CombinatorNode {
    let tt = and_truth_table().unwrap();
    CombinatorNode::create_conjunction(
        &tt,
        unary("red", 2, &weights(entities, 1)),
        unary("round", 3, &weights(entities, 2)),
        0,
    )
    .unwrap()
}

fn bench_ilp_inference(c: &mut Criterion) {
    let mut group = c.benchmark_group("ilp_inference");
    let pool = EnginePool::new(1);

    for entities in [2, 4, 8, 16] {
        let tree = CombinatorNode::determiner(conjunction(entities), true).unwrap();
        group.throughput(Throughput::Elements(entities as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entities), &tree, |b, tree| {
            b.iter(|| black_box(tree.ilp_inference(&pool, false, true).unwrap()))
        });
    }

    group.finish();
}

fn bench_dual_decomposition(c: &mut Criterion) {
    let mut group = c.benchmark_group("dual_decomposition");

    for entities in [2, 4, 8, 16] {
        let tree = conjunction(entities);
        group.throughput(Throughput::Elements(entities as u64));
        group.bench_with_input(BenchmarkId::from_parameter(entities), &tree, |b, tree| {
            b.iter(|| black_box(tree.reparameterize_dual_decomposition(100).unwrap()))
        });
    }

    group.finish();
}

fn bench_build_program(c: &mut Criterion) {
    let mut group = c.benchmark_group("build_program");
    let inference = IlpInference::new();

    for entities in [8, 32, 128] {
        let tree = CombinatorNode::determiner(conjunction(entities), false).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(entities), &tree, |b, tree| {
            b.iter(|| black_box(inference.build_program(tree).unwrap()))
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ilp_inference,
    bench_dual_decomposition,
    bench_build_program
);
criterion_main!(benches);
