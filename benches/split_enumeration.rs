//! Benchmark: robust split enumeration over synthetic columns.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};

use robustboost::data::CscMatrix;
use robustboost::training::{create_updater, GradientPair};
use robustboost::tree::RegTree;

/// Deterministic pseudo-random values without pulling a rng into the bench.
fn synth_values(n: usize, salt: u64) -> Vec<f32> {
    (0..n)
        .map(|i| {
            let x = (i as u64).wrapping_mul(6364136223846793005).wrapping_add(salt);
            ((x >> 33) % 10_000) as f32 / 100.0
        })
        .collect()
}

fn bench_tree_growth(c: &mut Criterion) {
    let mut group = c.benchmark_group("tree_growth");

    for &(rows, cols) in &[(1_000usize, 8usize), (10_000, 8)] {
        let values = synth_values(rows * cols, 17);
        let matrix = CscMatrix::from_column_major(&values, rows, cols);
        let gpair: Vec<GradientPair> = synth_values(rows, 41)
            .iter()
            .map(|&v| GradientPair::new(if v > 50.0 { 1.0 } else { -1.0 }, 1.0))
            .collect();

        for &eps in &["0.0", "0.5"] {
            group.bench_with_input(
                BenchmarkId::new(format!("{}x{}", rows, cols), eps),
                &eps,
                |b, &eps| {
                    b.iter(|| {
                        let mut updater = create_updater("robust_grow_colmaker").unwrap();
                        updater
                            .init(&[
                                ("robust_eps".to_string(), eps.to_string()),
                                ("max_depth".to_string(), "4".to_string()),
                            ])
                            .unwrap();
                        let mut trees = vec![RegTree::new()];
                        updater.update(&gpair, &matrix, &mut trees).unwrap();
                        trees
                    });
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_tree_growth);
criterion_main!(benches);
