use criterion::criterion_group;
use criterion::criterion_main;
use criterion::BenchmarkId;
use criterion::Criterion;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use canopy::{CoverTreeBuilder, PointStore};

fn gaussian_cloud(count: usize, dim: usize, seed: u64) -> Vec<f32> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    (0..count * dim).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

fn knn_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("knn-search");
    group.significance_level(0.05).sample_size(30);

    let (count, dim) = (20_000, 16);
    let store = PointStore::from_ram(gaussian_cloud(count, dim, 42), dim).unwrap();
    let tree = CoverTreeBuilder::new()
        .with_scale_base(1.4)
        .with_leaf_cutoff(50)
        .build(store, None)
        .unwrap();

    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let queries: Vec<Vec<f32>> = (0..100)
        .map(|_| (0..dim).map(|_| rng.gen_range(-1.0..1.0)).collect())
        .collect();

    for k in [1, 10, 100] {
        group.bench_with_input(
            BenchmarkId::new(format!("{count}x{dim}"), k),
            &k,
            |b, &k| {
                b.iter(|| {
                    for query in &queries {
                        tree.knn(query, k).unwrap();
                    }
                })
            },
        );
    }
    group.finish();
}

fn tracker_push(c: &mut Criterion) {
    let mut group = c.benchmark_group("tracker-push");
    group.significance_level(0.05).sample_size(30);

    let (count, dim) = (20_000, 16);
    let store = PointStore::from_ram(gaussian_cloud(count, dim, 42), dim).unwrap();
    let tree = CoverTreeBuilder::new()
        .with_scale_base(1.4)
        .with_leaf_cutoff(50)
        .build(store, None)
        .unwrap();

    group.bench_function("window-1000", |b| {
        b.iter(|| {
            let mut tracker = tree.kl_div_dirichlet(1.0, 1.3, 1000);
            for pi in 0..1000 {
                tracker.push(tree.data_point(pi).unwrap()).unwrap();
            }
            tracker.stats()
        })
    });
    group.finish();
}

criterion_group!(benches, knn_search, tracker_push);
criterion_main!(benches);
