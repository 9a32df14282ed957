use criterion::{criterion_group, criterion_main, Criterion};
use glam::DMat3;
use rand::Rng;

use pcreg_linalg::{power, svd};

fn bench_svd3(c: &mut Criterion) {
    let mut rng = rand::rng();
    let a = DMat3::from_cols_array(&std::array::from_fn(|_| rng.random_range(-1e-3..1e-3)));

    c.bench_function("svd3", |b| b.iter(|| std::hint::black_box(svd::svd3(&a))));
}

fn bench_power_iteration(c: &mut Criterion) {
    let s = [
        0.00168053,
        0.000131408,
        -0.000775179,
        0.000156595,
        0.00102674,
        -0.000563479,
        -0.000722137,
        -0.000559463,
        0.00246661,
    ];

    c.bench_function("horn_quaternion", |b| {
        b.iter(|| {
            std::hint::black_box(power::horn_quaternion(
                &s,
                power::DEFAULT_MAX_ITERATIONS,
                power::DEFAULT_TOLERANCE,
            ))
        })
    });
}

criterion_group!(benches, bench_svd3, bench_power_iteration);
criterion_main!(benches);
