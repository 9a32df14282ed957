use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use glam::DVec3;

use pcreg_compute::Device;
use pcreg_icp::{synthetic, IcpConfig, Registration, RotationStrategy, Weighting};
use pcreg_linalg::transforms::axis_angle_to_quaternion;

fn bench_step(c: &mut Criterion) {
    let mut group = c.benchmark_group("registration_step");
    let fixed = synthetic::surface(640, 480);
    let moving = synthetic::displaced(&fixed, axis_angle_to_quaternion(DVec3::ONE, 10.0), DVec3::X * 5.0);

    let variants = [
        ("closed_form", RotationStrategy::ClosedForm, Weighting::None),
        ("closed_form_weighted", RotationStrategy::ClosedForm, Weighting::RobustInverseDistance),
        ("power_iteration", RotationStrategy::PowerIteration, Weighting::None),
        ("power_iteration_weighted", RotationStrategy::PowerIteration, Weighting::RobustInverseDistance),
    ];
    for (name, rotation_strategy, weighting) in variants {
        let config = IcpConfig {
            rotation_strategy,
            weighting,
            index_scale_alpha: 1e10,
            ..Default::default()
        };
        let mut session = Registration::new(config, Device::cpu(), 640, 480).expect("session");
        session.load_fixed(&fixed).expect("fixed");
        session.load_moving(&moving).expect("moving");
        session.build_index().expect("index");
        session.step(true).expect("first step");

        group.bench_with_input(BenchmarkId::new(name, "640x480"), &(), |b, _| {
            b.iter(|| std::hint::black_box(session.step(false).expect("step")))
        });
    }
    group.finish();
}

fn bench_run(c: &mut Criterion) {
    let fixed = synthetic::surface(640, 480);
    let moving = synthetic::displaced(&fixed, axis_angle_to_quaternion(DVec3::ONE, 10.0), DVec3::X * 5.0);
    let config = IcpConfig {
        index_scale_alpha: 1e10,
        ..Default::default()
    };
    let mut session = Registration::new(config, Device::cpu(), 640, 480).expect("session");
    session.load_fixed(&fixed).expect("fixed");

    c.bench_function("registration_run", |b| {
        b.iter(|| {
            session.load_moving(&moving).expect("moving");
            std::hint::black_box(session.run().expect("run"))
        })
    });
}

criterion_group!(benches, bench_step, bench_run);
criterion_main!(benches);
