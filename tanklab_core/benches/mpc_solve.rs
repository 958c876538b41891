use criterion::{BatchSize, Criterion, black_box, criterion_group, criterion_main};

use tanklab_config::{DEFAULT_K1, DEFAULT_K2};
use tanklab_core::{Controller, LagModel, Levels, LocalPredictor, MpcCfg, MpcController, PlantParams};

fn controller() -> MpcController {
    let cfg = MpcCfg {
        model: LagModel::from_linear(0.02, DEFAULT_K1, DEFAULT_K2, 0.87),
        ..MpcCfg::default()
    };
    match MpcController::new(cfg, 1.0) {
        Ok(c) => c,
        Err(e) => panic!("bench controller: {e}"),
    }
}

pub fn bench_cold_solve(c: &mut Criterion) {
    c.bench_function("mpc_solve_from_empty", |b| {
        b.iter_batched(
            || {
                let mut m = controller();
                m.prime(Levels::EMPTY);
                m
            },
            |mut m| black_box(m.solve(black_box(0.5), 0.0, 0.0)),
            BatchSize::SmallInput,
        )
    });
}

pub fn bench_tracking_solve(c: &mut Criterion) {
    // Mid-transient state: the solver has to work against active rate limits.
    c.bench_function("mpc_solve_tracking", |b| {
        b.iter_batched(
            || {
                let mut m = controller();
                m.prime(Levels::new(0.3, 0.2));
                m
            },
            |mut m| black_box(m.solve(black_box(0.5), 0.2, 0.5)),
            BatchSize::SmallInput,
        )
    });
}

pub fn bench_predictor_step(c: &mut Criterion) {
    let p = LocalPredictor::new(PlantParams::default());
    c.bench_function("predictor_one_interval", |b| {
        b.iter(|| black_box(p.step(black_box(Levels::new(0.2, 0.1)), 0.6, 1.0)))
    });
}

criterion_group!(
    benches,
    bench_cold_solve,
    bench_tracking_solve,
    bench_predictor_step
);
criterion_main!(benches);
