use criterion::{black_box, criterion_group, criterion_main, Criterion};
use hestat_core::{
    metric, CkksParams, Engine, InvStdPolicy, NewtonMode, SimBackend, Solver, StatCircuits,
};

fn engine() -> Engine<SimBackend> {
    Engine::new(SimBackend::new(CkksParams::default()))
}

fn bench_arith(c: &mut Criterion) {
    let eng = engine();
    let data = metric::linspace(1.0, 100.0, 4000);
    let x = eng.encrypt_fresh(&data).unwrap();

    c.bench_function("sum 4000", |b| b.iter(|| eng.sum(black_box(&x)).unwrap()));
    c.bench_function("multiply 4000", |b| {
        b.iter(|| eng.multiply(black_box(&x), black_box(&x)).unwrap())
    });
}

fn bench_stats(c: &mut Criterion) {
    let eng = engine();
    let data = metric::linspace(1.0, 100.0, 1000);
    let x = eng.encrypt_fresh(&data).unwrap();
    let stats = StatCircuits::new(&eng, 100.0, InvStdPolicy::Fixed).unwrap();

    c.bench_function("z-score fixed 1000", |b| {
        b.iter(|| stats.z_score_norm(black_box(&x)).unwrap())
    });
}

fn bench_newton(c: &mut Criterion) {
    let eng = engine();
    let x = eng.encrypt_fresh(&[0.5, 1.0, 2.0, 4.0]).unwrap();
    let init = eng.encrypt_fresh(&[1.0, 0.8, 0.6, 0.4]).unwrap();
    let solver = Solver::new(&eng);

    c.bench_function("newton reciprocal x4", |b| {
        b.iter(|| {
            solver
                .newton(black_box(&x), black_box(&init), 8.0, 4, NewtonMode::Reciprocal)
                .unwrap()
        })
    });
}

criterion_group!(benches, bench_arith, bench_stats, bench_newton);
criterion_main!(benches);
