//! Demo: parameter search on the simulated backend, then the statistic
//! circuits under both inverse-std policies.

use csv::Writer;
use hestat_core::{
    metric, optimize, CkksParams, Engine, InvStdPolicy, OptimizerConfig, Policy, SimBackend,
    StatCircuits,
};
use rand::{rngs::StdRng, SeedableRng};
use std::error::Error;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

const BOUND: f64 = 100.0;
const SAMPLES: usize = 1000;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let params = CkksParams::default();
    println!(
        "Parameters: slots = {}, max level = {}, log scale = {}, bootstrapping = {}",
        params.slots(),
        params.max_level,
        params.log_scale,
        params.bootstrapping
    );
    let engine = Engine::new(SimBackend::new(params));

    // -------------- parameter search --------------
    let config = OptimizerConfig {
        degrees: 4..=7,
        max_iterations: 8,
        samples: 256,
        ..OptimizerConfig::default()
    };
    let start = Instant::now();
    let report = optimize(&engine, &config)?;
    println!(
        "Optimizer: {} trials in {:?}, {} levels in the table",
        report.trials.len(),
        start.elapsed(),
        report.table.levels().count()
    );

    let mut wtr = Writer::from_path("optimizer_trials.csv")?;
    wtr.write_record(["level", "degree", "case", "iteration", "mre", "time_s"])?;
    for trial in &report.trials {
        for (i, (mre, time)) in trial.mre.iter().zip(&trial.time_seconds).enumerate() {
            wtr.write_record(&[
                trial.level.to_string(),
                trial.degree.to_string(),
                u8::from(trial.pre_bootstrap).to_string(),
                (i + 1).to_string(),
                format!("{mre:.6e}"),
                format!("{time:.6}"),
            ])?;
        }
    }
    wtr.flush()?;
    report.table.save("parameter_table.json")?;
    println!("Wrote optimizer_trials.csv and parameter_table.json");

    // -------------- statistics --------------
    let mut rng = StdRng::seed_from_u64(7);
    let xs = metric::uniform_data(&mut rng, SAMPLES, BOUND);
    let ys: Vec<f64> = xs
        .iter()
        .zip(metric::uniform_data(&mut rng, SAMPLES, BOUND / 4.0))
        .map(|(x, e)| 0.6 * x + e)
        .collect();
    let x = engine.encrypt_fresh(&xs)?;
    let y = engine.encrypt_fresh(&ys)?;

    let want_z = metric::z_score_norm(&xs);
    let want_skew = metric::skewness(&xs);
    let want_kurt = metric::kurtosis(&xs);
    let want_corr = metric::correlation(&xs, &ys)?;

    let policies = [
        ("fixed", InvStdPolicy::Fixed),
        (
            "adaptive/basic",
            InvStdPolicy::Adaptive {
                table: &report.table,
                policy: Policy::Basic,
            },
        ),
        (
            "adaptive/fast",
            InvStdPolicy::Adaptive {
                table: &report.table,
                policy: Policy::Fast,
            },
        ),
    ];

    for (name, policy) in policies {
        let stats = StatCircuits::new(&engine, BOUND, policy)?;
        let start = Instant::now();
        let result = (|| -> hestat_core::Result<(Vec<f64>, f64, f64, f64)> {
            let z = engine.decrypt(&stats.z_score_norm(&x)?)?;
            let skew = engine.decrypt(&stats.skewness(&x)?)?[0];
            let kurt = engine.decrypt(&stats.kurtosis(&x)?)?[0];
            let corr = engine.decrypt(&stats.pearson_correlation(&x, &y)?)?[0];
            Ok((z, skew, kurt, corr))
        })();
        match result {
            Ok((z, skew, kurt, corr)) => {
                println!("\n[{name}] {:?}", start.elapsed());
                println!("  z-score   mae = {:.3e}", metric::mae(&z, &want_z));
                println!("  skewness  {skew:+.6} (ref {want_skew:+.6})");
                println!("  kurtosis  {kurt:+.6} (ref {want_kurt:+.6})");
                println!("  pearson   {corr:+.6} (ref {want_corr:+.6})");
            }
            Err(e) => println!("\n[{name}] failed: {e}"),
        }
    }

    println!(
        "\nBackend counters: {} bootstraps, {} rescales, {} rotations",
        engine.backend().bootstrap_count(),
        engine.backend().rescale_count(),
        engine.backend().rotation_count()
    );
    Ok(())
}
