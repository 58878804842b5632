//! Offline search for the per-level solver parameters of the adaptive policy.
//!
//! For every level and degree exponent a trial runs the Newton loop on a
//! synthetic vector and records the error and elapsed time after each step.
//! Selection over the recorded trials is a pure function, so it can be
//! re-run on stored measurements.

use crate::{
    backend::Backend,
    engine::Engine,
    error::{Result, StatError, StepContext as _},
    metric,
    solver::{ChebyshevMode, NewtonMode, Solver, MAX_DEGREE_EXPONENT, MIN_DEGREE_EXPONENT},
    table::{ParameterEntry, ParameterTable, Policy, PreBootstrap},
};
use rayon::prelude::*;
use std::ops::RangeInclusive;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Refresh threshold for `y` during trials and when replaying their parameters.
pub const TRIAL_REFRESH_THRESHOLD: usize = 4;

/// Search space.
#[derive(Clone, Debug, PartialEq)]
pub struct OptimizerConfig {
    /// Degree exponents `d` to try
    pub degrees: RangeInclusive<u32>,
    /// Newton steps per trial
    pub max_iterations: usize,
    /// Lower end of the test range
    pub start: f64,
    /// Boundary between the two evenly sampled sub-ranges
    pub middle: f64,
    /// Upper end of the test range; also the bound `B`
    pub stop: f64,
    /// Length of the synthetic vector, split evenly between the two sub-ranges
    pub samples: usize,
    /// Slack of the per-level accuracy band
    pub theta: f64,
    /// Slack of the per-trial accuracy band
    pub delta: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            degrees: 4..=9,
            max_iterations: 15,
            start: 0.001,
            middle: 1.0,
            stop: 100.0,
            samples: 1024,
            theta: 1.0,
            delta: 1.0,
        }
    }
}

impl OptimizerConfig {
    fn validate(&self) -> Result<()> {
        let (lo, hi) = (*self.degrees.start(), *self.degrees.end());
        if lo > hi || lo < MIN_DEGREE_EXPONENT || hi > MAX_DEGREE_EXPONENT {
            return Err(StatError::InvalidInput(format!(
                "degree exponents {lo}..={hi} outside {MIN_DEGREE_EXPONENT}..={MAX_DEGREE_EXPONENT}"
            )));
        }
        if self.max_iterations == 0 {
            return Err(StatError::InvalidInput("max_iterations must be positive".into()));
        }
        if !(0.0 < self.start && self.start < self.middle && self.middle < self.stop) {
            return Err(StatError::InvalidInput(format!(
                "need 0 < start < middle < stop, got {} / {} / {}",
                self.start, self.middle, self.stop
            )));
        }
        if self.samples < 4 {
            return Err(StatError::InvalidInput("samples must be at least 4".into()));
        }
        Ok(())
    }

    /// Synthetic input and its `1/sqrt` ground truth.
    pub fn synthetic_input(&self) -> (Vec<f64>, Vec<f64>) {
        let half = self.samples / 2;
        let mut values = metric::linspace(self.start, self.middle, half);
        values.extend(metric::linspace(self.middle, self.stop, half));
        let truth = values.iter().map(|v| 1.0 / v.sqrt()).collect();
        (values, truth)
    }
}

/// Per-iteration measurements of one (level, degree, case) run.
#[derive(Clone, Debug, PartialEq)]
pub struct Trial {
    /// Input level
    pub level: usize,
    /// Degree exponent of the initial guess
    pub degree: u32,
    /// Whether the input was bootstrapped first
    pub pre_bootstrap: PreBootstrap,
    /// `mre[i]` after `i + 1` Newton steps
    pub mre: Vec<f64>,
    /// Wall-clock seconds from the start of the trial to each `mre[i]`
    pub time_seconds: Vec<f64>,
}

impl Trial {
    /// The earliest iteration within the trial's own band.
    pub fn pick(&self, delta: f64) -> Option<Candidate> {
        let i = earliest_within_band(&self.mre, delta)?;
        Some(Candidate {
            level: self.level,
            degree: self.degree,
            pre_bootstrap: self.pre_bootstrap,
            iterations: i + 1,
            mre: self.mre[i],
            time_seconds: self.time_seconds[i],
        })
    }
}

/// One configuration competing for a level's table entries.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Candidate {
    /// Input level
    pub level: usize,
    /// Degree exponent
    pub degree: u32,
    /// Pre-bootstrap case
    pub pre_bootstrap: PreBootstrap,
    /// Newton steps
    pub iterations: usize,
    /// Error after `iterations` steps
    pub mre: f64,
    /// Time after `iterations` steps
    pub time_seconds: f64,
}

impl Candidate {
    /// The table entry this candidate becomes when selected.
    pub fn to_entry(&self) -> ParameterEntry {
        ParameterEntry {
            pre_bootstrap: self.pre_bootstrap,
            degree: self.degree,
            iterations: self.iterations,
            time_seconds: self.time_seconds,
            mre: self.mre,
        }
    }
}

/// Result of [`optimize`].
#[derive(Clone, Debug)]
pub struct OptimizerReport {
    /// Selected entries per level
    pub table: ParameterTable,
    /// Sorted by level (descending), degree, then case
    pub trials: Vec<Trial>,
}

/// `(⌊mantissa(min)⌋ + slack) · 10^exponent(min)` in base 10. Zero stays zero.
pub fn tolerance_band(min: f64, slack: f64) -> f64 {
    if min <= 0.0 {
        return 0.0;
    }
    let exponent = min.log10().floor();
    let unit = 10f64.powf(exponent);
    ((min / unit).floor() + slack) * unit
}

/// Index of the first finite error within the band around the smallest finite error.
pub fn earliest_within_band(mre: &[f64], delta: f64) -> Option<usize> {
    let min = mre
        .iter()
        .copied()
        .filter(|m| m.is_finite())
        .min_by(f64::total_cmp)?;
    let band = tolerance_band(min, delta);
    mre.iter().position(|m| m.is_finite() && *m <= band)
}

/// Basic: fastest within the θ-band of the level's best error.
/// Fast: fastest overall. Redundant or dominated picks are dropped.
pub fn select_level_entries(candidates: &[Candidate], theta: f64) -> Vec<(Policy, Candidate)> {
    let Some(min) = candidates.iter().map(|c| c.mre).min_by(f64::total_cmp) else {
        return Vec::new();
    };
    let band = tolerance_band(min, theta);
    let by_time = |a: &&Candidate, b: &&Candidate| a.time_seconds.total_cmp(&b.time_seconds);
    let basic = candidates.iter().filter(|c| c.mre <= band).min_by(by_time);
    let fast = candidates.iter().min_by(by_time);

    match (basic, fast) {
        (Some(b), Some(f)) if b.time_seconds <= f.time_seconds => vec![(Policy::Basic, *b)],
        (Some(b), Some(f)) if b.mre >= f.mre => vec![(Policy::Fast, *f)],
        (Some(b), Some(f)) => vec![(Policy::Basic, *b), (Policy::Fast, *f)],
        (None, Some(f)) => vec![(Policy::Fast, *f)],
        _ => Vec::new(),
    }
}

fn is_depth_failure(err: &StatError) -> bool {
    matches!(
        err.root_cause(),
        StatError::InsufficientDepth { .. } | StatError::BootstrapUnsupported
    )
}

struct TrialInput<'a> {
    values: &'a [f64],
    truth: &'a [f64],
    bound: f64,
    max_iterations: usize,
}

fn run_trial<B: Backend>(
    engine: &Engine<B>,
    input: &TrialInput<'_>,
    level: usize,
    degree: u32,
    pre_bootstrap: PreBootstrap,
) -> Result<Option<Trial>> {
    let b = input.bound;
    let mut base = engine.encrypt(input.values, level)?;
    let start = Instant::now();

    if pre_bootstrap.required() {
        base = engine.multiply_constant(&base, 1.0 / b).step("pre-bootstrap scale")?;
        base = engine.do_bootstrap(&base, engine.max_level()).step("pre-bootstrap")?;
        base = engine.multiply_constant(&base, b).step("pre-bootstrap scale")?;
    }
    let prescaled = engine.multiply_constant(&base, 2.0 / b).step("prescale")?;
    let value = engine.multiply_constant(&base, 0.5).step("prescale")?;

    let solver = Solver::new(engine).with_refresh_threshold(TRIAL_REFRESH_THRESHOLD);
    let init = solver
        .chebyshev_inverse_sqrt(&prescaled, ChebyshevMode::HalfBound, b, degree)
        .step("chebyshev")?;

    let mut mre = Vec::with_capacity(input.max_iterations);
    let mut time_seconds = Vec::with_capacity(input.max_iterations);
    let steps = solver.newton_iterations(&value, &init, b, NewtonMode::InverseSqrt)?;
    for step in steps.take(input.max_iterations) {
        let y = match step {
            Ok(y) => y,
            // out of depth: keep what was measured so far
            Err(e) if is_depth_failure(&e) && !mre.is_empty() => break,
            Err(e) => return Err(e),
        };
        let elapsed = start.elapsed().as_secs_f64();
        let decrypted = engine.decrypt(&y)?;
        mre.push(metric::mre(&decrypted, input.truth));
        time_seconds.push(elapsed);
    }
    debug!(level, degree, ?pre_bootstrap, iterations = mre.len(), "trial finished");
    Ok(Some(Trial {
        level,
        degree,
        pre_bootstrap,
        mre,
        time_seconds,
    }))
}

/// Per-level Basic/Fast entries from recorded trials.
///
/// Depends only on the measurements, so a stored set of trials always
/// reproduces the same table.
pub fn select_table(trials: &[Trial], config: &OptimizerConfig) -> ParameterTable {
    let mut levels: Vec<usize> = trials.iter().map(|t| t.level).collect();
    levels.sort_unstable_by(|a, b| b.cmp(a));
    levels.dedup();

    let mut table = ParameterTable::new();
    for level in levels {
        let candidates: Vec<Candidate> = trials
            .iter()
            .filter(|t| t.level == level)
            .filter_map(|t| {
                let pick = t.pick(config.delta);
                if pick.is_none() {
                    warn!(level, degree = t.degree, "trial without a finite error");
                }
                pick
            })
            .collect();
        for (policy, c) in select_level_entries(&candidates, config.theta) {
            info!(
                level,
                ?policy,
                degree = c.degree,
                iterations = c.iterations,
                pre_bootstrap = c.pre_bootstrap.required(),
                mre = c.mre,
                time = c.time_seconds,
                "selected"
            );
            table.insert(level, policy, c.to_entry());
        }
    }
    table
}

/// Runs every trial in parallel and selects the table entries per level.
pub fn optimize<B: Backend>(engine: &Engine<B>, config: &OptimizerConfig) -> Result<OptimizerReport> {
    config.validate()?;
    let (values, truth) = config.synthetic_input();
    let input = TrialInput {
        values: &values,
        truth: &truth,
        bound: config.stop,
        max_iterations: config.max_iterations,
    };

    let max_level = engine.max_level();
    let mut tasks = Vec::new();
    for level in (1..=max_level).rev() {
        for degree in config.degrees.clone() {
            if level >= 3 {
                tasks.push((level, degree, PreBootstrap::No));
            }
            if level + 2 <= max_level && engine.can_bootstrap() {
                tasks.push((level, degree, PreBootstrap::Yes));
            }
        }
    }
    info!(tasks = tasks.len(), max_level, "starting parameter search");

    let results = tasks
        .par_iter()
        .map(|&(level, degree, case)| {
            match run_trial(engine, &input, level, degree, case) {
                Err(e) if is_depth_failure(&e) => {
                    warn!(level, degree, ?case, error = %e, "trial discarded");
                    Ok(None)
                }
                other => other,
            }
        })
        .collect::<Result<Vec<_>>>()?;

    let mut trials: Vec<Trial> = results.into_iter().flatten().collect();
    trials.sort_by(|a, b| {
        b.level
            .cmp(&a.level)
            .then(a.degree.cmp(&b.degree))
            .then(u8::from(a.pre_bootstrap).cmp(&u8::from(b.pre_bootstrap)))
    });

    let table = select_table(&trials, config);
    Ok(OptimizerReport { table, trials })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{params::CkksParams, sim::SimBackend};

    fn candidate(degree: u32, mre: f64, time_seconds: f64) -> Candidate {
        Candidate {
            level: 5,
            degree,
            pre_bootstrap: PreBootstrap::No,
            iterations: 3,
            mre,
            time_seconds,
        }
    }

    #[test]
    fn test_tolerance_band() {
        assert!((tolerance_band(0.0123, 1.0) - 0.02).abs() < 1e-15);
        assert!((tolerance_band(5.3e-4, 1.0) - 6e-4).abs() < 1e-15);
        assert!((tolerance_band(7.0, 0.5) - 7.5).abs() < 1e-12);
        assert_eq!(tolerance_band(0.0, 1.0), 0.0);
    }

    #[test]
    fn test_earliest_within_band() {
        assert_eq!(earliest_within_band(&[0.5, 0.02, 0.013, 0.0121, 0.0125], 1.0), Some(1));
        assert_eq!(
            earliest_within_band(&[f64::NAN, f64::INFINITY, 0.3, 0.25], 1.0),
            Some(2)
        );
        assert_eq!(earliest_within_band(&[0.3, 0.0, 0.1], 1.0), Some(1));
        assert_eq!(earliest_within_band(&[f64::NAN], 1.0), None);
        assert_eq!(earliest_within_band(&[], 1.0), None);
    }

    #[test]
    fn test_select_basic_and_fast() {
        let cands = [
            candidate(4, 0.05, 0.5),
            candidate(5, 0.0012, 2.0),
            candidate(6, 0.0015, 1.5),
            candidate(7, 0.0011, 3.0),
        ];
        let picked = select_level_entries(&cands, 1.0);
        assert_eq!(picked.len(), 2);
        assert_eq!(picked[0].0, Policy::Basic);
        assert_eq!(picked[0].1.degree, 6);
        assert_eq!(picked[1].0, Policy::Fast);
        assert_eq!(picked[1].1.degree, 4);
    }

    #[test]
    fn test_select_drops_redundant_picks() {
        // fastest is also the most accurate: Fast is redundant
        let cands = [candidate(4, 0.001, 0.5), candidate(5, 0.002, 1.0)];
        let picked = select_level_entries(&cands, 1.0);
        assert_eq!(picked, vec![(Policy::Basic, cands[0])]);

        let cands = [candidate(4, 0.0015, 0.5), candidate(5, 0.0011, 1.0), candidate(6, 0.0015, 0.4)];
        let picked = select_level_entries(&cands, 0.0);
        // band is 0.001: nothing qualifies, only Fast survives
        assert_eq!(picked, vec![(Policy::Fast, cands[2])]);

        assert!(select_level_entries(&[], 1.0).is_empty());
    }

    fn small_config() -> OptimizerConfig {
        OptimizerConfig {
            degrees: 3..=4,
            max_iterations: 4,
            start: 0.05,
            middle: 1.0,
            stop: 16.0,
            samples: 16,
            theta: 1.0,
            delta: 1.0,
        }
    }

    #[test]
    fn test_optimize_selection_is_monotone() {
        let params = CkksParams::new(4, 7, 40).unwrap().with_bootstrapping();
        let eng = Engine::new(SimBackend::new(params));
        let config = small_config();
        let report = optimize(&eng, &config).unwrap();
        assert!(!report.table.is_empty());

        for level in report.table.levels() {
            assert!((1..=7).contains(&level));
            let candidates: Vec<Candidate> = report
                .trials
                .iter()
                .filter(|t| t.level == level)
                .filter_map(|t| t.pick(config.delta))
                .collect();
            let min = candidates.iter().map(|c| c.mre).fold(f64::INFINITY, f64::min);
            let band = tolerance_band(min, config.theta);

            for (policy, entry) in report.table.entries(level) {
                assert!(config.degrees.contains(&entry.degree));
                assert!(entry.iterations >= 1 && entry.iterations <= config.max_iterations);
                match entry.pre_bootstrap {
                    PreBootstrap::No => assert!(level >= 3),
                    PreBootstrap::Yes => assert!(level <= 5),
                }
                match policy {
                    Policy::Basic => {
                        assert!(entry.mre <= band);
                        assert!(candidates
                            .iter()
                            .filter(|c| c.mre <= band)
                            .all(|c| entry.time_seconds <= c.time_seconds));
                    }
                    Policy::Fast => {
                        assert!(candidates.iter().all(|c| entry.time_seconds <= c.time_seconds));
                    }
                }
            }
        }
    }

    #[test]
    fn test_optimize_without_bootstrapping() {
        let params = CkksParams::new(4, 7, 40).unwrap();
        let eng = Engine::new(SimBackend::new(params));
        let report = optimize(&eng, &small_config()).unwrap();
        assert!(report
            .trials
            .iter()
            .all(|t| t.pre_bootstrap == PreBootstrap::No && t.level >= 3));
        // level 7, d = 3: a single Newton step fits before the depth runs out
        let deep = report
            .trials
            .iter()
            .find(|t| t.level == 7 && t.degree == 3)
            .unwrap();
        assert_eq!(deep.mre.len(), 1);
        assert!(deep.mre[0].is_finite());
        assert!(report.table.lookup(7, Policy::Basic).is_ok());
    }

    #[test]
    fn test_noisy_search_is_reproducible() {
        let params = CkksParams::new(4, 7, 40)
            .unwrap()
            .with_bootstrapping()
            .with_noise(1e-9, 11)
            .unwrap();
        let config = small_config();
        let run = || optimize(&Engine::new(SimBackend::new(params.clone())), &config).unwrap();
        let (first, second) = (run(), run());

        assert_eq!(first.trials.len(), second.trials.len());
        for (a, b) in first.trials.iter().zip(&second.trials) {
            assert_eq!(
                (a.level, a.degree, a.pre_bootstrap),
                (b.level, b.degree, b.pre_bootstrap)
            );
            assert_eq!(a.mre, b.mre, "level {} degree {}", a.level, a.degree);
            assert_eq!(
                a.pick(config.delta).map(|c| c.iterations),
                b.pick(config.delta).map(|c| c.iterations)
            );
        }
        // noise perturbs the errors, the wall clock is the only other input
        assert!(first.trials.iter().flat_map(|t| &t.mre).all(|m| *m > 0.0));

        let replayed: Vec<Trial> = second
            .trials
            .iter()
            .zip(&first.trials)
            .map(|(b, a)| Trial {
                time_seconds: a.time_seconds.clone(),
                ..b.clone()
            })
            .collect();
        assert_eq!(select_table(&replayed, &config), first.table);
        assert_eq!(select_table(&first.trials, &config), first.table);
    }

    #[test]
    fn test_invalid_config() {
        let eng = Engine::new(SimBackend::new(CkksParams::new(4, 7, 40).unwrap()));
        let mut config = small_config();
        config.degrees = 1..=4;
        assert!(optimize(&eng, &config).is_err());
        let mut config = small_config();
        config.middle = 20.0;
        assert!(optimize(&eng, &config).is_err());
    }
}
