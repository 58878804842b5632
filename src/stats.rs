//! Statistic circuits over encrypted vectors.
//!
//! Every statistic that needs `1/σ` obtains it from the solver under one of
//! two policies: a fixed schedule, or per-level parameters looked up in a
//! [`ParameterTable`] produced by the optimizer.

use crate::{
    backend::Backend,
    engine::{Engine, Vector},
    error::{Result, StatError, StepContext as _},
    optimizer::TRIAL_REFRESH_THRESHOLD,
    solver::{ChebyshevMode, NewtonMode, Solver},
    table::{ParameterTable, Policy},
};
use std::f64::consts::SQRT_2;
use tracing::debug;

/// Level the σ²/B² operand is refreshed to before the fixed-schedule guess.
pub const FIXED_VARIANCE_LEVEL: usize = 9;
/// Degree exponent of the fixed-schedule guess.
pub const FIXED_DEGREE: u32 = 9;
/// Level the fixed-schedule initial guess is refreshed to before Newton.
pub const FIXED_GUESS_LEVEL: usize = 3;
/// Newton steps of the fixed schedule.
pub const FIXED_ITERATIONS: usize = 5;

/// How `1/σ` is scheduled.
#[derive(Clone, Copy, Debug)]
pub enum InvStdPolicy<'t> {
    /// Degree 2^9 − 2, five Newton steps, unconditional refreshes.
    Fixed,
    /// Degree, iteration count and pre-bootstrap flag from the table.
    Adaptive {
        /// Per-level schedule
        table: &'t ParameterTable,
        /// Preferred entry at each level
        policy: Policy,
    },
}

/// z-score, skewness, kurtosis and Pearson correlation on one engine.
pub struct StatCircuits<'a, 't, B: Backend> {
    engine: &'a Engine<B>,
    bound: f64,
    policy: InvStdPolicy<'t>,
}

impl<'a, 't, B: Backend> StatCircuits<'a, 't, B> {
    /// `bound` is an upper bound `B` on the magnitude of the data, so that σ²/B² < 1.
    pub fn new(engine: &'a Engine<B>, bound: f64, policy: InvStdPolicy<'t>) -> Result<Self> {
        if !(bound.is_finite() && bound > 0.0) {
            return Err(StatError::InvalidInput(format!(
                "bound must be positive and finite, got {bound}"
            )));
        }
        Ok(Self {
            engine,
            bound,
            policy,
        })
    }

    /// How `1/σ` is scheduled.
    pub fn policy(&self) -> InvStdPolicy<'t> {
        self.policy
    }

    /// Single-block `1/σ(x)`.
    pub fn inverse_std(&self, x: &Vector<B>) -> Result<Vector<B>> {
        match self.policy {
            InvStdPolicy::Fixed => self.fixed_inverse_std(x),
            InvStdPolicy::Adaptive { table, policy } => self.adaptive_inverse_std(x, table, policy),
        }
    }

    fn fixed_inverse_std(&self, x: &Vector<B>) -> Result<Vector<B>> {
        let eng = self.engine;
        let n = x.size as f64;
        let b = self.bound;
        debug!(level = x.level, size = x.size, "inverse std, fixed schedule");

        let approx = eng
            .scaled_variance(x, n * b, n * b * b)
            .step("variance (approx)")?;
        let mut approx = eng.select_representative(&approx)?;
        if eng.can_bootstrap() {
            approx = eng
                .do_bootstrap(&approx, FIXED_VARIANCE_LEVEL)
                .step("bootstrap (variance)")?;
        }

        let solver = Solver::new(eng);
        let mut init = solver
            .chebyshev_inverse_sqrt(&approx, ChebyshevMode::Bound, b * b, FIXED_DEGREE)
            .step("chebyshev")?;
        if eng.can_bootstrap() {
            init = eng
                .do_bootstrap(&init, FIXED_GUESS_LEVEL)
                .step("bootstrap (initial guess)")?;
        }

        let refined = eng
            .scaled_variance(x, n * SQRT_2, 2.0 * n)
            .step("variance (refined)")?;
        let refined = eng.select_representative(&refined)?;
        solver
            .newton(&refined, &init, b, FIXED_ITERATIONS, NewtonMode::InverseSqrt)
            .step("newton")
    }

    fn adaptive_inverse_std(
        &self,
        x: &Vector<B>,
        table: &ParameterTable,
        policy: Policy,
    ) -> Result<Vector<B>> {
        let eng = self.engine;
        let n = x.size as f64;
        let b = self.bound;

        // the halving pre-multiply costs one level
        let key = x.level.checked_sub(1).ok_or(StatError::InsufficientDepth {
            level: x.level,
            required: 1,
        })?;
        let entry = *table.lookup(key, policy).step("parameter lookup")?;
        debug!(
            level = x.level,
            degree = entry.degree,
            iterations = entry.iterations,
            pre_bootstrap = entry.pre_bootstrap.required(),
            "inverse std, adaptive schedule"
        );

        let approx = eng
            .scaled_variance(x, n * b, n * b * b)
            .step("variance (approx)")?;
        let approx = eng.select_representative(&approx)?;

        let (value, prescaled) = if entry.pre_bootstrap.required() {
            let approx = eng
                .refresh_if_needed(&approx, eng.max_level())
                .step("bootstrap (variance)")?;
            let value = eng
                .multiply_constant(&approx, b * b / 2.0)
                .step("variance (refined)")?;
            (value, approx)
        } else {
            let refined = eng
                .scaled_variance(x, n * SQRT_2, 2.0 * n)
                .step("variance (refined)")?;
            (eng.select_representative(&refined)?, approx)
        };

        Solver::new(eng)
            .solve_inverse_sqrt(
                &value,
                &prescaled,
                b * b,
                entry.degree,
                entry.iterations,
                ChebyshevMode::Bound,
                NewtonMode::InverseSqrt,
            )
            .step("newton")
    }

    /// Elementwise `1/sqrt(x)` for `x` in `(0, B]`, scheduled by the entry for `x.level`.
    ///
    /// Runs exactly `entry.iterations` Newton steps: the count the optimizer
    /// measured, not one less.
    pub fn adaptive_inverse_sqrt(
        &self,
        x: &Vector<B>,
        table: &ParameterTable,
        policy: Policy,
    ) -> Result<Vector<B>> {
        let eng = self.engine;
        let b = self.bound;
        let entry = *table.lookup(x.level, policy).step("parameter lookup")?;

        let x = if entry.pre_bootstrap.required() {
            let shrunk = eng.multiply_constant(x, 1.0 / b).step("pre-bootstrap scale")?;
            let fresh = eng
                .refresh_if_needed(&shrunk, eng.max_level())
                .step("pre-bootstrap")?;
            eng.multiply_constant(&fresh, b).step("pre-bootstrap scale")?
        } else {
            x.clone()
        };
        let prescaled = eng.multiply_constant(&x, 2.0 / b).step("prescale")?;
        let value = eng.multiply_constant(&x, 0.5).step("prescale")?;

        Solver::new(eng)
            .with_refresh_threshold(TRIAL_REFRESH_THRESHOLD)
            .solve_inverse_sqrt(
                &value,
                &prescaled,
                b,
                entry.degree,
                entry.iterations,
                ChebyshevMode::HalfBound,
                NewtonMode::InverseSqrt,
            )
            .step("newton")
    }

    /// (X − μ) · 1/σ
    pub fn z_score_norm(&self, x: &Vector<B>) -> Result<Vector<B>> {
        let eng = self.engine;
        let mean = eng.mean(x).step("mean")?;
        let centered = eng.sub(x, &mean).step("center")?;
        let inv = self.inverse_std(x).step("inverse std")?;

        let inv = eng
            .broadcast(&inv, centered.block_count(), centered.size)
            .step("broadcast")?;
        self.final_multiply(&centered, &inv)
    }

    /// E[(X − μ)³] · 1/σ³
    ///
    /// `1/σ` is applied to the moment three times instead of being cubed
    /// first. Backend noise is additive, so a small power such as 1/σ³ keeps
    /// little relative precision; every partial product here stays large.
    pub fn skewness(&self, x: &Vector<B>) -> Result<Vector<B>> {
        let eng = self.engine;
        let mean = eng.mean(x).step("mean")?;
        let centered = eng.sub(x, &mean).step("center")?;
        let x2 = eng.multiply(&centered, &centered).step("x^2")?;
        let x3 = eng.multiply(&centered, &x2).step("x^3")?;
        let numerator = eng.mean(&x3).step("mean of x^3")?;

        let inv = self.inverse_std(x).step("inverse std")?;
        self.scale_by_powers(numerator, &inv, 3)
    }

    /// Excess kurtosis, E[(X − μ)⁴] · 1/σ⁴ − 3
    ///
    /// Same factor-at-a-time scheduling as [`Self::skewness`]. The error still
    /// grows with the backend noise: the fourth moment amplifies the relative
    /// error of `1/σ` four times.
    pub fn kurtosis(&self, x: &Vector<B>) -> Result<Vector<B>> {
        let eng = self.engine;
        let mean = eng.mean(x).step("mean")?;
        let centered = eng.sub(x, &mean).step("center")?;
        let x2 = eng.multiply(&centered, &centered).step("x^2")?;
        let x4 = eng.multiply(&x2, &x2).step("x^4")?;
        let numerator = eng.mean(&x4).step("mean of x^4")?;

        let inv = self.inverse_std(x).step("inverse std")?;
        let kurtosis = self.scale_by_powers(numerator, &inv, 4)?;
        eng.sub_constant(&kurtosis, 3.0).step("subtract bias")
    }

    /// E[(X − μx)(Y − μy)] · 1/σx · 1/σy
    pub fn pearson_correlation(&self, x: &Vector<B>, y: &Vector<B>) -> Result<Vector<B>> {
        if x.size != y.size {
            return Err(StatError::InvalidInput(format!(
                "correlation of vectors with sizes {} and {}",
                x.size, y.size
            )));
        }
        let eng = self.engine;
        let mean_x = eng.mean(x).step("mean of x")?;
        let mean_y = eng.mean(y).step("mean of y")?;
        let cx = eng.sub(x, &mean_x).step("center x")?;
        let cy = eng.sub(y, &mean_y).step("center y")?;
        let xy = eng.multiply(&cx, &cy).step("x*y")?;
        let numerator = eng.mean(&xy).step("mean of x*y")?;

        let inv_x = self.inverse_std(x).step("inverse std (x)")?;
        let inv_y = self.inverse_std(y).step("inverse std (y)")?;
        let scaled = self.scale_by_powers(numerator, &inv_x, 1)?;
        self.scale_by_powers(scaled, &inv_y, 1)
    }

    /// `value · factor^power`, one broadcast product per power.
    fn scale_by_powers(&self, value: Vector<B>, factor: &Vector<B>, power: usize) -> Result<Vector<B>> {
        let factor = self
            .engine
            .broadcast(factor, value.block_count(), value.size)
            .step("broadcast")?;
        (0..power).try_fold(value, |acc, _| self.final_multiply(&acc, &factor))
    }

    fn final_multiply(&self, a: &Vector<B>, b: &Vector<B>) -> Result<Vector<B>> {
        let eng = self.engine;
        let a = eng.refresh_if_needed(a, 1).step("refresh operand")?;
        let b = eng.refresh_if_needed(b, 1).step("refresh operand")?;
        eng.multiply(&a, &b).step("final multiply")
    }
}
