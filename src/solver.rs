//! Reciprocal and reciprocal square root: Chebyshev initial guess refined by
//! Newton iterations, with bootstrap-on-demand.

use crate::{
    backend::Backend,
    chebyshev::{degree_for_exponent, ChebyshevPoly},
    engine::{Engine, Vector},
    error::{Result, StatError},
    vector::EncryptedVector,
};
use rayon::prelude::*;
use tracing::debug;

/// `y` is bootstrapped before a Newton step when its level drops below this.
pub const REFRESH_THRESHOLD: usize = 2;

/// Smallest supported degree exponent.
pub const MIN_DEGREE_EXPONENT: u32 = 2;
/// Largest supported degree exponent.
pub const MAX_DEGREE_EXPONENT: u32 = 15;

/// Which scaled variant of `1/sqrt(x + 1)` the initial guess interpolates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChebyshevMode {
    /// Operand used as is.
    Unit,
    /// Operand pre-multiplied by `2/B` by the caller.
    HalfBound,
    /// Operand already divided by `B`.
    Bound,
}

impl ChebyshevMode {
    /// Constant `k` in `f(x) = k / sqrt(x + 1)`.
    pub fn gain(self, bound: f64) -> f64 {
        match self {
            ChebyshevMode::Unit => 1.0,
            ChebyshevMode::HalfBound => (2.0 / bound).sqrt(),
            ChebyshevMode::Bound => 1.0 / bound.sqrt(),
        }
    }

    /// The function to interpolate. Zero at and below `x = -1`.
    pub fn target(self, bound: f64) -> impl Fn(f64) -> f64 {
        let k = self.gain(bound);
        move |x| if x > -1.0 { k / (x + 1.0).sqrt() } else { 0.0 }
    }
}

/// Newton update and the pre-scale applied to `x`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NewtonMode {
    /// y' = 2y − x·y²
    Reciprocal,
    /// Reciprocal with `x` multiplied by `B` first.
    ScaledReciprocal,
    /// y' = 1.5y − x·y³, `x` already halved by the caller.
    InverseSqrt,
    /// Inverse square root with `x` multiplied by `B/2` first.
    ScaledInverseSqrt,
}

impl NewtonMode {
    /// 1 for the reciprocal, 2 for the reciprocal square root.
    pub fn order(self) -> u32 {
        match self {
            NewtonMode::Reciprocal | NewtonMode::ScaledReciprocal => 1,
            NewtonMode::InverseSqrt | NewtonMode::ScaledInverseSqrt => 2,
        }
    }

    /// Factor applied to `x` before the loop, if any.
    pub fn prescale(self, bound: f64) -> Option<f64> {
        match self {
            NewtonMode::ScaledReciprocal => Some(bound),
            NewtonMode::ScaledInverseSqrt => Some(bound / 2.0),
            NewtonMode::Reciprocal | NewtonMode::InverseSqrt => None,
        }
    }
}

/// Stateless helper borrowing an engine.
pub struct Solver<'a, B: Backend> {
    engine: &'a Engine<B>,
    refresh_threshold: usize,
}

impl<'a, B: Backend> Solver<'a, B> {
    /// Solver with the default [`REFRESH_THRESHOLD`].
    pub fn new(engine: &'a Engine<B>) -> Self {
        Self {
            engine,
            refresh_threshold: REFRESH_THRESHOLD,
        }
    }

    /// Bootstrap `y` before a step once its level drops below `threshold`.
    #[must_use]
    pub fn with_refresh_threshold(mut self, threshold: usize) -> Self {
        self.refresh_threshold = threshold;
        self
    }

    /// Engine the solver runs on.
    pub fn engine(&self) -> &'a Engine<B> {
        self.engine
    }

    /// Initial guess for `1/sqrt` of `v`, costing `d` levels.
    ///
    /// Bootstraps `v` first when fewer than `d` levels remain and the engine can.
    pub fn chebyshev_inverse_sqrt(
        &self,
        v: &Vector<B>,
        mode: ChebyshevMode,
        bound: f64,
        d: u32,
    ) -> Result<Vector<B>> {
        if !(MIN_DEGREE_EXPONENT..=MAX_DEGREE_EXPONENT).contains(&d) {
            return Err(StatError::InvalidInput(format!(
                "degree exponent must lie in {MIN_DEGREE_EXPONENT}..={MAX_DEGREE_EXPONENT}, got {d}"
            )));
        }
        let eng = self.engine;
        let depth = d as usize;
        let mut v = v.clone();
        if v.level < depth && eng.can_bootstrap() {
            v = eng.do_bootstrap(&v, eng.max_level())?;
        }
        if v.level < depth {
            return Err(StatError::InsufficientDepth {
                level: v.level,
                required: depth,
            });
        }

        let shifted = eng.sub_constant(&v, 1.0)?;
        let poly = ChebyshevPoly::approximate(mode.target(bound), -1.0, 1.0, degree_for_exponent(d))?;
        debug!(?mode, degree = poly.degree(), level = v.level, "chebyshev initial guess");

        let be = eng.backend();
        let half = eng.default_scale() / 2.0;
        let blocks = shifted
            .blocks
            .par_iter()
            .map(|ct| {
                let mut p = be.evaluate_polynomial(ct, &poly, half)?;
                be.set_scale(&mut p, half * 2.0);
                let conj = be.conjugate(&p)?;
                let mut real = be.add(&p, &conj)?;
                be.set_scale(&mut real, be.scale(ct));
                Ok(real)
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EncryptedVector::new(blocks, v.size, v.level - depth, v.scale))
    }

    /// One Newton update of `y` towards `x^(-1/order)`.
    pub fn newton_step(&self, x: &Vector<B>, y: &Vector<B>, order: u32) -> Result<Vector<B>> {
        let eng = self.engine;
        let n = f64::from(order);
        let linear = eng.multiply_constant(y, (n + 1.0) / n)?;
        let xy = eng.multiply(x, y)?;
        let power = if order == 2 { eng.multiply(y, y)? } else { y.clone() };
        let correction = eng.multiply(&xy, &power)?;
        eng.sub(&linear, &correction)
    }

    /// Applies the mode's pre-scale to `x`, refreshes it once, and returns the
    /// (unbounded) sequence of estimates.
    pub fn newton_iterations(
        &self,
        x: &Vector<B>,
        init: &Vector<B>,
        bound: f64,
        mode: NewtonMode,
    ) -> Result<NewtonIterations<'_, 'a, B>> {
        let eng = self.engine;
        let x = match mode.prescale(bound) {
            Some(c) => eng.multiply_constant(x, c)?,
            None => x.clone(),
        };
        let x = eng.refresh_if_needed(&x, 2)?;
        Ok(NewtonIterations {
            solver: self,
            x,
            y: Some(init.clone()),
            order: mode.order(),
            step: 0,
        })
    }

    /// Runs `iterations` Newton steps from `init`.
    pub fn newton(
        &self,
        x: &Vector<B>,
        init: &Vector<B>,
        bound: f64,
        iterations: usize,
        mode: NewtonMode,
    ) -> Result<Vector<B>> {
        self.newton_iterations(x, init, bound, mode)?
            .take(iterations)
            .try_fold(init.clone(), |_, next| next)
    }

    /// Chebyshev guess on `prescaled`, then Newton refinement on `value`.
    #[allow(clippy::too_many_arguments)]
    pub fn solve_inverse_sqrt(
        &self,
        value: &Vector<B>,
        prescaled: &Vector<B>,
        bound: f64,
        degree: u32,
        iterations: usize,
        chebyshev_mode: ChebyshevMode,
        newton_mode: NewtonMode,
    ) -> Result<Vector<B>> {
        let init = self.chebyshev_inverse_sqrt(prescaled, chebyshev_mode, bound, degree)?;
        self.newton(value, &init, bound, iterations, newton_mode)
    }
}

/// Successive Newton estimates. Stops after the first error.
pub struct NewtonIterations<'s, 'a, B: Backend> {
    solver: &'s Solver<'a, B>,
    x: Vector<B>,
    y: Option<Vector<B>>,
    order: u32,
    step: usize,
}

impl<B: Backend> NewtonIterations<'_, '_, B> {
    fn advance(&self, y: &Vector<B>) -> Result<Vector<B>> {
        let eng = self.solver.engine;
        let y = if y.level < self.solver.refresh_threshold && eng.can_bootstrap() {
            eng.do_bootstrap(y, self.solver.refresh_threshold)?
        } else {
            y.clone()
        };
        self.solver.newton_step(&self.x, &y, self.order)
    }
}

impl<B: Backend> Iterator for NewtonIterations<'_, '_, B> {
    type Item = Result<Vector<B>>;

    fn next(&mut self) -> Option<Self::Item> {
        let y = self.y.take()?;
        self.step += 1;
        match self.advance(&y) {
            Ok(next) => {
                debug!(step = self.step, level = next.level, "newton step");
                self.y = Some(next.clone());
                Some(Ok(next))
            }
            Err(e) => Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{params::CkksParams, sim::SimBackend};

    fn engine(bootstrapping: bool) -> Engine<SimBackend> {
        let mut params = CkksParams::new(4, 11, 40).unwrap();
        params.bootstrapping = bootstrapping;
        Engine::new(SimBackend::new(params))
    }

    fn scalar(eng: &Engine<SimBackend>, v: &Vector<SimBackend>) -> f64 {
        eng.decrypt(v).unwrap()[0]
    }

    #[test]
    fn test_inverse_sqrt_of_four() {
        let eng = engine(true);
        let solver = Solver::new(&eng);
        let bound = 8.0;
        let x = 4.0;
        let value = eng.encrypt_fresh(&[x / 2.0]).unwrap();
        let prescaled = eng.encrypt_fresh(&[x * 2.0 / bound]).unwrap();
        let y = solver
            .solve_inverse_sqrt(
                &value,
                &prescaled,
                bound,
                5,
                3,
                ChebyshevMode::HalfBound,
                NewtonMode::InverseSqrt,
            )
            .unwrap();
        assert!((scalar(&eng, &y) - 0.5).abs() < 1e-6);
        assert_eq!(y.block_count(), 1);
        assert_eq!(y.scale, eng.default_scale());
    }

    #[test]
    fn test_bootstrap_only_on_demand() {
        let eng = engine(true);
        let solver = Solver::new(&eng);
        let value = eng.encrypt_fresh(&[2.0]).unwrap();
        let prescaled = eng.encrypt_fresh(&[1.0]).unwrap();
        let init = solver
            .chebyshev_inverse_sqrt(&prescaled, ChebyshevMode::HalfBound, 8.0, 5)
            .unwrap();
        assert_eq!(init.level, 6);
        assert_eq!(eng.backend().bootstrap_count(), 0);

        // levels 6 -> 4 -> 2 -> 0, then a refresh before the fourth step
        let levels: Vec<usize> = solver
            .newton_iterations(&value, &init, 8.0, NewtonMode::InverseSqrt)
            .unwrap()
            .take(5)
            .map(|y| y.unwrap().level)
            .collect();
        assert_eq!(levels, vec![4, 2, 0, 9, 7]);
        assert_eq!(eng.backend().bootstrap_count(), 1);
    }

    #[test]
    fn test_reciprocal_converges_quadratically() {
        let eng = engine(false);
        let solver = Solver::new(&eng);
        let x = eng.encrypt_fresh(&[4.0]).unwrap();
        let init = eng.encrypt_fresh(&[0.2]).unwrap();
        let errors: Vec<f64> = solver
            .newton_iterations(&x, &init, 1.0, NewtonMode::Reciprocal)
            .unwrap()
            .take(4)
            .map(|y| (scalar(&eng, &y.unwrap()) - 0.25).abs())
            .collect();
        assert!(errors.windows(2).all(|w| w[1] < w[0]));
        assert!(errors[3] < 1e-9);
    }

    #[test]
    fn test_scaled_reciprocal() {
        let eng = engine(false);
        let solver = Solver::new(&eng);
        let x = eng.encrypt_fresh(&[0.5]).unwrap();
        let init = eng.encrypt_fresh(&[0.2]).unwrap();
        let y = solver
            .newton(&x, &init, 8.0, 4, NewtonMode::ScaledReciprocal)
            .unwrap();
        assert!((scalar(&eng, &y) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_depth_exhaustion_without_bootstrapping() {
        let eng = engine(false);
        let solver = Solver::new(&eng);
        let x = eng.encrypt(&[2.0], 4).unwrap();
        let init = eng.encrypt(&[0.5], 4).unwrap();
        let err = solver
            .newton(&x, &init, 8.0, 5, NewtonMode::InverseSqrt)
            .unwrap_err();
        assert!(matches!(err, StatError::InsufficientDepth { .. }));

        let shallow = eng.encrypt(&[1.0], 3).unwrap();
        assert!(matches!(
            solver.chebyshev_inverse_sqrt(&shallow, ChebyshevMode::Unit, 1.0, 5),
            Err(StatError::InsufficientDepth { level: 3, required: 5 })
        ));
    }

    #[test]
    fn test_chebyshev_modes() {
        let eng = engine(true);
        let solver = Solver::new(&eng);
        let v = eng.encrypt_fresh(&[0.5, 1.0, 1.5]).unwrap();

        let unit = solver.chebyshev_inverse_sqrt(&v, ChebyshevMode::Unit, 1.0, 7).unwrap();
        let got = eng.decrypt(&unit).unwrap();
        for (g, x) in got.iter().zip([0.5f64, 1.0, 1.5]) {
            assert!((g * x.sqrt() - 1.0).abs() < 0.05);
        }

        // v = x / B with B = 4
        let bound = solver.chebyshev_inverse_sqrt(&v, ChebyshevMode::Bound, 4.0, 7).unwrap();
        let got = eng.decrypt(&bound).unwrap();
        for (g, x) in got.iter().zip([2.0f64, 4.0, 6.0]) {
            assert!((g * x.sqrt() - 1.0).abs() < 0.05);
        }
    }

    #[test]
    fn test_shallow_operand_is_bootstrapped() {
        let eng = engine(true);
        let solver = Solver::new(&eng);
        let v = eng.encrypt(&[1.0], 2).unwrap();
        let y = solver.chebyshev_inverse_sqrt(&v, ChebyshevMode::Unit, 1.0, 4).unwrap();
        assert_eq!(y.level, 7);
        assert_eq!(eng.backend().bootstrap_count(), 1);
    }

    #[test]
    fn test_degree_exponent_is_validated() {
        let eng = engine(true);
        let solver = Solver::new(&eng);
        let v = eng.encrypt_fresh(&[1.0]).unwrap();
        assert!(matches!(
            solver.chebyshev_inverse_sqrt(&v, ChebyshevMode::Unit, 1.0, 1),
            Err(StatError::InvalidInput(_))
        ));
    }
}
