//! Chebyshev interpolants, used as the polynomial handed to the backend's
//! polynomial evaluator.

use crate::error::{Result, StatError};
use num_complex::Complex64;
use std::f64::consts::PI;

/// p(x) = Σ coeffs[k]·T_k(t),  t = (2x − (a + b)) / (b − a)
#[derive(Clone, Debug, PartialEq)]
pub struct ChebyshevPoly {
    /// Coefficients of `T_0 ..= T_degree`
    pub coeffs: Vec<f64>,
    /// Interval `[a, b]` mapped onto `[-1, 1]`
    pub interval: (f64, f64),
}

impl ChebyshevPoly {
    /// Interpolate `f` on `[a, b]` at the `degree + 1` Chebyshev nodes of the first kind.
    pub fn approximate<F>(f: F, a: f64, b: f64, degree: usize) -> Result<Self>
    where
        F: Fn(f64) -> f64,
    {
        if !(a.is_finite() && b.is_finite() && a < b) {
            return Err(StatError::InvalidInput(format!(
                "interpolation interval [{a}, {b}] must be finite and non-empty"
            )));
        }
        let nodes = degree + 1;
        let half_width = (b - a) / 2.0;
        let center = (a + b) / 2.0;

        let samples: Vec<f64> = (0..nodes)
            .map(|j| {
                let t = (PI * (j as f64 + 0.5) / nodes as f64).cos();
                f(center + half_width * t)
            })
            .collect();

        let mut coeffs: Vec<f64> = (0..nodes)
            .map(|k| {
                let acc: f64 = samples
                    .iter()
                    .enumerate()
                    .map(|(j, &fj)| fj * (PI * k as f64 * (j as f64 + 0.5) / nodes as f64).cos())
                    .sum();
                2.0 * acc / nodes as f64
            })
            .collect();
        coeffs[0] /= 2.0;

        Ok(Self { coeffs, interval: (a, b) })
    }

    /// Highest Chebyshev index carried.
    pub fn degree(&self) -> usize {
        self.coeffs.len().saturating_sub(1)
    }

    /// Multiplicative depth of a baby-step/giant-step evaluation: ⌈log2(degree + 1)⌉.
    pub fn depth(&self) -> usize {
        (usize::BITS - self.degree().leading_zeros()) as usize
    }

    /// Real evaluation.
    pub fn eval(&self, x: f64) -> f64 {
        self.eval_complex(Complex64::new(x, 0.0)).re
    }

    /// Clenshaw recurrence over a complex argument (slots are complex).
    pub fn eval_complex(&self, z: Complex64) -> Complex64 {
        let (a, b) = self.interval;
        let t = (z * 2.0 - (a + b)) / (b - a);
        let mut b1 = Complex64::new(0.0, 0.0);
        let mut b2 = Complex64::new(0.0, 0.0);
        for &c in self.coeffs.iter().skip(1).rev() {
            let next = t * b1 * 2.0 - b2 + c;
            b2 = b1;
            b1 = next;
        }
        t * b1 - b2 + self.coeffs.first().copied().unwrap_or(0.0)
    }
}

/// Polynomial degree used for a degree exponent `d`: 2^d − 2.
pub fn degree_for_exponent(d: u32) -> usize {
    (1usize << d) - 2
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_smooth_function_is_reproduced() {
        let poly = ChebyshevPoly::approximate(f64::exp, -1.0, 1.0, 14).unwrap();
        for i in 0..=20 {
            let x = -1.0 + 0.1 * i as f64;
            assert!((poly.eval(x) - x.exp()).abs() < 1e-12, "exp mismatch at {x}");
        }
    }

    #[test]
    fn test_polynomial_is_exact() {
        // x^3 - 2x on a shifted interval is a degree-3 polynomial, so degree 5 is exact
        let f = |x: f64| x * x * x - 2.0 * x;
        let poly = ChebyshevPoly::approximate(f, 0.0, 4.0, 5).unwrap();
        for x in [0.0, 0.5, 1.7, 3.2, 4.0] {
            assert!((poly.eval(x) - f(x)).abs() < 1e-10);
        }
        assert!(poly.coeffs[4].abs() < 1e-12);
        assert!(poly.coeffs[5].abs() < 1e-12);
    }

    #[test]
    fn test_degree_and_depth() {
        for d in 2..=9 {
            let degree = degree_for_exponent(d);
            let poly = ChebyshevPoly::approximate(|x| x, -1.0, 1.0, degree).unwrap();
            assert_eq!(poly.degree(), degree);
            assert_eq!(poly.depth(), d as usize);
        }
    }

    #[test]
    fn test_inverse_sqrt_away_from_singularity() {
        let f = |x: f64| if x > -1.0 { 1.0 / (x + 1.0).sqrt() } else { 0.0 };
        let poly = ChebyshevPoly::approximate(f, -1.0, 1.0, degree_for_exponent(7)).unwrap();
        for x in [-0.5, 0.0, 0.5, 1.0] {
            let rel = (poly.eval(x) / f(x) - 1.0).abs();
            assert!(rel < 0.05, "relative error {rel} at {x}");
        }
    }

    #[test]
    fn test_complex_argument() {
        let poly = ChebyshevPoly::approximate(|x| x * x, -1.0, 1.0, 4).unwrap();
        let z = Complex64::new(0.5, 0.25);
        let got = poly.eval_complex(z);
        let want = z * z;
        assert!((got - want).norm() < 1e-12);
    }

    #[test]
    fn test_rejects_empty_interval() {
        assert!(matches!(
            ChebyshevPoly::approximate(f64::exp, 1.0, 1.0, 4),
            Err(StatError::InvalidInput(_))
        ));
        assert!(ChebyshevPoly::approximate(f64::exp, 2.0, -1.0, 4).is_err());
        assert!(ChebyshevPoly::approximate(f64::exp, f64::NAN, 1.0, 4).is_err());
    }
}
