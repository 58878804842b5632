//! Plaintext reference statistics and error metrics.

use crate::error::{Result, StatError};
use rand::Rng;

/// `n` evenly spaced values from `start` to `stop`, both included.
pub fn linspace(start: f64, stop: f64, n: usize) -> Vec<f64> {
    match n {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (stop - start) / (n - 1) as f64;
            (0..n).map(|i| start + step * i as f64).collect()
        }
    }
}

/// Uniform samples in `[-range/2, range/2)`.
pub fn uniform_data<R: Rng>(rng: &mut R, len: usize, range: f64) -> Vec<f64> {
    (0..len).map(|_| (rng.gen::<f64>() - 0.5) * range).collect()
}

/// Arithmetic mean. NaN for an empty slice.
pub fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population variance.
pub fn variance(data: &[f64]) -> f64 {
    let m = mean(data);
    data.iter().map(|v| (v - m) * (v - m)).sum::<f64>() / data.len() as f64
}

/// Population standard deviation.
pub fn std_dev(data: &[f64]) -> f64 {
    variance(data).sqrt()
}

/// `(x - μ) / σ` for every element.
pub fn z_score_norm(data: &[f64]) -> Vec<f64> {
    let m = mean(data);
    let inv_sigma = 1.0 / std_dev(data);
    data.iter().map(|v| (v - m) * inv_sigma).collect()
}

fn standardized_moment(data: &[f64], k: i32) -> f64 {
    let m = mean(data);
    let sigma = std_dev(data);
    data.iter().map(|v| ((v - m) / sigma).powi(k)).sum::<f64>() / data.len() as f64
}

/// Third standardized moment.
pub fn skewness(data: &[f64]) -> f64 {
    standardized_moment(data, 3)
}

/// Excess kurtosis.
pub fn kurtosis(data: &[f64]) -> f64 {
    standardized_moment(data, 4) - 3.0
}

/// Population covariance of two equally long slices.
pub fn covariance(x: &[f64], y: &[f64]) -> Result<f64> {
    if x.len() != y.len() {
        return Err(StatError::InvalidInput(format!(
            "covariance of slices with lengths {} and {}",
            x.len(),
            y.len()
        )));
    }
    if x.len() < 2 {
        return Err(StatError::InvalidInput("covariance needs at least two samples".into()));
    }
    let (mx, my) = (mean(x), mean(y));
    Ok(x.iter().zip(y).map(|(a, b)| (a - mx) * (b - my)).sum::<f64>() / x.len() as f64)
}

/// Pearson correlation coefficient.
pub fn correlation(x: &[f64], y: &[f64]) -> Result<f64> {
    let cov = covariance(x, y)?;
    let (sx, sy) = (std_dev(x), std_dev(y));
    if sx == 0.0 || sy == 0.0 {
        return Err(StatError::InvalidInput("correlation of a constant slice".into()));
    }
    Ok(cov / (sx * sy))
}

/// Mean of |1 − actual/target| over the shorter of the two slices.
pub fn mre(actual: &[f64], target: &[f64]) -> f64 {
    let n = actual.len().min(target.len());
    actual
        .iter()
        .zip(target)
        .map(|(a, t)| (1.0 - a / t).abs())
        .sum::<f64>()
        / n as f64
}

/// Largest |1 − actual/target|.
pub fn max_relative_error(actual: &[f64], target: &[f64]) -> f64 {
    actual
        .iter()
        .zip(target)
        .map(|(a, t)| (1.0 - a / t).abs())
        .fold(0.0, f64::max)
}

/// Mean absolute error.
pub fn mae(actual: &[f64], target: &[f64]) -> f64 {
    let n = actual.len().min(target.len());
    actual.iter().zip(target).map(|(a, t)| (a - t).abs()).sum::<f64>() / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn test_linspace() {
        assert_eq!(linspace(0.0, 1.0, 5), vec![0.0, 0.25, 0.5, 0.75, 1.0]);
        assert_eq!(linspace(3.0, 4.0, 1), vec![3.0]);
        assert!(linspace(3.0, 4.0, 0).is_empty());
    }

    #[test]
    fn test_moments() {
        let data = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert_eq!(mean(&data), 5.0);
        assert_eq!(variance(&data), 4.0);
        assert_eq!(std_dev(&data), 2.0);
        let z = z_score_norm(&data);
        assert_eq!(z[0], -1.5);
        assert!(mean(&z).abs() < 1e-12);

        let symmetric = [1.0, 2.0, 3.0, 4.0, 5.0];
        assert!(skewness(&symmetric).abs() < 1e-12);
        // uniform on five points: 1.7 - 3
        assert!((kurtosis(&symmetric) + 1.3).abs() < 1e-12);
    }

    #[test]
    fn test_correlation() {
        let x = [1.0, 2.0, 3.0, 4.0];
        let y = [2.0, 4.0, 6.0, 8.0];
        let neg = [4.0, 3.0, 2.0, 1.0];
        assert!((correlation(&x, &y).unwrap() - 1.0).abs() < 1e-12);
        assert!((correlation(&x, &neg).unwrap() + 1.0).abs() < 1e-12);
        assert!(correlation(&x, &y[..3]).is_err());
        assert!(correlation(&x, &[1.0; 4]).is_err());
    }

    #[test]
    fn test_error_metrics() {
        let target = [1.0, 2.0, 4.0];
        let actual = [1.1, 2.0, 3.6];
        assert!((mre(&actual, &target) - 0.2 / 3.0).abs() < 1e-12);
        assert!((max_relative_error(&actual, &target) - 0.1).abs() < 1e-12);
        assert!((mae(&actual, &target) - 0.5 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_uniform_data_range() {
        let mut rng = StdRng::seed_from_u64(3);
        let data = uniform_data(&mut rng, 1000, 10.0);
        assert!(data.iter().all(|v| (-5.0..5.0).contains(v)));
    }
}
