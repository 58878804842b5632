//! Scheme parameters for the approximate homomorphic backend.

use crate::error::{Result, StatError};

/// Parameter set as in CKKS: (log slots, max level, log Δ).
#[derive(Clone, Debug, PartialEq)]
pub struct CkksParams {
    /// log2 of the slot count `S` of one ciphertext
    pub log_slots: u32,
    /// Level of a fresh (or freshly bootstrapped) ciphertext
    pub max_level: usize,
    /// log2 of the default scale Δ
    pub log_scale: u32,
    /// Whether bootstrapping keys are generated
    pub bootstrapping: bool,
    /// Standard deviation of the noise injected by encrypt / rescale / bootstrap
    pub noise_std: f64,
    /// Seed for the noise generator
    pub seed: u64,
}

impl CkksParams {
    /// Create a parameter set without bootstrapping and without noise.
    pub fn new(log_slots: u32, max_level: usize, log_scale: u32) -> Result<Self> {
        if !(1..=16).contains(&log_slots) {
            return Err(StatError::InvalidInput(format!(
                "log_slots must lie in 1..=16, got {log_slots}"
            )));
        }
        if max_level == 0 {
            return Err(StatError::InvalidInput("max_level must be positive".into()));
        }
        if !(20..=60).contains(&log_scale) {
            return Err(StatError::InvalidInput(format!(
                "log_scale must lie in 20..=60, got {log_scale}"
            )));
        }
        Ok(Self {
            log_slots,
            max_level,
            log_scale,
            bootstrapping: false,
            noise_std: 0.0,
            seed: 0,
        })
    }

    /// Also generate bootstrapping keys.
    #[must_use]
    pub fn with_bootstrapping(mut self) -> Self {
        self.bootstrapping = true;
        self
    }

    /// Inject Gaussian noise of the given deviation into every noisy primitive.
    pub fn with_noise(mut self, noise_std: f64, seed: u64) -> Result<Self> {
        if !noise_std.is_finite() || noise_std < 0.0 {
            return Err(StatError::InvalidInput(format!(
                "noise_std must be finite and non-negative, got {noise_std}"
            )));
        }
        self.noise_std = noise_std;
        self.seed = seed;
        Ok(self)
    }

    /// `S = 2^log_slots`
    pub fn slots(&self) -> usize {
        1 << self.log_slots
    }

    /// `Δ = 2^log_scale`
    pub fn default_scale(&self) -> f64 {
        2f64.powi(self.log_scale as i32)
    }
}

impl Default for CkksParams {
    /// 1024 slots, 11 levels, Δ = 2^50, bootstrapping enabled.
    fn default() -> Self {
        Self {
            log_slots: 10,
            max_level: 11,
            log_scale: 50,
            bootstrapping: true,
            noise_std: 0.0,
            seed: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_creation() {
        let params = CkksParams::new(4, 6, 40).unwrap();
        assert_eq!(params.slots(), 16);
        assert_eq!(params.default_scale(), 2f64.powi(40));
        assert!(!params.bootstrapping);

        let params = params.with_bootstrapping().with_noise(1e-9, 7).unwrap();
        assert!(params.bootstrapping);
        assert_eq!(params.seed, 7);
    }

    #[test]
    fn test_invalid_params() {
        assert!(CkksParams::new(0, 6, 40).is_err());
        assert!(CkksParams::new(4, 0, 40).is_err());
        assert!(CkksParams::new(4, 6, 70).is_err());
        assert!(CkksParams::new(4, 6, 40).unwrap().with_noise(-1.0, 0).is_err());
    }
}
