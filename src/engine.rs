//! Encryption, decryption and bootstrapping of chunked vectors.

use crate::{
    backend::Backend,
    error::{Result, StatError},
    vector::{active_slots, block_count_for, EncryptedVector},
};
use num_complex::Complex64;
use rayon::prelude::*;
use tracing::debug;

/// Chunked vector of the backend's ciphertexts.
pub type Vector<B> = EncryptedVector<<B as Backend>::Ciphertext>;

/// Owns the backend. Vector arithmetic lives in `arith`.
pub struct Engine<B: Backend> {
    backend: B,
}

impl<B: Backend> Engine<B> {
    /// Wraps a backend whose keys are already generated.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Direct access to the primitives.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Slots per block.
    pub fn slots(&self) -> usize {
        self.backend.slots()
    }

    /// Level after encryption or bootstrapping.
    pub fn max_level(&self) -> usize {
        self.backend.max_level()
    }

    /// Δ
    pub fn default_scale(&self) -> f64 {
        self.backend.default_scale()
    }

    /// Whether the backend holds bootstrapping keys.
    pub fn can_bootstrap(&self) -> bool {
        self.backend.supports_bootstrapping()
    }

    /// Split `values` into blocks of `S` slots and encrypt each at `level`.
    pub fn encrypt(&self, values: &[f64], level: usize) -> Result<Vector<B>> {
        if values.is_empty() {
            return Err(StatError::InvalidInput("cannot encrypt an empty vector".into()));
        }
        if level > self.max_level() {
            return Err(StatError::InvalidInput(format!(
                "level {level} exceeds the maximum level {}",
                self.max_level()
            )));
        }
        let blocks = values
            .par_chunks(self.slots())
            .map(|chunk| self.backend.encrypt(chunk, level))
            .collect::<Result<Vec<_>>>()?;
        debug!(size = values.len(), blocks = blocks.len(), level, "encrypted vector");
        Ok(EncryptedVector::new(
            blocks,
            values.len(),
            level,
            self.default_scale(),
        ))
    }

    /// Encrypt at the maximum level.
    pub fn encrypt_fresh(&self, values: &[f64]) -> Result<Vector<B>> {
        self.encrypt(values, self.max_level())
    }

    /// Real parts of the first `size` slots, concatenated over blocks.
    pub fn decrypt(&self, v: &Vector<B>) -> Result<Vec<f64>> {
        Ok(self.decrypt_complex(v)?.into_iter().map(|z| z.re).collect())
    }

    /// Like [`Self::decrypt`], keeping the imaginary parts.
    pub fn decrypt_complex(&self, v: &Vector<B>) -> Result<Vec<Complex64>> {
        let slots = self.slots();
        let mut out = Vec::with_capacity(v.size);
        for (i, block) in v.blocks.iter().enumerate() {
            let active = active_slots(v.size, slots, i);
            let decoded = self.backend.decrypt(block)?;
            out.extend(decoded.into_iter().take(active));
        }
        Ok(out)
    }

    /// Bootstrap `v` to the maximum level unless it already sits at `required` or above.
    ///
    /// Each block is relabelled to twice its scale and added to its conjugate
    /// first, so the imaginary noise is dropped and the real part is unchanged.
    pub fn do_bootstrap(&self, v: &Vector<B>, required: usize) -> Result<Vector<B>> {
        if !self.can_bootstrap() {
            return Err(StatError::BootstrapUnsupported);
        }
        if v.level >= required {
            return Ok(v.clone());
        }
        debug!(level = v.level, required, blocks = v.block_count(), "bootstrapping");
        let blocks = v
            .blocks
            .par_iter()
            .map(|ct| {
                let mut ct = ct.clone();
                let scale = self.backend.scale(&ct);
                self.backend.set_scale(&mut ct, scale * 2.0);
                let conj = self.backend.conjugate(&ct)?;
                let real = self.backend.add(&ct, &conj)?;
                self.backend.bootstrap(&real)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut out = v.with_blocks(blocks);
        out.level = self.max_level();
        Ok(out)
    }

    /// Like `do_bootstrap`, but leaves `v` untouched when bootstrapping is unavailable.
    pub fn refresh_if_needed(&self, v: &Vector<B>, required: usize) -> Result<Vector<B>> {
        if self.can_bootstrap() {
            self.do_bootstrap(v, required)
        } else {
            Ok(v.clone())
        }
    }

    /// Ciphertexts needed for `size` values.
    pub fn block_count_for(&self, size: usize) -> usize {
        block_count_for(size, self.slots())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{params::CkksParams, sim::SimBackend};

    fn engine(bootstrapping: bool) -> Engine<SimBackend> {
        let mut params = CkksParams::new(4, 6, 40).unwrap();
        params.bootstrapping = bootstrapping;
        Engine::new(SimBackend::new(params))
    }

    #[test]
    fn test_ragged_round_trip() {
        let eng = engine(false);
        let values: Vec<f64> = (0..37).map(|i| i as f64 * 0.5 - 3.0).collect();
        let v = eng.encrypt(&values, 6).unwrap();
        assert_eq!(v.block_count(), 3);
        assert_eq!(v.size, 37);
        let out = eng.decrypt(&v).unwrap();
        assert_eq!(out.len(), 37);
        for (a, b) in out.iter().zip(&values) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_encrypt_rejects_bad_input() {
        let eng = engine(false);
        assert!(matches!(eng.encrypt(&[], 6), Err(StatError::InvalidInput(_))));
        assert!(matches!(eng.encrypt(&[1.0], 7), Err(StatError::InvalidInput(_))));
    }

    #[test]
    fn test_bootstrap_checks_support_before_level() {
        let eng = engine(false);
        let v = eng.encrypt(&[1.0], 6).unwrap();
        // already fresh, but no keys: still an error
        assert!(matches!(eng.do_bootstrap(&v, 2), Err(StatError::BootstrapUnsupported)));
        let same = eng.refresh_if_needed(&v, 2).unwrap();
        assert_eq!(same.level, 6);
    }

    #[test]
    fn test_bootstrap_restores_level_and_drops_imaginary_part() {
        let eng = engine(true);
        let mut v = eng.encrypt(&[2.0, -1.5], 1).unwrap();
        v.blocks[0].slots[0].im = 0.75;

        let kept = eng.do_bootstrap(&v, 1).unwrap();
        assert_eq!(kept.level, 1);
        assert_eq!(eng.backend().bootstrap_count(), 0);

        let fresh = eng.do_bootstrap(&v, 3).unwrap();
        assert_eq!(fresh.level, 6);
        assert_eq!(fresh.scale, v.scale);
        let out = eng.decrypt_complex(&fresh).unwrap();
        assert!((out[0] - Complex64::new(2.0, 0.0)).norm() < 1e-9);
        assert!((out[1] - Complex64::new(-1.5, 0.0)).norm() < 1e-9);
    }
}
