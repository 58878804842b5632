//! Capability boundary to the homomorphic backend.
//!
//! Everything above this trait (chunked vectors, solver, circuits, optimizer)
//! only talks to ciphertexts through these primitives. Keys are generated when
//! a backend is constructed; the backend never sees more than one ciphertext
//! block at a time.

use crate::chebyshev::ChebyshevPoly;
use crate::error::Result;
use num_complex::Complex64;

/// Primitive CKKS operations on single ciphertexts.
pub trait Backend: Send + Sync {
    /// One encrypted block of `slots()` values.
    type Ciphertext: Clone + Send + Sync;

    /// Slot capacity `S` of one ciphertext.
    fn slots(&self) -> usize;

    /// Level of a freshly encrypted or bootstrapped ciphertext.
    fn max_level(&self) -> usize;

    /// Nominal fixed-point scale Δ.
    fn default_scale(&self) -> f64;

    /// Whether [`Backend::bootstrap`] is available.
    fn supports_bootstrapping(&self) -> bool;

    /// Encode at most `slots()` values (zero padded) and encrypt at `level`.
    fn encrypt(&self, values: &[f64], level: usize) -> Result<Self::Ciphertext>;

    /// All `slots()` decoded slots.
    fn decrypt(&self, ct: &Self::Ciphertext) -> Result<Vec<Complex64>>;

    /// Remaining multiplicative depth.
    fn level(&self, ct: &Self::Ciphertext) -> usize;

    /// Current fixed-point scale.
    fn scale(&self, ct: &Self::Ciphertext) -> f64;

    /// Relabel the scale without touching the ciphertext data.
    fn set_scale(&self, ct: &mut Self::Ciphertext, scale: f64);

    /// Slot-wise sum. Operands must agree on level and scale.
    fn add(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    /// Slot-wise difference.
    fn sub(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    /// Adds `c` to every slot.
    fn add_scalar(&self, a: &Self::Ciphertext, c: f64) -> Result<Self::Ciphertext>;

    /// Multiply then relinearize; the result scale is the product of scales.
    fn mul_relin(&self, a: &Self::Ciphertext, b: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    /// Multiply by a plaintext vector encoded at `plaintext_scale`.
    fn mul_plain(
        &self,
        a: &Self::Ciphertext,
        consts: &[f64],
        plaintext_scale: f64,
    ) -> Result<Self::Ciphertext>;

    /// Divide the scale by the current level's modulus, consuming one level.
    fn rescale(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    /// Cyclic left rotation of the slots.
    fn rotate(&self, a: &Self::Ciphertext, amount: usize) -> Result<Self::Ciphertext>;

    /// Complex conjugate of every slot.
    fn conjugate(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;

    /// Evaluate `poly` slot-wise, landing on `target_scale`.
    /// Consumes `poly.depth()` levels.
    fn evaluate_polynomial(
        &self,
        a: &Self::Ciphertext,
        poly: &ChebyshevPoly,
        target_scale: f64,
    ) -> Result<Self::Ciphertext>;

    /// Raise to `max_level()` at the default scale. Requires bootstrapping keys.
    fn bootstrap(&self, a: &Self::Ciphertext) -> Result<Self::Ciphertext>;
}
