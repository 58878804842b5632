//! Plaintext stand-in for a CKKS backend.
//!
//! Slots are kept in the clear as complex numbers, while level and scale are
//! tracked with CKKS semantics: a ciphertext-ciphertext product multiplies the
//! scales, a rescale divides by Δ and drops one level, plaintext constants are
//! rounded at their encoding scale, and bootstrapping returns to the maximum
//! level. Optional Gaussian noise is injected by encrypt, rescale, polynomial
//! evaluation and bootstrap so that accuracy/latency trade-offs are visible.
//!
//! Noise is a function of the computation, not of the call order: every
//! ciphertext carries a seed derived from its inputs and the operation that
//! produced it, and each noisy primitive draws from a generator seeded with it.
//! Replaying a circuit with the same parameters therefore yields bit-identical
//! slots, whatever the thread schedule (within one toolchain, since seeds are
//! mixed with the standard library hasher).

use crate::{
    backend::Backend,
    chebyshev::ChebyshevPoly,
    error::{Result, StatError},
    params::CkksParams,
};
use num_complex::Complex64;
use rand::{rngs::StdRng, SeedableRng};
use rand_distr::{Distribution, Normal};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Bootstrapping is noisier than any other primitive.
const BOOTSTRAP_NOISE_FACTOR: f64 = 16.0;

/// Relative tolerance when comparing two ciphertext scales.
const SCALE_EPS: f64 = 1e-9;

/// Decoded slots plus CKKS metadata.
#[derive(Clone, Debug)]
pub struct SimCiphertext {
    /// Decoded slot values, noise included
    pub slots: Vec<Complex64>,
    /// Remaining depth
    pub level: usize,
    /// Fixed-point scale
    pub scale: f64,
    /// Seed for the next noisy primitive applied to this ciphertext
    pub noise_seed: u64,
}

/// Operation counters, handy to check scheduling decisions.
#[derive(Debug, Default)]
pub struct SimCounters {
    /// Calls to `bootstrap`
    pub bootstraps: AtomicUsize,
    /// Calls to `rescale`
    pub rescales: AtomicUsize,
    /// Calls to `rotate`
    pub rotations: AtomicUsize,
}

/// Tag mixed into the noise seed of an operation's output.
#[derive(Clone, Copy, Hash)]
enum Op {
    Encrypt,
    Add,
    Sub,
    AddScalar,
    MulRelin,
    MulPlain,
    Rescale,
    Rotate,
    Conjugate,
    Polynomial,
    Bootstrap,
}

/// In-the-clear [`Backend`] with CKKS bookkeeping.
pub struct SimBackend {
    params: CkksParams,
    counters: SimCounters,
}

impl SimBackend {
    /// Backend for already validated parameters.
    pub fn new(params: CkksParams) -> Self {
        Self {
            params,
            counters: SimCounters::default(),
        }
    }

    /// Parameters the backend was built with.
    pub fn params(&self) -> &CkksParams {
        &self.params
    }

    /// Bootstraps so far.
    pub fn bootstrap_count(&self) -> usize {
        self.counters.bootstraps.load(Ordering::Relaxed)
    }

    /// Rotations so far.
    pub fn rotation_count(&self) -> usize {
        self.counters.rotations.load(Ordering::Relaxed)
    }

    /// Rescales so far.
    pub fn rescale_count(&self) -> usize {
        self.counters.rescales.load(Ordering::Relaxed)
    }

    fn noisy(&self) -> bool {
        self.params.noise_std > 0.0
    }

    /// Seed of an operation's output. Zero when noise is off.
    fn derive_seed<F>(&self, op: Op, feed: F) -> u64
    where
        F: FnOnce(&mut DefaultHasher),
    {
        if !self.noisy() {
            return 0;
        }
        let mut h = DefaultHasher::new();
        self.params.seed.hash(&mut h);
        op.hash(&mut h);
        feed(&mut h);
        h.finish()
    }

    fn perturb(slots: &mut [Complex64], std: f64, seed: u64) -> Result<()> {
        if std == 0.0 {
            return Ok(());
        }
        let normal = Normal::new(0.0, std).map_err(|e| StatError::Backend(e.to_string()))?;
        let mut rng = StdRng::seed_from_u64(seed);
        for s in slots.iter_mut() {
            *s += Complex64::new(normal.sample(&mut rng), normal.sample(&mut rng));
        }
        Ok(())
    }

    fn check_same_scale(a: &SimCiphertext, b: &SimCiphertext) -> Result<()> {
        if ((a.scale - b.scale) / a.scale).abs() > SCALE_EPS {
            return Err(StatError::ScaleMismatch {
                left: a.scale,
                right: b.scale,
            });
        }
        Ok(())
    }

    fn zip_with<F>(a: &SimCiphertext, b: &SimCiphertext, f: F) -> Vec<Complex64>
    where
        F: Fn(Complex64, Complex64) -> Complex64,
    {
        a.slots.iter().zip(&b.slots).map(|(&x, &y)| f(x, y)).collect()
    }
}

impl Backend for SimBackend {
    type Ciphertext = SimCiphertext;

    fn slots(&self) -> usize {
        self.params.slots()
    }

    fn max_level(&self) -> usize {
        self.params.max_level
    }

    fn default_scale(&self) -> f64 {
        self.params.default_scale()
    }

    fn supports_bootstrapping(&self) -> bool {
        self.params.bootstrapping
    }

    fn encrypt(&self, values: &[f64], level: usize) -> Result<SimCiphertext> {
        if values.len() > self.slots() {
            return Err(StatError::InvalidInput(format!(
                "{} values do not fit into {} slots",
                values.len(),
                self.slots()
            )));
        }
        if level > self.max_level() {
            return Err(StatError::InvalidInput(format!(
                "level {level} exceeds the maximum level {}",
                self.max_level()
            )));
        }
        let scale = self.default_scale();
        let mut slots = vec![Complex64::new(0.0, 0.0); self.slots()];
        for (slot, &v) in slots.iter_mut().zip(values) {
            *slot = Complex64::new((v * scale).round() / scale, 0.0);
        }
        let noise_seed = self.derive_seed(Op::Encrypt, |h| {
            level.hash(h);
            values.len().hash(h);
            for v in values {
                v.to_bits().hash(h);
            }
        });
        Self::perturb(&mut slots, self.params.noise_std, noise_seed)?;
        Ok(SimCiphertext {
            slots,
            level,
            scale,
            noise_seed,
        })
    }

    fn decrypt(&self, ct: &SimCiphertext) -> Result<Vec<Complex64>> {
        Ok(ct.slots.clone())
    }

    fn level(&self, ct: &SimCiphertext) -> usize {
        ct.level
    }

    fn scale(&self, ct: &SimCiphertext) -> f64 {
        ct.scale
    }

    fn set_scale(&self, ct: &mut SimCiphertext, scale: f64) {
        // same raw data read at a different scale
        let ratio = ct.scale / scale;
        for s in ct.slots.iter_mut() {
            *s *= ratio;
        }
        ct.scale = scale;
    }

    fn add(&self, a: &SimCiphertext, b: &SimCiphertext) -> Result<SimCiphertext> {
        Self::check_same_scale(a, b)?;
        Ok(SimCiphertext {
            slots: Self::zip_with(a, b, |x, y| x + y),
            level: a.level.min(b.level),
            scale: a.scale,
            noise_seed: self.derive_seed(Op::Add, |h| (a.noise_seed, b.noise_seed).hash(h)),
        })
    }

    fn sub(&self, a: &SimCiphertext, b: &SimCiphertext) -> Result<SimCiphertext> {
        Self::check_same_scale(a, b)?;
        Ok(SimCiphertext {
            slots: Self::zip_with(a, b, |x, y| x - y),
            level: a.level.min(b.level),
            scale: a.scale,
            noise_seed: self.derive_seed(Op::Sub, |h| (a.noise_seed, b.noise_seed).hash(h)),
        })
    }

    fn add_scalar(&self, a: &SimCiphertext, c: f64) -> Result<SimCiphertext> {
        Ok(SimCiphertext {
            slots: a.slots.iter().map(|&x| x + c).collect(),
            level: a.level,
            scale: a.scale,
            noise_seed: self.derive_seed(Op::AddScalar, |h| (a.noise_seed, c.to_bits()).hash(h)),
        })
    }

    fn mul_relin(&self, a: &SimCiphertext, b: &SimCiphertext) -> Result<SimCiphertext> {
        Ok(SimCiphertext {
            slots: Self::zip_with(a, b, |x, y| x * y),
            level: a.level.min(b.level),
            scale: a.scale * b.scale,
            noise_seed: self.derive_seed(Op::MulRelin, |h| (a.noise_seed, b.noise_seed).hash(h)),
        })
    }

    fn mul_plain(
        &self,
        a: &SimCiphertext,
        consts: &[f64],
        plaintext_scale: f64,
    ) -> Result<SimCiphertext> {
        if consts.len() != a.slots.len() {
            return Err(StatError::Backend(format!(
                "plaintext has {} slots, ciphertext has {}",
                consts.len(),
                a.slots.len()
            )));
        }
        let slots = a
            .slots
            .iter()
            .zip(consts)
            .map(|(&x, &c)| x * ((c * plaintext_scale).round() / plaintext_scale))
            .collect();
        let noise_seed = self.derive_seed(Op::MulPlain, |h| {
            (a.noise_seed, plaintext_scale.to_bits()).hash(h);
            for c in consts {
                c.to_bits().hash(h);
            }
        });
        Ok(SimCiphertext {
            slots,
            level: a.level,
            scale: a.scale * plaintext_scale,
            noise_seed,
        })
    }

    fn rescale(&self, a: &SimCiphertext) -> Result<SimCiphertext> {
        if a.level == 0 {
            return Err(StatError::Backend("cannot rescale at level 0".into()));
        }
        self.counters.rescales.fetch_add(1, Ordering::Relaxed);
        let mut slots = a.slots.clone();
        let noise_seed = self.derive_seed(Op::Rescale, |h| a.noise_seed.hash(h));
        Self::perturb(&mut slots, self.params.noise_std, noise_seed)?;
        Ok(SimCiphertext {
            slots,
            level: a.level - 1,
            scale: a.scale / self.default_scale(),
            noise_seed,
        })
    }

    fn rotate(&self, a: &SimCiphertext, amount: usize) -> Result<SimCiphertext> {
        self.counters.rotations.fetch_add(1, Ordering::Relaxed);
        let mut slots = a.slots.clone();
        let n = slots.len();
        slots.rotate_left(amount % n);
        Ok(SimCiphertext {
            slots,
            level: a.level,
            scale: a.scale,
            noise_seed: self.derive_seed(Op::Rotate, |h| (a.noise_seed, amount).hash(h)),
        })
    }

    fn conjugate(&self, a: &SimCiphertext) -> Result<SimCiphertext> {
        Ok(SimCiphertext {
            slots: a.slots.iter().map(|x| x.conj()).collect(),
            level: a.level,
            scale: a.scale,
            noise_seed: self.derive_seed(Op::Conjugate, |h| a.noise_seed.hash(h)),
        })
    }

    fn evaluate_polynomial(
        &self,
        a: &SimCiphertext,
        poly: &ChebyshevPoly,
        target_scale: f64,
    ) -> Result<SimCiphertext> {
        let depth = poly.depth();
        if a.level < depth {
            return Err(StatError::Backend(format!(
                "polynomial of depth {depth} at level {}",
                a.level
            )));
        }
        let mut slots: Vec<Complex64> = a.slots.iter().map(|&z| poly.eval_complex(z)).collect();
        let noise_seed = self.derive_seed(Op::Polynomial, |h| {
            (a.noise_seed, target_scale.to_bits()).hash(h);
            for c in &poly.coeffs {
                c.to_bits().hash(h);
            }
        });
        Self::perturb(&mut slots, self.params.noise_std, noise_seed)?;
        Ok(SimCiphertext {
            slots,
            level: a.level - depth,
            scale: target_scale,
            noise_seed,
        })
    }

    fn bootstrap(&self, a: &SimCiphertext) -> Result<SimCiphertext> {
        if !self.params.bootstrapping {
            return Err(StatError::BootstrapUnsupported);
        }
        self.counters.bootstraps.fetch_add(1, Ordering::Relaxed);
        let mut slots = a.slots.clone();
        let noise_seed = self.derive_seed(Op::Bootstrap, |h| a.noise_seed.hash(h));
        Self::perturb(
            &mut slots,
            self.params.noise_std * BOOTSTRAP_NOISE_FACTOR,
            noise_seed,
        )?;
        Ok(SimCiphertext {
            slots,
            level: self.max_level(),
            scale: self.default_scale(),
            noise_seed,
        })
    }
}
