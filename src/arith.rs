//! Depth- and scale-aware arithmetic on chunked vectors.

use crate::{
    backend::Backend,
    engine::{Engine, Vector},
    error::{Result, StatError},
    vector::{active_slots, EncryptedVector},
};
use itertools::{EitherOrBoth, Itertools};
use rayon::prelude::*;
use tracing::debug;

/// Relative tolerance for declared-scale equality.
const SCALE_EPS: f64 = 1e-9;

fn check_scales<C>(a: &EncryptedVector<C>, b: &EncryptedVector<C>) -> Result<()> {
    if ((a.scale - b.scale) / a.scale).abs() > SCALE_EPS {
        return Err(StatError::ScaleMismatch {
            left: a.scale,
            right: b.scale,
        });
    }
    Ok(())
}

/// 2^k with k >= 0, exactly.
fn is_power_of_two(c: f64) -> bool {
    c >= 1.0 && c.log2().fract() == 0.0
}

impl<B: Backend> Engine<B> {
    fn combine<F>(&self, a: &Vector<B>, b: &Vector<B>, op: F) -> Result<Vector<B>>
    where
        F: Fn(&B::Ciphertext, &B::Ciphertext) -> Result<B::Ciphertext> + Sync,
    {
        check_scales(a, b)?;
        // unpaired blocks of the longer operand pass through unchanged
        let pairs: Vec<_> = a.blocks.iter().zip_longest(&b.blocks).collect();
        let blocks = pairs
            .into_par_iter()
            .map(|pair| match pair {
                EitherOrBoth::Both(x, y) => op(x, y),
                EitherOrBoth::Left(x) | EitherOrBoth::Right(x) => Ok(x.clone()),
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(EncryptedVector::new(
            blocks,
            a.size.max(b.size),
            a.level.min(b.level),
            a.scale.min(b.scale),
        ))
    }

    /// Slot-wise sum. Blocks of the longer operand without a partner are kept.
    pub fn add(&self, a: &Vector<B>, b: &Vector<B>) -> Result<Vector<B>> {
        self.combine(a, b, |x, y| self.backend().add(x, y))
    }

    /// Slot-wise difference.
    pub fn sub(&self, a: &Vector<B>, b: &Vector<B>) -> Result<Vector<B>> {
        self.combine(a, b, |x, y| self.backend().sub(x, y))
    }

    /// Adds `c` to every slot of every block, tail included.
    pub fn add_constant(&self, a: &Vector<B>, c: f64) -> Result<Vector<B>> {
        let blocks = a
            .blocks
            .par_iter()
            .map(|ct| self.backend().add_scalar(ct, c))
            .collect::<Result<Vec<_>>>()?;
        Ok(a.with_blocks(blocks))
    }

    /// Subtracts `c` from every slot, tail included.
    pub fn sub_constant(&self, a: &Vector<B>, c: f64) -> Result<Vector<B>> {
        self.add_constant(a, -c)
    }

    /// Slot-wise product, rescaled. Consumes one level.
    pub fn multiply(&self, a: &Vector<B>, b: &Vector<B>) -> Result<Vector<B>> {
        check_scales(a, b)?;
        let level = a.level.min(b.level);
        if level < 1 {
            return Err(StatError::InsufficientDepth { level, required: 1 });
        }
        debug!(level, blocks = a.block_count().min(b.block_count()), "multiply");
        let be = self.backend();
        let blocks = a
            .blocks
            .par_iter()
            .zip(b.blocks.par_iter())
            .map(|(x, y)| be.rescale(&be.mul_relin(x, y)?))
            .collect::<Result<Vec<_>>>()?;
        Ok(EncryptedVector::new(
            blocks,
            a.size.min(b.size),
            level - 1,
            a.scale * b.scale / self.default_scale(),
        ))
    }

    /// Multiplies the active slots by `c` and zeroes the tail of the last block.
    ///
    /// An exact power of two `2^k` (k >= 0) is encoded at unit scale and costs
    /// no level; anything else is encoded at Δ and rescaled.
    pub fn multiply_constant(&self, a: &Vector<B>, c: f64) -> Result<Vector<B>> {
        let exact = is_power_of_two(c);
        if !exact && a.level < 1 {
            return Err(StatError::InsufficientDepth {
                level: a.level,
                required: 1,
            });
        }
        let slots = self.slots();
        let plaintext_scale = if exact { 1.0 } else { self.default_scale() };
        let be = self.backend();
        let blocks = a
            .blocks
            .par_iter()
            .enumerate()
            .map(|(i, ct)| {
                let active = active_slots(a.size, slots, i);
                let mut consts = vec![0.0; slots];
                consts[..active].fill(c);
                let prod = be.mul_plain(ct, &consts, plaintext_scale)?;
                if exact {
                    Ok(prod)
                } else {
                    be.rescale(&prod)
                }
            })
            .collect::<Result<Vec<_>>>()?;
        let mut out = a.with_blocks(blocks);
        if !exact {
            out.level -= 1;
        }
        Ok(out)
    }

    /// Total of all slots, replicated into every slot of every block.
    ///
    /// Slots past `size` are summed as well, so they must be zero: encryption
    /// and [`Self::multiply_constant`] leave them that way, [`Self::add_constant`] does not.
    pub fn sum(&self, a: &Vector<B>) -> Result<Vector<B>> {
        let be = self.backend();
        let (first, rest) = a
            .blocks
            .split_first()
            .ok_or_else(|| StatError::InvalidInput("sum of a vector without blocks".into()))?;
        let mut acc = first.clone();
        for ct in rest {
            acc = be.add(&acc, ct)?;
        }
        let mut step = 1;
        while step < self.slots() {
            let rotated = be.rotate(&acc, step)?;
            acc = be.add(&acc, &rotated)?;
            step <<= 1;
        }
        debug!(blocks = a.block_count(), level = a.level, "sum");
        Ok(a.with_blocks(vec![acc; a.block_count()]))
    }

    /// Sum times `1/size`, replicated. Consumes one level; the tail ends up zero.
    pub fn mean(&self, a: &Vector<B>) -> Result<Vector<B>> {
        let total = self.sum(a)?;
        self.multiply_constant(&total, 1.0 / a.size as f64)
    }

    /// Population variance, E[x²] − E[x]². Consumes two levels.
    pub fn variance(&self, a: &Vector<B>) -> Result<Vector<B>> {
        let square_mean = self.mean(&self.multiply(a, a)?)?;
        let mean = self.mean(a)?;
        let mean_square = self.multiply(&mean, &mean)?;
        self.sub(&square_mean, &mean_square)
    }

    /// (Σx²)/square_denom − ((Σx)/mean_denom)².
    ///
    /// With `(n·B, n·B²)` this is σ²/B²; with `(n·√2, 2n)` it is σ²/2.
    pub fn scaled_variance(
        &self,
        a: &Vector<B>,
        mean_denom: f64,
        square_denom: f64,
    ) -> Result<Vector<B>> {
        let mean = self.sum(&self.multiply_constant(a, 1.0 / mean_denom)?)?;
        let mean_term = self.multiply(&mean, &mean)?;
        let squares = self.multiply(a, a)?;
        let square_term = self.sum(&self.multiply_constant(&squares, 1.0 / square_denom)?)?;
        self.sub(&square_term, &mean_term)
    }

    /// Single-block copy of block 0.
    pub fn select_representative(&self, a: &Vector<B>) -> Result<Vector<B>> {
        let first = a
            .blocks
            .first()
            .ok_or_else(|| StatError::InvalidInput("vector without blocks".into()))?;
        Ok(EncryptedVector::new(
            vec![first.clone()],
            a.size.min(self.slots()),
            a.level,
            a.scale,
        ))
    }

    /// Replicate the single block of `a` into `block_count` blocks.
    pub fn broadcast(&self, a: &Vector<B>, block_count: usize, size: usize) -> Result<Vector<B>> {
        let first = a
            .blocks
            .first()
            .ok_or_else(|| StatError::InvalidInput("broadcast of a vector without blocks".into()))?;
        Ok(EncryptedVector::new(
            vec![first.clone(); block_count],
            size,
            a.level,
            a.scale,
        ))
    }
}
