//! Chunked encrypted vector.

/// A logical vector of `size` values spread over blocks of at most `S` slots.
///
/// Every block shares `level` and `scale`. Slots past `size` in the last block
/// are not guaranteed to be zero; reductions rely on masking.
#[derive(Clone, Debug)]
pub struct EncryptedVector<C> {
    /// Ciphertexts, `block_count_for(size, S)` of them
    pub blocks: Vec<C>,
    /// Logical length
    pub size: usize,
    /// Remaining multiplicative depth
    pub level: usize,
    /// Declared fixed-point scale
    pub scale: f64,
}

impl<C> EncryptedVector<C> {
    /// Wraps blocks with their metadata. Nothing is checked.
    pub fn new(blocks: Vec<C>, size: usize, level: usize, scale: f64) -> Self {
        Self {
            blocks,
            size,
            level,
            scale,
        }
    }

    /// Number of ciphertexts.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Same metadata, new blocks.
    pub(crate) fn with_blocks(&self, blocks: Vec<C>) -> Self {
        Self {
            blocks,
            size: self.size,
            level: self.level,
            scale: self.scale,
        }
    }
}

/// Number of blocks needed for `size` values with `slots` per block.
pub fn block_count_for(size: usize, slots: usize) -> usize {
    size.div_ceil(slots)
}

/// Active slots of block `index` in a vector of `size` values.
pub fn active_slots(size: usize, slots: usize, index: usize) -> usize {
    size.saturating_sub(index * slots).min(slots)
}
