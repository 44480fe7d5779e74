//! Memory budget for resident bricks
//!
//! A fixed ceiling and a running usage counter. Admissions reserve bytes,
//! evictions and releases restore them. While usage is within the ceiling,
//! `used + available` equals the ceiling.

use serde::Serialize;

/// GPU memory budget for the residency cache
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct MemoryBudget {
    /// Maximum memory allowed (bytes)
    ceiling: u64,
    /// Memory reserved by resident resources (bytes)
    used: u64,
}

impl MemoryBudget {
    /// Create a new memory budget
    ///
    /// # Arguments
    /// * `ceiling_bytes` - Maximum resident memory in bytes
    pub fn new(ceiling_bytes: u64) -> Self {
        Self {
            ceiling: ceiling_bytes,
            used: 0,
        }
    }

    /// Budget that never forces an eviction
    pub fn unlimited() -> Self {
        Self::new(u64::MAX)
    }

    // --- Tracking methods ---

    /// Reserve memory for an admission
    ///
    /// # Returns
    /// False (and nothing reserved) if fewer than `bytes` are available
    pub fn reserve(&mut self, bytes: u64) -> bool {
        if !self.can_fit(bytes) {
            return false;
        }
        self.used += bytes;
        true
    }

    /// Return memory of a released resource
    pub fn restore(&mut self, bytes: u64) {
        self.used = self.used.saturating_sub(bytes);
    }

    /// Change the ceiling, keeping the used amount
    ///
    /// If the new ceiling is below current usage, `available` drops to 0
    /// and the cache is expected to evict before the next admission.
    pub fn set_ceiling(&mut self, ceiling_bytes: u64) {
        self.ceiling = ceiling_bytes;
    }

    // --- Query methods ---

    pub fn ceiling(&self) -> u64 {
        self.ceiling
    }

    pub fn available(&self) -> u64 {
        self.ceiling.saturating_sub(self.used)
    }

    pub fn used(&self) -> u64 {
        self.used
    }

    /// Whether `bytes` could be reserved right now
    pub fn can_fit(&self, bytes: u64) -> bool {
        self.available() >= bytes
    }

    /// Memory pressure (0.0 to 1.0)
    pub fn pressure(&self) -> f32 {
        if self.ceiling == 0 {
            return 0.0;
        }
        (self.used as f64 / self.ceiling as f64) as f32
    }
}
