//! Side-channel scalars shared between stages.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Provides atomic operations for f64 values.
///
/// Uses atomic u64 operations internally by bit-casting the f64.
#[derive(Debug)]
pub struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(val: f64) -> Self {
        Self {
            bits: AtomicU64::new(val.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.bits.load(ordering))
    }

    #[inline]
    pub fn store(&self, val: f64, ordering: Ordering) {
        self.bits.store(val.to_bits(), ordering);
    }
}

impl Default for AtomicF64 {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Handle to the raw spectral energy of the most recent FFT frame.
///
/// The [`Fft`](crate::Fft) stage owns the writing side; downstream stages
/// such as [`Selection`](crate::Selection) receive a clone at
/// construction time and read the energy of the frame currently flowing
/// through the chain.
#[derive(Debug, Clone, Default)]
pub struct EnergyTap {
    value: Arc<AtomicF64>,
}

impl EnergyTap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the energy of the last frame.
    pub fn energy(&self) -> f64 {
        self.value.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, energy: f64) {
        self.value.store(energy, Ordering::Release);
    }
}
