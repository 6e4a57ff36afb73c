//! Power spectrum of real frames.

use std::sync::Arc;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, config};
use crate::source::FrameSource;
use crate::tap::EnergyTap;

/// Smallest power of two `>= n`.
pub(crate) fn next_pow2(n: usize) -> usize {
    n.max(1).next_power_of_two()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FftParams {
    /// Zero-pad the input to a power of two.
    pub pad: bool,
    /// Smallest block size when padding.
    pub min_block: usize,
    /// Scale the spectrum to unit energy.
    pub normalize: bool,
}

impl Default for FftParams {
    fn default() -> Self {
        Self {
            pad: true,
            min_block: 512,
            normalize: false,
        }
    }
}

/// One-sided power spectrum `|X_k|²`, `k = 0 ..= N/2`.
///
/// The raw spectral energy (sum of the output bins before normalization)
/// of every frame is published through an [`EnergyTap`].
pub struct Fft<S> {
    source: S,
    in_len: usize,
    block: usize,
    normalize: bool,
    input: Vec<f64>,
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    plan: Arc<dyn rustfft::Fft<f64>>,
    tap: EnergyTap,
}

impl<S: FrameSource> Fft<S> {
    pub fn new(source: S, params: FftParams) -> Result<Self, FrameError> {
        let in_len = source.frame_size();
        if in_len == 0 {
            return Err(config("fft input frame is empty"));
        }
        let block = if params.pad {
            next_pow2(in_len).max(next_pow2(params.min_block))
        } else {
            in_len
        };
        let plan = FftPlanner::<f64>::new().plan_fft_forward(block);
        let scratch = vec![Complex::new(0.0, 0.0); plan.get_inplace_scratch_len()];
        Ok(Self {
            source,
            in_len,
            block,
            normalize: params.normalize,
            input: vec![0.0; in_len],
            buf: vec![Complex::new(0.0, 0.0); block],
            scratch,
            plan,
            tap: EnergyTap::new(),
        })
    }

    /// Transform size `N`.
    pub fn block_size(&self) -> usize {
        self.block
    }

    /// Bin spacing in Hz for the given sample rate.
    pub fn resolution(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.block as f64
    }

    /// Handle to the raw energy of the current frame.
    pub fn energy_tap(&self) -> EnergyTap {
        self.tap.clone()
    }
}

impl<S: FrameSource> FrameSource for Fft<S> {
    fn frame_size(&self) -> usize {
        self.block / 2 + 1
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        for (c, &x) in self.buf.iter_mut().zip(&self.input) {
            *c = Complex::new(x, 0.0);
        }
        for c in self.buf[self.in_len..].iter_mut() {
            *c = Complex::new(0.0, 0.0);
        }
        self.plan.process_with_scratch(&mut self.buf, &mut self.scratch);

        let bins = self.block / 2 + 1;
        let mut energy = 0.0;
        for (out, c) in buf[..bins].iter_mut().zip(&self.buf) {
            *out = c.norm_sqr();
            energy += *out;
        }
        self.tap.set(energy);
        if self.normalize && energy > 0.0 {
            buf[..bins].iter_mut().for_each(|v| *v /= energy);
        }
        Ok(true)
    }
}

/// Time-domain energy of an `N`-point signal from its one-sided power
/// spectrum (Parseval).
pub fn one_sided_energy(spectrum: &[f64], block: usize) -> f64 {
    let half = block / 2;
    let mut total = 0.0;
    for (k, p) in spectrum.iter().enumerate().take(half + 1) {
        let twice = k != 0 && !(block % 2 == 0 && k == half);
        total += if twice { 2.0 * p } else { *p };
    }
    total / block as f64
}
