//! Linear prediction from autocorrelation frames.

use std::sync::Arc;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};

use crate::error::{FrameError, config};
use crate::fft::next_pow2;
use crate::source::FrameSource;

pub const DEFAULT_ORDER: usize = 14;

// Floor of |A(e^jw)|² in the LPC spectrum.
const MIN_DENOMINATOR: f64 = 1e-12;

/// Levinson-Durbin recursion.
///
/// Returns the `order + 1` coefficients of `A(z) = 1 + Σ a_j z^-j` (with
/// `a_0 = 1`) and the final prediction error. An order beyond the available
/// lags is truncated (the remaining coefficients stay 0); a non-positive
/// `acf[0]` or a non-finite lag yields the trivial predictor with error 0.
pub fn durbin(acf: &[f64], order: usize) -> (Vec<f64>, f64) {
    let mut a = vec![0.0; order + 1];
    a[0] = 1.0;
    if acf.is_empty() || acf[0].is_nan() || acf[0] <= 0.0 {
        return (a, 0.0);
    }
    let p = order.min(acf.len() - 1);
    if acf[..=p].iter().any(|r| !r.is_finite()) {
        return (a, 0.0);
    }
    let mut err = acf[0];
    let mut prev = a.clone();
    for i in 1..=p {
        let mut acc = acf[i];
        for j in 1..i {
            acc += a[j] * acf[i - j];
        }
        let k = -acc / err;
        prev[..i].copy_from_slice(&a[..i]);
        for j in 1..i {
            a[j] = prev[j] + k * prev[i - j];
        }
        a[i] = k;
        err *= 1.0 - k * k;
        if err <= 0.0 {
            // Singular autocorrelation: the signal is perfectly predictable.
            err = 0.0;
            break;
        }
    }
    (a, err)
}

/// LPC coefficients of every autocorrelation frame.
///
/// Output layout: `[a_1 .. a_p, error]`.
pub struct Lpc<S> {
    source: S,
    order: usize,
    input: Vec<f64>,
}

impl<S: FrameSource> Lpc<S> {
    pub fn new(source: S, order: usize) -> Result<Self, FrameError> {
        let n = source.frame_size();
        check_order(order, n)?;
        Ok(Self {
            source,
            order,
            input: vec![0.0; n],
        })
    }
}

impl<S: FrameSource> FrameSource for Lpc<S> {
    fn frame_size(&self) -> usize {
        self.order + 1
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        let (a, err) = durbin(&self.input, self.order);
        buf[..self.order].copy_from_slice(&a[1..]);
        buf[self.order] = err;
        Ok(true)
    }
}

fn check_order(order: usize, acf_len: usize) -> Result<(), FrameError> {
    if order == 0 || order >= acf_len {
        return Err(config(format!(
            "lpc order must be in 1..{acf_len}, got {order}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LpcParams {
    pub order: usize,
    /// Smallest transform size.
    pub min_block: usize,
    /// Scale the spectrum to unit sum.
    pub normalize: bool,
}

impl Default for LpcParams {
    fn default() -> Self {
        Self {
            order: DEFAULT_ORDER,
            min_block: 512,
            normalize: false,
        }
    }
}

/// Smoothed spectral envelope `e / |A(e^jw)|²` of every autocorrelation
/// frame.
///
/// The transform size is a power of two `>= max(min_block, n)` for input
/// frames of `n` lags, so the bins line up with an [`Fft`](crate::Fft) of
/// the same window.
pub struct LpcSpectrum<S> {
    source: S,
    order: usize,
    normalize: bool,
    input: Vec<f64>,
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    plan: Arc<dyn rustfft::Fft<f64>>,
}

impl<S: FrameSource> LpcSpectrum<S> {
    pub fn new(source: S, params: LpcParams) -> Result<Self, FrameError> {
        let n = source.frame_size();
        check_order(params.order, n)?;
        let block = next_pow2(n).max(next_pow2(params.min_block));
        let plan = FftPlanner::<f64>::new().plan_fft_forward(block);
        Ok(Self {
            source,
            order: params.order,
            normalize: params.normalize,
            input: vec![0.0; n],
            buf: vec![Complex::new(0.0, 0.0); block],
            scratch: vec![Complex::new(0.0, 0.0); plan.get_inplace_scratch_len()],
            plan,
        })
    }

    /// Creates the stage with the default block size.
    ///
    /// `order` is not used: the model order is always [`DEFAULT_ORDER`].
    /// Existing configurations depend on this; use [`LpcSpectrum::new`] to
    /// choose the order.
    pub fn with_normalization(source: S, _order: usize, normalize: bool) -> Result<Self, FrameError> {
        Self::new(
            source,
            LpcParams {
                normalize,
                ..LpcParams::default()
            },
        )
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn block_size(&self) -> usize {
        self.buf.len()
    }

    /// Bin spacing in Hz for the given sample rate.
    pub fn resolution(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.buf.len() as f64
    }
}

impl<S: FrameSource> FrameSource for LpcSpectrum<S> {
    fn frame_size(&self) -> usize {
        self.buf.len() / 2 + 1
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        let (a, err) = durbin(&self.input, self.order);
        for c in self.buf.iter_mut() {
            *c = Complex::new(0.0, 0.0);
        }
        for (c, &v) in self.buf.iter_mut().zip(&a) {
            *c = Complex::new(v, 0.0);
        }
        self.plan.process_with_scratch(&mut self.buf, &mut self.scratch);

        let bins = self.frame_size();
        let mut sum = 0.0;
        for (out, c) in buf[..bins].iter_mut().zip(&self.buf) {
            *out = err / c.norm_sqr().max(MIN_DENOMINATOR);
            sum += *out;
        }
        if self.normalize && sum > 0.0 {
            buf[..bins].iter_mut().for_each(|v| *v /= sum);
        }
        Ok(true)
    }
}
