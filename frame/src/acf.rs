//! Autocorrelation of windowed frames.

use std::sync::Arc;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

use crate::error::{FrameError, config};
use crate::fft::next_pow2;
use crate::source::FrameSource;

/// Linear autocorrelation `r_k = Σ_{i<n−k} x_i x_{i+k}`, `k = 0 .. n`.
pub fn autocorrelation(x: &[f64], out: &mut [f64]) {
    let n = x.len();
    for (k, r) in out.iter_mut().enumerate().take(n) {
        *r = x[..n - k].iter().zip(&x[k..]).map(|(a, b)| a * b).sum();
    }
}

/// Direct O(n²) autocorrelation. Keeps the frame size.
///
/// In VUV passthrough mode, index 0 of the input carries a voiced flag
/// (see [`VuvDetector`](crate::VuvDetector)); it is copied to the output
/// unchanged and the correlation runs over the remaining samples.
pub struct SimpleAcf<S> {
    source: S,
    vuv: bool,
    input: Vec<f64>,
}

impl<S: FrameSource> SimpleAcf<S> {
    pub fn new(source: S, vuv_passthrough: bool) -> Result<Self, FrameError> {
        let n = source.frame_size();
        let min = if vuv_passthrough { 2 } else { 1 };
        if n < min {
            return Err(config(format!("acf needs frames of at least {min} values, got {n}")));
        }
        Ok(Self {
            source,
            vuv: vuv_passthrough,
            input: vec![0.0; n],
        })
    }
}

impl<S: FrameSource> FrameSource for SimpleAcf<S> {
    fn frame_size(&self) -> usize {
        self.input.len()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        let n = self.input.len();
        if self.vuv {
            buf[0] = self.input[0];
            autocorrelation(&self.input[1..], &mut buf[1..n]);
        } else {
            autocorrelation(&self.input, &mut buf[..n]);
        }
        Ok(true)
    }
}

/// Autocorrelation through `IFFT(|FFT(x)|²)` with zero padding to a power
/// of two `>= 2n`, so the result equals the linear autocorrelation.
///
/// Given the weights of the upstream window, the first half of the lags is
/// corrected for the window's own autocorrelation:
/// `r_k · w_0 / w_k` where `w` is the window ACF.
pub struct FastAcf<S> {
    source: S,
    input: Vec<f64>,
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    forward: Arc<dyn rustfft::Fft<f64>>,
    inverse: Arc<dyn rustfft::Fft<f64>>,
    window_acf: Option<Vec<f64>>,
}

impl<S: FrameSource> FastAcf<S> {
    pub fn new(source: S) -> Result<Self, FrameError> {
        let n = source.frame_size();
        if n == 0 {
            return Err(config("acf input frame is empty"));
        }
        let block = next_pow2(2 * n);
        let mut planner = FftPlanner::<f64>::new();
        let forward = planner.plan_fft_forward(block);
        let inverse = planner.plan_fft_inverse(block);
        let scratch_len = forward
            .get_inplace_scratch_len()
            .max(inverse.get_inplace_scratch_len());
        Ok(Self {
            source,
            input: vec![0.0; n],
            buf: vec![Complex::new(0.0, 0.0); block],
            scratch: vec![Complex::new(0.0, 0.0); scratch_len],
            forward,
            inverse,
            window_acf: None,
        })
    }

    /// Creates the stage with window-ACF deconvolution; `weights` are the
    /// weights of the upstream [`Window`](crate::Window).
    pub fn with_window(source: S, weights: Arc<[f64]>) -> Result<Self, FrameError> {
        let mut acf = Self::new(source)?;
        if weights.len() != acf.input.len() {
            return Err(FrameError::DimensionMismatch {
                expected: acf.input.len(),
                got: weights.len(),
            });
        }
        let mut wacf = vec![0.0; weights.len()];
        autocorrelation(&weights, &mut wacf);
        acf.window_acf = Some(wacf);
        Ok(acf)
    }

    /// Returns the block size of the transform.
    pub fn block_size(&self) -> usize {
        self.buf.len()
    }
}

impl<S: FrameSource> FrameSource for FastAcf<S> {
    fn frame_size(&self) -> usize {
        self.input.len()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        let n = self.input.len();
        let block = self.buf.len();
        for (c, &x) in self.buf.iter_mut().zip(&self.input) {
            *c = Complex::new(x, 0.0);
        }
        for c in self.buf[n..].iter_mut() {
            *c = Complex::new(0.0, 0.0);
        }
        self.forward.process_with_scratch(&mut self.buf, &mut self.scratch);
        for c in self.buf.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        self.inverse.process_with_scratch(&mut self.buf, &mut self.scratch);
        let scale = 1.0 / block as f64;
        for (out, c) in buf[..n].iter_mut().zip(&self.buf) {
            *out = c.re * scale;
        }

        if let Some(wacf) = &self.window_acf {
            let w0 = wacf[0];
            for (out, &w) in buf[..n / 2].iter_mut().zip(wacf) {
                if w > f64::EPSILON * w0 {
                    *out *= w0 / w;
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{VecFrames, collect_frames};

    fn frames() -> Vec<Vec<f64>> {
        vec![
            (0..64).map(|i| ((i * 13 % 17) as f64 - 8.0) / 4.0).collect(),
            (0..64).map(|i| (i as f64 * 0.3).sin()).collect(),
        ]
    }

    #[test]
    fn test_simple_acf() {
        let src = VecFrames::new(3, vec![vec![1.0, 2.0, 3.0]]).unwrap();
        let mut acf = SimpleAcf::new(src, false).unwrap();
        let mut out = [0.0; 3];
        acf.read(&mut out).unwrap();
        assert_eq!(out, [14.0, 8.0, 3.0]);
    }

    #[test]
    fn test_vuv_passthrough() {
        let src = VecFrames::new(4, vec![vec![1.0, 1.0, 2.0, 3.0]]).unwrap();
        let mut acf = SimpleAcf::new(src, true).unwrap();
        let mut out = [0.0; 4];
        acf.read(&mut out).unwrap();
        assert_eq!(out, [1.0, 14.0, 8.0, 3.0]);
    }

    #[test]
    fn test_fast_matches_simple() {
        let mut simple = SimpleAcf::new(VecFrames::new(64, frames()).unwrap(), false).unwrap();
        let mut fast = FastAcf::new(VecFrames::new(64, frames()).unwrap()).unwrap();
        assert_eq!(fast.block_size(), 128);
        let a = collect_frames(&mut simple).unwrap();
        let b = collect_frames(&mut fast).unwrap();
        assert_eq!(a.len(), 2);
        for (fa, fb) in a.iter().zip(&b) {
            for (x, y) in fa.iter().zip(fb) {
                assert!((x - y).abs() < 1e-9, "{x} vs {y}");
            }
        }
    }

    #[test]
    fn test_rectangular_window_deconvolution() {
        // wacf of a rectangular window is n - k, so the first half of the
        // lags becomes the unbiased estimate r_k * n / (n - k).
        let x = vec![1.0; 8];
        let src = VecFrames::new(8, vec![x]).unwrap();
        let weights: Arc<[f64]> = vec![1.0; 8].into();
        let mut acf = FastAcf::with_window(src, weights).unwrap();
        let mut out = [0.0; 8];
        acf.read(&mut out).unwrap();
        for v in &out[..4] {
            assert!((v - 8.0).abs() < 1e-9);
        }
        assert!((out[4] - 4.0).abs() < 1e-9);
        assert!((out[7] - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_window_length_must_match() {
        let src = VecFrames::new(8, vec![]).unwrap();
        let weights: Arc<[f64]> = vec![1.0; 4].into();
        assert!(matches!(
            FastAcf::with_window(src, weights),
            Err(FrameError::DimensionMismatch { expected: 8, got: 4 })
        ));
    }
}
