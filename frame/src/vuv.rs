//! Voiced/unvoiced detection and smoothing.

use serde::{Deserialize, Serialize};
use stk_buffer::ContextRing;

use crate::acf::autocorrelation;
use crate::error::{FrameError, config};
use crate::pitch::PitchParams;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VuvParams {
    /// Minimum mean square amplitude of a voiced frame.
    pub energy_threshold: f64,
    /// Maximum zero crossings per sample of a voiced frame.
    pub zcr_threshold: f64,
    /// Minimum normalised autocorrelation peak inside the F0 range.
    pub acf_threshold: f64,
    pub f0_min: f64,
    pub f0_max: f64,
}

impl Default for VuvParams {
    fn default() -> Self {
        Self {
            energy_threshold: 1e-4,
            zcr_threshold: 0.4,
            acf_threshold: 0.3,
            f0_min: 50.0,
            f0_max: 500.0,
        }
    }
}

/// Prefixes every window with a voiced flag (1.0 voiced, 0.0 unvoiced).
///
/// Output layout: `[flag, samples...]`.
pub struct VuvDetector<S> {
    source: S,
    sample_rate: u32,
    params: VuvParams,
    lags: (usize, usize),
    acf: Vec<f64>,
}

impl<S: FrameSource> VuvDetector<S> {
    pub fn new(source: S, sample_rate: u32, params: VuvParams) -> Result<Self, FrameError> {
        let range = PitchParams {
            f0_min: params.f0_min,
            f0_max: params.f0_max,
            candidates: 1,
        };
        range.validate()?;
        let n = source.frame_size();
        let lags = range.lag_range(sample_rate, n).ok_or_else(|| {
            config(format!(
                "window of {n} samples cannot hold f0 {} .. {} Hz at {sample_rate} Hz",
                params.f0_min, params.f0_max
            ))
        })?;
        Ok(Self {
            source,
            sample_rate,
            params,
            lags,
            acf: vec![0.0; n],
        })
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn is_voiced(&mut self, x: &[f64]) -> bool {
        let n = x.len() as f64;
        let energy = x.iter().map(|v| v * v).sum::<f64>() / n;
        if energy <= self.params.energy_threshold {
            return false;
        }
        let crossings = x
            .windows(2)
            .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
            .count();
        if crossings as f64 / (n - 1.0).max(1.0) >= self.params.zcr_threshold {
            return false;
        }
        autocorrelation(x, &mut self.acf);
        let (lo, hi) = self.lags;
        let peak = self.acf[lo..=hi].iter().copied().fold(f64::NEG_INFINITY, f64::max);
        peak / self.acf[0] > self.params.acf_threshold
    }
}

impl<S: FrameSource> FrameSource for VuvDetector<S> {
    fn frame_size(&self) -> usize {
        self.acf.len() + 1
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        let n = self.acf.len();
        if !self.source.read(&mut buf[1..=n])? {
            return Ok(false);
        }
        let voiced = self.is_voiced(&buf[1..=n]);
        buf[0] = if voiced { 1.0 } else { 0.0 };
        Ok(true)
    }
}

// Context on each side of the smoothed decision.
const SMOOTHING_CONTEXT: usize = 2;

/// Smooths the voiced flag at index 0 over five neighbouring decisions.
///
/// With `cnt` the number of decisions in the window equal to the current
/// one (itself included): a voiced frame with `cnt < 3` becomes unvoiced,
/// an unvoiced frame with `cnt < 2` becomes voiced. Decisions are taken on
/// the unsmoothed flags; stream edges repeat the first and last frame.
pub struct VuvSmoothing<S> {
    source: S,
    ring: ContextRing,
}

impl<S: FrameSource> VuvSmoothing<S> {
    pub fn new(source: S) -> Result<Self, FrameError> {
        let dim = source.frame_size();
        if dim == 0 {
            return Err(config("vuv smoothing needs a flag at index 0"));
        }
        Ok(Self {
            source,
            ring: ContextRing::new(dim, SMOOTHING_CONTEXT, SMOOTHING_CONTEXT),
        })
    }
}

impl<S: FrameSource> FrameSource for VuvSmoothing<S> {
    fn frame_size(&self) -> usize {
        self.ring.dim()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        let source = &mut self.source;
        if !self.ring.advance(|b| source.read(b))? {
            return Ok(false);
        }
        let voiced = self.ring.current()[0] > 0.5;
        let cnt = self
            .ring
            .window()
            .filter(|f| (f[0] > 0.5) == voiced)
            .count();
        let smoothed = if voiced { cnt >= 3 } else { cnt < 2 };
        buf[..self.ring.dim()].copy_from_slice(self.ring.current());
        buf[0] = if smoothed { 1.0 } else { 0.0 };
        Ok(true)
    }
}
