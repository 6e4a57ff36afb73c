//! F0 candidates from autocorrelation frames.

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, config};
use crate::formants::parabolic_offset;
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PitchParams {
    pub f0_min: f64,
    pub f0_max: f64,
    /// Number of candidates reported.
    pub candidates: usize,
}

impl Default for PitchParams {
    fn default() -> Self {
        Self {
            f0_min: 50.0,
            f0_max: 500.0,
            candidates: 3,
        }
    }
}

impl PitchParams {
    pub(crate) fn validate(&self) -> Result<(), FrameError> {
        if self.f0_min.is_nan() || self.f0_min <= 0.0 || self.f0_max.is_nan() || self.f0_max <= self.f0_min {
            return Err(config(format!(
                "invalid f0 range {} .. {} Hz",
                self.f0_min, self.f0_max
            )));
        }
        Ok(())
    }

    /// Inclusive lag range for an ACF of `n` lags, or `None` if the range
    /// holds no interior lag.
    pub(crate) fn lag_range(&self, sample_rate: u32, n: usize) -> Option<(usize, usize)> {
        let sr = sample_rate as f64;
        let lo = ((sr / self.f0_max).floor() as usize).max(1);
        let hi = ((sr / self.f0_min).ceil() as usize).min(n.saturating_sub(2));
        (lo <= hi).then_some((lo, hi))
    }
}

/// Reports the F0 of the strongest autocorrelation peaks inside
/// `[f0_min, f0_max]`, ordered by normalised correlation `r_k / r_0`.
/// Missing candidates are 0.
pub struct Pitch<S> {
    source: S,
    sample_rate: u32,
    params: PitchParams,
    input: Vec<f64>,
    peaks: Vec<(f64, f64)>,
}

impl<S: FrameSource> Pitch<S> {
    pub fn new(source: S, sample_rate: u32, params: PitchParams) -> Result<Self, FrameError> {
        params.validate()?;
        if params.candidates == 0 {
            return Err(config("pitch candidate count must be positive"));
        }
        let n = source.frame_size();
        if params.lag_range(sample_rate, n).is_none() {
            return Err(config(format!(
                "acf of {n} lags cannot hold f0 {} .. {} Hz at {sample_rate} Hz",
                params.f0_min, params.f0_max
            )));
        }
        Ok(Self {
            source,
            sample_rate,
            params,
            input: vec![0.0; n],
            peaks: Vec::new(),
        })
    }
}

impl<S: FrameSource> FrameSource for Pitch<S> {
    fn frame_size(&self) -> usize {
        self.params.candidates
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        let out = &mut buf[..self.params.candidates];
        out.iter_mut().for_each(|v| *v = 0.0);
        let r = &self.input;
        if r[0] <= 0.0 {
            return Ok(true);
        }
        let Some((lo, hi)) = self.params.lag_range(self.sample_rate, r.len()) else {
            return Ok(true);
        };

        self.peaks.clear();
        for k in lo..=hi {
            if r[k] > 0.0 && r[k] > r[k - 1] && r[k] >= r[k + 1] {
                let lag = k as f64 + parabolic_offset(r[k - 1], r[k], r[k + 1]);
                self.peaks.push((r[k] / r[0], self.sample_rate as f64 / lag));
            }
        }
        self.peaks.sort_by(|a, b| b.0.total_cmp(&a.0));
        for (o, (_, f0)) in out.iter_mut().zip(&self.peaks) {
            *o = *f0;
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::acf::autocorrelation;
    use crate::source::VecFrames;
    use std::f64::consts::PI;

    fn acf_of(x: &[f64]) -> Vec<f64> {
        let mut r = vec![0.0; x.len()];
        autocorrelation(x, &mut r);
        r
    }

    #[test]
    fn test_sine_f0() {
        let x: Vec<f64> = (0..400)
            .map(|i| (2.0 * PI * 200.0 * i as f64 / 8000.0).sin())
            .collect();
        let src = VecFrames::new(400, vec![acf_of(&x)]).unwrap();
        let mut p = Pitch::new(src, 8000, PitchParams::default()).unwrap();
        let mut out = [0.0; 3];
        p.read(&mut out).unwrap();
        assert!((out[0] - 200.0).abs() < 2.0, "f0 {}", out[0]);
    }

    #[test]
    fn test_silence_has_no_candidates() {
        let src = VecFrames::new(400, vec![vec![0.0; 400]]).unwrap();
        let mut p = Pitch::new(src, 8000, PitchParams::default()).unwrap();
        let mut out = [1.0; 3];
        p.read(&mut out).unwrap();
        assert_eq!(out, [0.0; 3]);
    }

    #[test]
    fn test_invalid_range() {
        let src = VecFrames::new(400, vec![]).unwrap();
        let params = PitchParams {
            f0_min: 300.0,
            f0_max: 100.0,
            ..PitchParams::default()
        };
        assert!(Pitch::new(src, 8000, params).is_err());
        let short = VecFrames::new(8, vec![]).unwrap();
        assert!(Pitch::new(short, 8000, PitchParams::default()).is_err());
    }
}
