//! Formant frequencies from LPC spectra.

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, config};
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FormantParams {
    /// Number of formants reported.
    pub count: usize,
    /// Peaks below this frequency are ignored.
    pub min_hz: f64,
}

impl Default for FormantParams {
    fn default() -> Self {
        Self {
            count: 4,
            min_hz: 90.0,
        }
    }
}

/// Picks the lowest `count` peaks of an LPC spectrum.
///
/// Peak positions are refined by parabolic interpolation over the
/// neighbouring bins. Missing formants are reported as 0.
pub struct Formants<S> {
    source: S,
    resolution: f64,
    params: FormantParams,
    input: Vec<f64>,
}

impl<S: FrameSource> Formants<S> {
    /// `resolution` is the bin spacing of the upstream spectrum in Hz.
    pub fn new(source: S, resolution: f64, params: FormantParams) -> Result<Self, FrameError> {
        if params.count == 0 {
            return Err(config("formant count must be positive"));
        }
        if resolution.is_nan() || resolution <= 0.0 {
            return Err(config(format!("invalid spectral resolution {resolution}")));
        }
        let n = source.frame_size();
        if n < 3 {
            return Err(config(format!("formants need at least 3 bins, got {n}")));
        }
        Ok(Self {
            source,
            resolution,
            params,
            input: vec![0.0; n],
        })
    }
}

/// Offset of the vertex of the parabola through `(−1, a) (0, b) (1, c)`.
pub(crate) fn parabolic_offset(a: f64, b: f64, c: f64) -> f64 {
    let denom = a - 2.0 * b + c;
    if denom.abs() < f64::EPSILON {
        0.0
    } else {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    }
}

impl<S: FrameSource> FrameSource for Formants<S> {
    fn frame_size(&self) -> usize {
        self.params.count
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        let out = &mut buf[..self.params.count];
        out.iter_mut().for_each(|v| *v = 0.0);
        let s = &self.input;
        let mut found = 0;
        for k in 1..s.len() - 1 {
            if found == out.len() {
                break;
            }
            if s[k] > s[k - 1] && s[k] >= s[k + 1] {
                let hz = (k as f64 + parabolic_offset(s[k - 1], s[k], s[k + 1])) * self.resolution;
                if hz >= self.params.min_hz {
                    out[found] = hz;
                    found += 1;
                }
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecFrames;

    #[test]
    fn test_parabolic_offset() {
        assert_eq!(parabolic_offset(1.0, 2.0, 1.0), 0.0);
        // y = -(x - 0.25)²
        let f = |x: f64| -(x - 0.25) * (x - 0.25);
        assert!((parabolic_offset(f(-1.0), f(0.0), f(1.0)) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_peaks() {
        let spectrum = vec![5.0, 1.0, 3.0, 1.0, 0.5, 2.0, 2.0, 0.0];
        let src = VecFrames::new(spectrum.len(), vec![spectrum]).unwrap();
        let params = FormantParams { count: 3, min_hz: 0.0 };
        let mut f = Formants::new(src, 100.0, params).unwrap();
        let mut out = [0.0; 3];
        f.read(&mut out).unwrap();
        assert!((out[0] - 200.0).abs() < 1e-9);
        // Plateau at 5..6: offset towards the right neighbour.
        assert!((out[1] - 550.0).abs() < 1e-9);
        assert_eq!(out[2], 0.0);
    }

    #[test]
    fn test_min_frequency() {
        let spectrum = vec![0.0, 1.0, 0.0, 2.0, 0.0];
        let src = VecFrames::new(5, vec![spectrum]).unwrap();
        let params = FormantParams { count: 2, min_hz: 150.0 };
        let mut f = Formants::new(src, 100.0, params).unwrap();
        let mut out = [0.0; 2];
        f.read(&mut out).unwrap();
        assert_eq!(out, [300.0, 0.0]);
    }
}
