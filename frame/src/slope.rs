//! Regression derivatives over a temporal context.

use serde::{Deserialize, Serialize};
use stk_buffer::ContextRing;

use crate::error::{FrameError, config};
use crate::source::FrameSource;

const TIROL: [f64; 3] = [0.25, 0.5, 0.25];

/// Derivative of `order` (1 to 3) estimated over `size` frames (odd).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlopeContext {
    pub size: usize,
    pub order: usize,
}

impl SlopeContext {
    pub fn new(size: usize, order: usize) -> Self {
        Self { size, order }
    }

    pub fn half(&self) -> usize {
        self.size / 2
    }

    /// Weights `w_τ`, `τ = −K ..= K`, such that `Σ w_τ x_τ` is the
    /// `order`-th derivative at τ = 0 of the least squares polynomial of
    /// degree `order` through the context.
    ///
    /// Built from the orthogonal polynomials of the symmetric grid:
    /// `P1 = τ`, `P2 = τ² − S2/N`, `P3 = τ³ − (S4/S2) τ`, giving
    /// `w_τ = order! · P(τ) / Σ P²`.
    pub fn weights(&self) -> Result<Vec<f64>, FrameError> {
        if self.size < 3 || self.size % 2 == 0 {
            return Err(config(format!(
                "slope context must be odd and at least 3, got {}",
                self.size
            )));
        }
        if !(1..=3).contains(&self.order) || self.size < self.order + 2 {
            return Err(config(format!(
                "slope order {} not supported over {} frames",
                self.order, self.size
            )));
        }
        let k = self.half() as isize;
        let taus: Vec<f64> = (-k..=k).map(|t| t as f64).collect();
        let n = taus.len() as f64;
        let s2: f64 = taus.iter().map(|t| t * t).sum();
        let s4: f64 = taus.iter().map(|t| t.powi(4)).sum();
        let (p, factorial): (Vec<f64>, f64) = match self.order {
            1 => (taus.clone(), 1.0),
            2 => (taus.iter().map(|t| t * t - s2 / n).collect(), 2.0),
            _ => (taus.iter().map(|t| t.powi(3) - s4 / s2 * t).collect(), 6.0),
        };
        let norm: f64 = p.iter().map(|v| v * v).sum();
        Ok(p.iter().map(|v| factorial * v / norm).collect())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SlopeParams {
    /// Smooth the static coefficients with the 3-tap kernel `[¼ ½ ¼]`.
    pub tirol: bool,
    pub contexts: Vec<SlopeContext>,
}

impl Default for SlopeParams {
    fn default() -> Self {
        Self {
            tirol: false,
            contexts: vec![SlopeContext::new(5, 1), SlopeContext::new(5, 2)],
        }
    }
}

/// Appends one derivative block per context to the static frame.
///
/// Output layout: `[static, d_1, .., d_m]`, each of the input dimension.
pub struct Slope<S> {
    source: S,
    ring: ContextRing,
    tirol: bool,
    // Per context: half width and weights.
    weights: Vec<(usize, Vec<f64>)>,
}

impl<S: FrameSource> Slope<S> {
    pub fn new(source: S, params: &SlopeParams) -> Result<Self, FrameError> {
        let dim = source.frame_size();
        if dim == 0 {
            return Err(config("slope input frame is empty"));
        }
        if params.contexts.is_empty() {
            return Err(config("slope needs at least one context"));
        }
        let weights = params
            .contexts
            .iter()
            .map(|c| Ok((c.half(), c.weights()?)))
            .collect::<Result<Vec<_>, FrameError>>()?;
        let mut reach = weights.iter().map(|(k, _)| *k).max().unwrap_or(0);
        if params.tirol {
            reach = reach.max(1);
        }
        Ok(Self {
            source,
            ring: ContextRing::new(dim, reach, reach),
            tirol: params.tirol,
            weights,
        })
    }
}

impl<S: FrameSource> FrameSource for Slope<S> {
    fn frame_size(&self) -> usize {
        self.ring.dim() * (1 + self.weights.len())
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        let source = &mut self.source;
        if !self.ring.advance(|b| source.read(b))? {
            return Ok(false);
        }
        let dim = self.ring.dim();
        let (head, rest) = buf[..self.frame_size()].split_at_mut(dim);
        if self.tirol {
            head.iter_mut().for_each(|v| *v = 0.0);
            for (off, w) in (-1isize..=1).zip(TIROL) {
                for (h, x) in head.iter_mut().zip(self.ring.frame(off)) {
                    *h += w * x;
                }
            }
        } else {
            head.copy_from_slice(self.ring.current());
        }

        for ((k, w), block) in self.weights.iter().zip(rest.chunks_exact_mut(dim)) {
            block.iter_mut().for_each(|v| *v = 0.0);
            let k = *k as isize;
            for (off, wt) in (-k..=k).zip(w) {
                for (b, x) in block.iter_mut().zip(self.ring.frame(off)) {
                    *b += wt * x;
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

    fn apply(w: &[f64], f: impl Fn(f64) -> f64) -> f64 {
        let k = (w.len() / 2) as isize;
        (-k..=k).zip(w).map(|(t, w)| w * f(t as f64)).sum()
    }

    #[test]
    fn test_weights() {
        let w = SlopeContext::new(5, 1).weights().unwrap();
        assert_eq!(w, vec![-0.2, -0.1, 0.0, 0.1, 0.2]);
        let w = SlopeContext::new(5, 2).weights().unwrap();
        assert!((apply(&w, |t| t * t) - 2.0).abs() < 1e-12);
        assert!(apply(&w, |t| 3.0 + t).abs() < 1e-12);
        let w = SlopeContext::new(7, 3).weights().unwrap();
        assert!((apply(&w, |t| t.powi(3)) - 6.0).abs() < 1e-12);
        assert!(apply(&w, |t| t + t * t).abs() < 1e-12);
    }

    #[test]
    fn test_invalid_contexts() {
        assert!(SlopeContext::new(4, 1).weights().is_err());
        assert!(SlopeContext::new(1, 1).weights().is_err());
        assert!(SlopeContext::new(3, 3).weights().is_err());
        assert!(SlopeContext::new(5, 4).weights().is_err());
    }

    #[test]
    fn test_first_derivative_scenario() {
        let src = VecFrames::scalars(&[1.0, 2.0, 3.0, 4.0, 5.0]);
        let params = SlopeParams {
            tirol: false,
            contexts: vec![SlopeContext::new(3, 1)],
        };
        let mut slope = Slope::new(src, &params).unwrap();
        assert_eq!(slope.frame_size(), 2);
        let out = collect_frames(&mut slope).unwrap();
        let statics: Vec<f64> = out.iter().map(|f| f[0]).collect();
        let deltas: Vec<f64> = out.iter().map(|f| f[1]).collect();
        assert_eq!(statics, vec![1.0, 2.0, 3.0, 4.0, 5.0]);
        assert_eq!(deltas, vec![0.5, 1.0, 1.0, 1.0, 0.5]);
    }

    #[test]
    fn test_tirol_smoothing() {
        let src = VecFrames::scalars(&[0.0, 4.0, 0.0]);
        let params = SlopeParams {
            tirol: true,
            contexts: vec![SlopeContext::new(3, 1)],
        };
        let mut slope = Slope::new(src, &params).unwrap();
        let out = collect_frames(&mut slope).unwrap();
        let statics: Vec<f64> = out.iter().map(|f| f[0]).collect();
        assert_eq!(statics, vec![1.0, 2.0, 1.0]);
    }

    #[test]
    fn test_multiple_dims_and_contexts() {
        let frames: Vec<Vec<f64>> = (0..6).map(|t| vec![t as f64, 2.0 * t as f64]).collect();
        let src = VecFrames::new(2, frames).unwrap();
        let mut slope = Slope::new(src, &SlopeParams::default()).unwrap();
        assert_eq!(slope.frame_size(), 6);
        let out = collect_frames(&mut slope).unwrap();
        assert_eq!(out.len(), 6);
        // Interior of a ramp: slope 1 and 2, no curvature.
        let mid = &out[2];
        assert!((mid[2] - 1.0).abs() < 1e-12 && (mid[3] - 2.0).abs() < 1e-12);
        assert!(mid[4].abs() < 1e-12 && mid[5].abs() < 1e-12);
    }
}
