//! TRAPS: per-band temporal DCT.

use serde::{Deserialize, Serialize};
use stk_buffer::ContextRing;

use crate::dct::DctTable;
use crate::error::{FrameError, config};
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrapsParams {
    /// Frames in the temporal context (odd).
    pub rbs: usize,
    /// DCT coefficients kept per band.
    pub ncoef: usize,
}

impl Default for TrapsParams {
    fn default() -> Self {
        Self { rbs: 31, ncoef: 16 }
    }
}

/// For every input dimension, the DCT of its trajectory over `rbs` frames
/// centred on the current one.
///
/// Output layout is band-major: `[band0 c0..c(n-1), band1 ...]`.
pub struct Traps<S> {
    source: S,
    ncoef: usize,
    table: DctTable,
    ring: ContextRing,
    trajectory: Vec<f64>,
}

impl<S: FrameSource> Traps<S> {
    pub fn new(source: S, params: TrapsParams) -> Result<Self, FrameError> {
        if params.rbs == 0 || params.rbs % 2 == 0 {
            return Err(config(format!("traps context must be odd, got {}", params.rbs)));
        }
        if params.ncoef == 0 || params.ncoef > params.rbs {
            return Err(config(format!(
                "traps keeps 1..={} coefficients, got {}",
                params.rbs, params.ncoef
            )));
        }
        let dim = source.frame_size();
        if dim == 0 {
            return Err(config("traps input frame is empty"));
        }
        let half = params.rbs / 2;
        Ok(Self {
            source,
            ncoef: params.ncoef,
            table: DctTable::new(params.rbs, false),
            ring: ContextRing::new(dim, half, half),
            trajectory: vec![0.0; params.rbs],
        })
    }
}

impl<S: FrameSource> FrameSource for Traps<S> {
    fn frame_size(&self) -> usize {
        self.ring.dim() * self.ncoef
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        let source = &mut self.source;
        if !self.ring.advance(|b| source.read(b))? {
            return Ok(false);
        }
        let out = buf[..self.frame_size()].chunks_exact_mut(self.ncoef);
        for (band, coefs) in out.enumerate() {
            for (t, frame) in self.trajectory.iter_mut().zip(self.ring.window()) {
                *t = frame[band];
            }
            self.table.apply(&self.trajectory, coefs);
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{VecFrames, collect_frames};

    #[test]
    fn test_constant_bands() {
        let frames = vec![vec![1.0, -2.0]; 6];
        let params = TrapsParams { rbs: 5, ncoef: 3 };
        let mut traps = Traps::new(VecFrames::new(2, frames).unwrap(), params).unwrap();
        assert_eq!(traps.frame_size(), 6);
        let out = collect_frames(&mut traps).unwrap();
        assert_eq!(out.len(), 6);
        for f in &out {
            assert!((f[0] - 5.0).abs() < 1e-12);
            assert!(f[1].abs() < 1e-12 && f[2].abs() < 1e-12);
            assert!((f[3] + 10.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_trajectory_order() {
        // Rising trajectory: the first DCT coefficient is negative for
        // cos(π (2n + 1) / 2N) decreasing in n.
        let src = VecFrames::scalars(&[0.0, 1.0, 2.0]);
        let mut traps = Traps::new(src, TrapsParams { rbs: 3, ncoef: 2 }).unwrap();
        let out = collect_frames(&mut traps).unwrap();
        assert!((out[1][0] - 3.0).abs() < 1e-12);
        assert!(out[1][1] < 0.0);
    }

    #[test]
    fn test_invalid() {
        assert!(Traps::new(VecFrames::scalars(&[1.0]), TrapsParams { rbs: 4, ncoef: 2 }).is_err());
        assert!(Traps::new(VecFrames::scalars(&[1.0]), TrapsParams { rbs: 3, ncoef: 4 }).is_err());
    }
}
