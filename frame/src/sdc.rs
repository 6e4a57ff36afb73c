//! Shifted delta coefficients.

use serde::{Deserialize, Serialize};
use stk_buffer::ContextRing;

use crate::error::{FrameError, config};
use crate::source::FrameSource;

/// `d,p,k`: delta spread, block shift and block count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SdcParams {
    pub d: usize,
    pub p: usize,
    pub k: usize,
    /// Prefix the output with the static frame.
    pub include_static: bool,
}

impl Default for SdcParams {
    fn default() -> Self {
        Self {
            d: 1,
            p: 3,
            k: 7,
            include_static: false,
        }
    }
}

/// Stacks `k` deltas `x[t + ip + d] − x[t + ip − d]`, `i = 0 .. k`.
pub struct Sdc<S> {
    source: S,
    params: SdcParams,
    ring: ContextRing,
}

impl<S: FrameSource> Sdc<S> {
    pub fn new(source: S, params: SdcParams) -> Result<Self, FrameError> {
        if params.d == 0 || params.p == 0 || params.k == 0 {
            return Err(config(format!(
                "sdc parameters must be positive, got {},{},{}",
                params.d, params.p, params.k
            )));
        }
        let dim = source.frame_size();
        if dim == 0 {
            return Err(config("sdc input frame is empty"));
        }
        let right = (params.k - 1) * params.p + params.d;
        Ok(Self {
            source,
            params,
            ring: ContextRing::new(dim, params.d, right),
        })
    }
}

impl<S: FrameSource> FrameSource for Sdc<S> {
    fn frame_size(&self) -> usize {
        let blocks = self.params.k + usize::from(self.params.include_static);
        self.ring.dim() * blocks
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        let source = &mut self.source;
        if !self.ring.advance(|b| source.read(b))? {
            return Ok(false);
        }
        let dim = self.ring.dim();
        let out = &mut buf[..self.frame_size()];
        let deltas = if self.params.include_static {
            let (head, rest) = out.split_at_mut(dim);
            head.copy_from_slice(self.ring.current());
            rest
        } else {
            out
        };
        let (d, p) = (self.params.d as isize, self.params.p as isize);
        for (i, block) in deltas.chunks_exact_mut(dim).enumerate() {
            let base = i as isize * p;
            let plus = self.ring.frame(base + d);
            let minus = self.ring.frame(base - d);
            for ((o, a), b) in block.iter_mut().zip(plus).zip(minus) {
                *o = a - b;
            }
        }
        Ok(true)
    }
}
