//! Discrete cosine transform (type II).

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, config};
use crate::source::FrameSource;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DctParams {
    /// Scale to an orthonormal transform.
    pub orthonormal: bool,
}

/// Precomputed DCT-II of a fixed length.
///
/// `X_k = s_k Σ_n x_n cos(π k (2n + 1) / 2N)` with `s_k = 1`, or the
/// orthonormal scaling `s_0 = √(1/N)`, `s_k = √(2/N)`.
#[derive(Debug, Clone)]
pub struct DctTable {
    n: usize,
    cos: Vec<f64>,
}

impl DctTable {
    pub fn new(n: usize, orthonormal: bool) -> Self {
        let nf = n as f64;
        let mut cos = Vec::with_capacity(n * n);
        for k in 0..n {
            let scale = match (orthonormal, k) {
                (false, _) => 1.0,
                (true, 0) => (1.0 / nf).sqrt(),
                (true, _) => (2.0 / nf).sqrt(),
            };
            for i in 0..n {
                cos.push(scale * (PI * k as f64 * (2 * i + 1) as f64 / (2.0 * nf)).cos());
            }
        }
        Self { n, cos }
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }

    /// Transforms `input` into the first `out.len()` coefficients.
    pub fn apply(&self, input: &[f64], out: &mut [f64]) {
        for (k, o) in out.iter_mut().enumerate().take(self.n) {
            let row = &self.cos[k * self.n..(k + 1) * self.n];
            *o = row.iter().zip(input).map(|(c, x)| c * x).sum();
        }
    }
}

/// DCT-II of every frame. Keeps the frame size.
pub struct Dct<S> {
    source: S,
    table: DctTable,
    input: Vec<f64>,
}

impl<S: FrameSource> Dct<S> {
    pub fn new(source: S, params: DctParams) -> Result<Self, FrameError> {
        let n = source.frame_size();
        if n == 0 {
            return Err(config("dct input frame is empty"));
        }
        Ok(Self {
            source,
            table: DctTable::new(n, params.orthonormal),
            input: vec![0.0; n],
        })
    }
}

impl<S: FrameSource> FrameSource for Dct<S> {
    fn frame_size(&self) -> usize {
        self.table.len()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        self.table.apply(&self.input, &mut buf[..self.table.len()]);
        Ok(true)
    }
}
