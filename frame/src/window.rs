//! Overlapping, weighted sample windows: the entry stage of a pipeline.

use std::f64::consts::PI;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FrameError, config};
use crate::source::{FrameSource, SampleSource};

/// Window weighting function.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WindowFunction {
    #[default]
    Hamming,
    Hann,
    Triangular,
    Rectangular,
}

impl WindowFunction {
    /// Computes the `n` weights of the window.
    pub fn weights(self, n: usize) -> Vec<f64> {
        if n <= 1 {
            return vec![1.0; n];
        }
        let m = (n - 1) as f64;
        (0..n)
            .map(|i| {
                let x = i as f64;
                match self {
                    WindowFunction::Hamming => 0.54 - 0.46 * (2.0 * PI * x / m).cos(),
                    WindowFunction::Hann => 0.5 - 0.5 * (2.0 * PI * x / m).cos(),
                    WindowFunction::Triangular => 1.0 - ((x - m / 2.0) / (m / 2.0)).abs(),
                    WindowFunction::Rectangular => 1.0,
                }
            })
            .collect()
    }
}

/// Window parameters in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowParams {
    pub function: WindowFunction,
    pub length_ms: f64,
    pub shift_ms: f64,
    /// Remove the DC offset of incoming samples.
    pub remove_dc: bool,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            function: WindowFunction::Hamming,
            length_ms: 25.0,
            shift_ms: 10.0,
            remove_dc: false,
        }
    }
}

// Pole of the DC blocker y[n] = x[n] - x[n-1] + R y[n-1].
const DC_POLE: f64 = 0.999;

/// Cuts a sample stream into overlapping windows and applies the
/// weighting function.
///
/// The first read pulls a full window of `nsw` samples; every further read
/// pulls `nss` (shift) new samples into a ring of `nsw`. Short upstream
/// reads at end of stream are zero-padded; once the padding amounts to a
/// full window the stage reports exhaustion.
#[derive(Debug)]
pub struct Window<S> {
    source: S,
    function: WindowFunction,
    nsw: usize,
    nss: usize,
    weights: Arc<[f64]>,
    ring: Vec<f64>,
    // Ring index of the oldest sample.
    offset: usize,
    helper: Vec<f64>,
    padded: usize,
    started: bool,
    exhausted: bool,
    remove_dc: bool,
    dc_in: f64,
    dc_out: f64,
}

impl<S: SampleSource> Window<S> {
    /// Creates a window from millisecond parameters.
    pub fn new(source: S, params: WindowParams) -> Result<Self, FrameError> {
        if params.length_ms.is_nan() || params.length_ms <= 0.0 || params.shift_ms.is_nan() || params.shift_ms <= 0.0 {
            return Err(config(format!(
                "window length and shift must be positive, got {} ms / {} ms",
                params.length_ms, params.shift_ms
            )));
        }
        let rate = source.sample_rate() as f64;
        let nsw = (rate * params.length_ms / 1000.0).round() as usize;
        let nss = (rate * params.shift_ms / 1000.0).round() as usize;
        Self::with_samples(source, params.function, nsw, nss, params.remove_dc)
    }

    /// Creates a window of `nsw` samples advancing by `nss` samples.
    /// A shift longer than the window is clamped to the window length.
    pub fn with_samples(
        source: S,
        function: WindowFunction,
        nsw: usize,
        nss: usize,
        remove_dc: bool,
    ) -> Result<Self, FrameError> {
        if nsw == 0 || nss == 0 {
            return Err(config(format!(
                "window needs positive length and shift, got {nsw} / {nss} samples"
            )));
        }
        let nss = nss.min(nsw);
        debug!(?function, nsw, nss, remove_dc, "window configured");
        Ok(Self {
            source,
            function,
            nsw,
            nss,
            weights: function.weights(nsw).into(),
            ring: vec![0.0; nsw],
            offset: 0,
            helper: vec![0.0; nss],
            padded: 0,
            started: false,
            exhausted: false,
            remove_dc,
            dc_in: 0.0,
            dc_out: 0.0,
        })
    }

    /// Window length in samples.
    pub fn len(&self) -> usize {
        self.nsw
    }

    /// Always false: windows hold at least one sample.
    pub fn is_empty(&self) -> bool {
        self.nsw == 0
    }

    /// Window shift in samples.
    pub fn shift(&self) -> usize {
        self.nss
    }

    pub fn function(&self) -> WindowFunction {
        self.function
    }

    pub fn sample_rate(&self) -> u32 {
        self.source.sample_rate()
    }

    /// Shared, immutable window weights.
    pub fn weights(&self) -> Arc<[f64]> {
        Arc::clone(&self.weights)
    }

    /// Fills `buf` from the source, blocking on empty reads. Returns the
    /// number of genuine samples; the rest of `buf` is zeroed.
    fn fill(&mut self, which: Fill) -> Result<usize, FrameError> {
        let buf = match which {
            Fill::Ring => &mut self.ring[..],
            Fill::Helper => &mut self.helper[..],
        };
        let mut got = 0;
        while got < buf.len() {
            match self.source.read(&mut buf[got..])? {
                Some(0) => std::thread::yield_now(),
                Some(n) => got += n,
                None => break,
            }
        }
        buf[got..].iter_mut().for_each(|v| *v = 0.0);
        if self.remove_dc {
            for v in buf[..got].iter_mut() {
                let y = *v - self.dc_in + DC_POLE * self.dc_out;
                self.dc_in = *v;
                self.dc_out = y;
                *v = y;
            }
        }
        Ok(got)
    }
}

#[derive(Clone, Copy)]
enum Fill {
    Ring,
    Helper,
}

impl<S: SampleSource> FrameSource for Window<S> {
    fn frame_size(&self) -> usize {
        self.nsw
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if self.exhausted {
            return Ok(false);
        }
        if !self.started {
            self.started = true;
            let got = self.fill(Fill::Ring)?;
            self.padded += self.nsw - got;
            self.offset = 0;
        } else {
            let got = self.fill(Fill::Helper)?;
            self.padded += self.nss - got;
            for i in 0..self.nss {
                self.ring[(self.offset + i) % self.nsw] = self.helper[i];
            }
            self.offset = (self.offset + self.nss) % self.nsw;
        }
        if self.padded >= self.nsw {
            self.exhausted = true;
            return Ok(false);
        }
        for (i, (out, w)) in buf.iter_mut().zip(self.weights.iter()).enumerate() {
            *out = self.ring[(self.offset + i) % self.nsw] * w;
        }
        Ok(true)
    }
}
