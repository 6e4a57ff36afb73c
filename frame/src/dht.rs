//! Discrete Hartley transform.

use std::sync::Arc;

use rustfft::FftPlanner;
use rustfft::num_complex::Complex;

use crate::error::{FrameError, config};
use crate::source::FrameSource;

/// `H_k = Re X_k − Im X_k` of every frame, computed through an FFT of the
/// frame length. Keeps the frame size.
pub struct Dht<S> {
    source: S,
    input: Vec<f64>,
    buf: Vec<Complex<f64>>,
    scratch: Vec<Complex<f64>>,
    plan: Arc<dyn rustfft::Fft<f64>>,
}

impl<S: FrameSource> Dht<S> {
    pub fn new(source: S) -> Result<Self, FrameError> {
        let n = source.frame_size();
        if n == 0 {
            return Err(config("dht input frame is empty"));
        }
        let plan = FftPlanner::<f64>::new().plan_fft_forward(n);
        Ok(Self {
            source,
            input: vec![0.0; n],
            buf: vec![Complex::new(0.0, 0.0); n],
            scratch: vec![Complex::new(0.0, 0.0); plan.get_inplace_scratch_len()],
            plan,
        })
    }
}

impl<S: FrameSource> FrameSource for Dht<S> {
    fn frame_size(&self) -> usize {
        self.input.len()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        for (c, &x) in self.buf.iter_mut().zip(&self.input) {
            *c = Complex::new(x, 0.0);
        }
        self.plan.process_with_scratch(&mut self.buf, &mut self.scratch);
        for (out, c) in buf.iter_mut().zip(&self.buf) {
            *out = c.re - c.im;
        }
        Ok(true)
    }
}
