//! Source traits of the pipeline and the in-memory sample source.

use crate::error::FrameError;

/// Raw audio supplier feeding the [`Window`](crate::Window) stage.
pub trait SampleSource {
    /// Sample rate in Hz.
    fn sample_rate(&self) -> u32;

    /// Reads up to `buf.len()` samples.
    ///
    /// Returns `Ok(None)` at end of stream. `Ok(Some(0))` means no data is
    /// available yet although the stream has not ended; partial reads are
    /// allowed.
    fn read(&mut self, buf: &mut [f64]) -> Result<Option<usize>, FrameError>;
}

impl<T: SampleSource + ?Sized> SampleSource for Box<T> {
    fn sample_rate(&self) -> u32 {
        (**self).sample_rate()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<Option<usize>, FrameError> {
        (**self).read(buf)
    }
}

/// A pipeline stage producing fixed-size frames.
///
/// `read` writes exactly [`frame_size`](FrameSource::frame_size) values
/// into `buf` and returns `Ok(true)`, or returns `Ok(false)` once the
/// stream is exhausted. Stages are single-threaded and pull from their
/// upstream stage on demand.
pub trait FrameSource {
    fn frame_size(&self) -> usize;

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError>;
}

impl<T: FrameSource + ?Sized> FrameSource for Box<T> {
    fn frame_size(&self) -> usize {
        (**self).frame_size()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        (**self).read(buf)
    }
}

/// Reads every remaining frame of `source`.
pub fn collect_frames<S: FrameSource + ?Sized>(source: &mut S) -> Result<Vec<Vec<f64>>, FrameError> {
    let mut out = Vec::new();
    let mut buf = vec![0.0; source.frame_size()];
    while source.read(&mut buf)? {
        out.push(buf.clone());
    }
    Ok(out)
}

/// In-memory [`SampleSource`].
///
/// With a block size set, every read returns at most that many samples,
/// which exercises the partial-read paths of downstream stages.
#[derive(Debug, Clone)]
pub struct VecSource {
    samples: Vec<f64>,
    pos: usize,
    sample_rate: u32,
    block: Option<usize>,
}

impl VecSource {
    pub fn new(samples: Vec<f64>, sample_rate: u32) -> Self {
        Self {
            samples,
            pos: 0,
            sample_rate,
            block: None,
        }
    }

    /// Limits every read to at most `block` samples.
    pub fn with_block_size(mut self, block: usize) -> Self {
        self.block = Some(block.max(1));
        self
    }

    /// Returns the number of samples not yet read.
    pub fn remaining(&self) -> usize {
        self.samples.len() - self.pos
    }
}

impl SampleSource for VecSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<Option<usize>, FrameError> {
        if self.pos >= self.samples.len() {
            return Ok(None);
        }
        let mut n = buf.len().min(self.remaining());
        if let Some(block) = self.block {
            n = n.min(block);
        }
        buf[..n].copy_from_slice(&self.samples[self.pos..self.pos + n]);
        self.pos += n;
        Ok(Some(n))
    }
}

/// In-memory [`FrameSource`] over precomputed frames.
#[derive(Debug, Clone)]
pub struct VecFrames {
    frames: Vec<Vec<f64>>,
    dim: usize,
    pos: usize,
}

impl VecFrames {
    /// Creates a source of `dim`-sized frames; every frame must have that
    /// length.
    pub fn new(dim: usize, frames: Vec<Vec<f64>>) -> Result<Self, FrameError> {
        if let Some(bad) = frames.iter().find(|f| f.len() != dim) {
            return Err(FrameError::DimensionMismatch {
                expected: dim,
                got: bad.len(),
            });
        }
        Ok(Self { frames, dim, pos: 0 })
    }

    /// Creates a source of one-dimensional frames.
    pub fn scalars(values: &[f64]) -> Self {
        Self {
            frames: values.iter().map(|&v| vec![v]).collect(),
            dim: 1,
            pos: 0,
        }
    }
}

impl FrameSource for VecFrames {
    fn frame_size(&self) -> usize {
        self.dim
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        match self.frames.get(self.pos) {
            Some(f) => {
                buf[..self.dim].copy_from_slice(f);
                self.pos += 1;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
