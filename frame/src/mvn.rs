//! Mean and variance normalisation.
//!
//! Parameter file layout (little-endian):
//!
//! ```text
//! [8B sample count] [4B dim] [dim x 8B means] [dim x 8B variances] [dim x 8B sigmas]
//! ```

use std::io::{self, BufReader, BufWriter, Read, Write};

use serde::{Deserialize, Serialize};

use crate::error::{FrameError, config};
use crate::source::FrameSource;

const MAX_DIM: usize = 1 << 16;
// Dimensions with a smaller deviation are only mean-normalised.
const MIN_SIGMA: f64 = 1e-10;

/// Running per-dimension mean and variance (Welford).
#[derive(Debug, Clone, PartialEq)]
pub struct MvnAccumulator {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl MvnAccumulator {
    pub fn new(dim: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; dim],
            m2: vec![0.0; dim],
        }
    }

    pub fn dim(&self) -> usize {
        self.mean.len()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// Adds one frame.
    pub fn extend(&mut self, frame: &[f64]) -> Result<(), FrameError> {
        if frame.len() != self.dim() {
            return Err(FrameError::DimensionMismatch {
                expected: self.dim(),
                got: frame.len(),
            });
        }
        self.count += 1;
        let n = self.count as f64;
        for ((m, s), &x) in self.mean.iter_mut().zip(self.m2.iter_mut()).zip(frame) {
            let delta = x - *m;
            *m += delta / n;
            *s += delta * (x - *m);
        }
        Ok(())
    }

    /// Returns the normalisation parameters of the frames seen so far.
    pub fn finish(&self) -> Result<MvnStats, FrameError> {
        if self.count == 0 {
            return Err(config("mvn statistics need at least one frame"));
        }
        let n = self.count as f64;
        let variances: Vec<f64> = self.m2.iter().map(|s| (s / n).max(0.0)).collect();
        Ok(MvnStats {
            count: self.count as i64,
            means: self.mean.clone(),
            sigmas: variances.iter().map(|v| v.sqrt()).collect(),
            variances,
        })
    }

    fn normalize(&self, frame: &mut [f64], variance: bool) {
        let n = self.count.max(1) as f64;
        for ((x, m), s) in frame.iter_mut().zip(&self.mean).zip(&self.m2) {
            *x = scale(*x - m, variance.then(|| (s / n).max(0.0).sqrt()));
        }
    }
}

fn scale(centered: f64, sigma: Option<f64>) -> f64 {
    match sigma {
        Some(s) if s > MIN_SIGMA => centered / s,
        _ => centered,
    }
}

/// Normalisation parameters, as stored in MVN parameter files.
#[derive(Debug, Clone, PartialEq)]
pub struct MvnStats {
    pub count: i64,
    pub means: Vec<f64>,
    pub variances: Vec<f64>,
    pub sigmas: Vec<f64>,
}

impl MvnStats {
    pub fn dim(&self) -> usize {
        self.means.len()
    }

    /// Subtracts the means and, with `variance`, divides by the sigmas.
    pub fn normalize(&self, frame: &mut [f64], variance: bool) {
        for ((x, m), s) in frame.iter_mut().zip(&self.means).zip(&self.sigmas) {
            *x = scale(*x - m, variance.then_some(*s));
        }
    }

    pub fn write(&self, w: &mut dyn Write) -> Result<(), FrameError> {
        let mut bw = BufWriter::new(w);
        bw.write_all(&self.count.to_le_bytes())?;
        bw.write_all(&(self.dim() as i32).to_le_bytes())?;
        for v in self.means.iter().chain(&self.variances).chain(&self.sigmas) {
            bw.write_all(&v.to_le_bytes())?;
        }
        bw.flush()?;
        Ok(())
    }

    pub fn read(r: &mut dyn Read) -> Result<MvnStats, FrameError> {
        let mut br = BufReader::new(r);
        let mut b8 = [0u8; 8];
        br.read_exact(&mut b8).map_err(truncated)?;
        let count = i64::from_le_bytes(b8);
        let mut b4 = [0u8; 4];
        br.read_exact(&mut b4).map_err(truncated)?;
        let dim = i32::from_le_bytes(b4);
        if count < 0 || dim <= 0 || dim as usize > MAX_DIM {
            return Err(FrameError::InvalidFormat(format!(
                "invalid mvn header: count {count}, dim {dim}"
            )));
        }
        let dim = dim as usize;
        let mut read_vec = || -> Result<Vec<f64>, FrameError> {
            let mut v = Vec::with_capacity(dim);
            for _ in 0..dim {
                br.read_exact(&mut b8).map_err(truncated)?;
                v.push(f64::from_le_bytes(b8));
            }
            Ok(v)
        };
        let means = read_vec()?;
        let variances = read_vec()?;
        let sigmas = read_vec()?;
        Ok(MvnStats {
            count,
            means,
            variances,
            sigmas,
        })
    }
}

fn truncated(e: io::Error) -> FrameError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        FrameError::InvalidFormat("truncated mvn parameters".into())
    } else {
        FrameError::Io(e)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MvnMode {
    /// Fixed parameters computed beforehand.
    Static,
    /// Parameters updated with every frame.
    #[default]
    Running,
}

enum MvnState {
    Static(MvnStats),
    Running(MvnAccumulator),
}

/// Normalises every frame to zero mean and, optionally, unit variance.
pub struct Mvn<S> {
    source: S,
    variance: bool,
    state: MvnState,
}

impl<S: FrameSource> Mvn<S> {
    /// Normalises with fixed parameters.
    pub fn with_stats(source: S, stats: MvnStats, variance: bool) -> Result<Self, FrameError> {
        if stats.dim() != source.frame_size()
            || stats.variances.len() != stats.dim()
            || stats.sigmas.len() != stats.dim()
        {
            return Err(FrameError::DimensionMismatch {
                expected: source.frame_size(),
                got: stats.dim(),
            });
        }
        Ok(Self {
            source,
            variance,
            state: MvnState::Static(stats),
        })
    }

    /// Normalises with the statistics of all frames up to and including
    /// the current one.
    pub fn running(source: S, variance: bool) -> Result<Self, FrameError> {
        let dim = source.frame_size();
        if dim == 0 {
            return Err(config("mvn input frame is empty"));
        }
        Ok(Self {
            source,
            variance,
            state: MvnState::Running(MvnAccumulator::new(dim)),
        })
    }

    pub fn mode(&self) -> MvnMode {
        match self.state {
            MvnState::Static(_) => MvnMode::Static,
            MvnState::Running(_) => MvnMode::Running,
        }
    }
}

impl<S: FrameSource> FrameSource for Mvn<S> {
    fn frame_size(&self) -> usize {
        self.source.frame_size()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        let dim = self.frame_size();
        let frame = &mut buf[..dim];
        if !self.source.read(frame)? {
            return Ok(false);
        }
        match &mut self.state {
            MvnState::Static(stats) => stats.normalize(frame, self.variance),
            MvnState::Running(acc) => {
                acc.extend(frame)?;
                acc.normalize(frame, self.variance);
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{VecFrames, collect_frames};
    use std::io::Cursor;

    fn frames() -> Vec<Vec<f64>> {
        vec![vec![1.0, 10.0], vec![3.0, 10.0], vec![5.0, 10.0]]
    }

    #[test]
    fn test_accumulator() {
        let mut acc = MvnAccumulator::new(2);
        for f in frames() {
            acc.extend(&f).unwrap();
        }
        let stats = acc.finish().unwrap();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.means, vec![3.0, 10.0]);
        assert!((stats.variances[0] - 8.0 / 3.0).abs() < 1e-12);
        assert_eq!(stats.variances[1], 0.0);
        assert!((stats.sigmas[0] - (8.0f64 / 3.0).sqrt()).abs() < 1e-12);
        assert!(acc.extend(&[1.0]).is_err());
        assert!(MvnAccumulator::new(2).finish().is_err());
    }

    #[test]
    fn test_file_layout() {
        let stats = MvnStats {
            count: 3,
            means: vec![1.0],
            variances: vec![4.0],
            sigmas: vec![2.0],
        };
        let mut buf = Vec::new();
        stats.write(&mut buf).unwrap();
        assert_eq!(buf.len(), 8 + 4 + 3 * 8);
        assert_eq!(&buf[..8], &3i64.to_le_bytes());
        assert_eq!(&buf[8..12], &1i32.to_le_bytes());
        assert_eq!(&buf[20..28], &4.0f64.to_le_bytes());
        let back = MvnStats::read(&mut Cursor::new(&buf)).unwrap();
        assert_eq!(back, stats);

        buf.pop();
        assert!(matches!(
            MvnStats::read(&mut Cursor::new(&buf)),
            Err(FrameError::InvalidFormat(_))
        ));
    }

    #[test]
    fn test_static() {
        let mut acc = MvnAccumulator::new(2);
        for f in frames() {
            acc.extend(&f).unwrap();
        }
        let stats = acc.finish().unwrap();
        let src = VecFrames::new(2, frames()).unwrap();
        let mut mvn = Mvn::with_stats(src, stats, true).unwrap();
        assert_eq!(mvn.mode(), MvnMode::Static);
        let out = collect_frames(&mut mvn).unwrap();
        let s = (8.0f64 / 3.0).sqrt();
        assert!((out[0][0] + 2.0 / s).abs() < 1e-12);
        assert_eq!(out[1][0], 0.0);
        // Constant dimension is only centred.
        assert_eq!(out[2][1], 0.0);
    }

    #[test]
    fn test_running() {
        let src = VecFrames::new(2, frames()).unwrap();
        let mut mvn = Mvn::running(src, false).unwrap();
        let out = collect_frames(&mut mvn).unwrap();
        assert_eq!(out[0], vec![0.0, 0.0]);
        assert_eq!(out[1], vec![1.0, 0.0]);
        assert_eq!(out[2], vec![2.0, 0.0]);
    }
}
