//! Dimension subsetting with an optional short-time energy channel.

use crate::error::{FrameError, config};
use crate::source::FrameSource;
use crate::tap::EnergyTap;

const MIN_ENERGY: f64 = 1e-10;

/// One output dimension of a [`Selection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pick {
    /// Copies the input dimension at this index.
    Index(usize),
    /// `ln` of the raw spectral energy of the current frame.
    Energy,
}

/// Ordered list of picks, usually parsed from strings like `"E,1-12"`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SelectionSpec {
    pub picks: Vec<Pick>,
}

impl SelectionSpec {
    pub fn needs_energy(&self) -> bool {
        self.picks.contains(&Pick::Energy)
    }
}

/// Selects and reorders input dimensions.
///
/// [`Pick::Energy`] reads the energy from an [`EnergyTap`] handed in at
/// construction, normally the one of the [`Fft`](crate::Fft) stage
/// upstream. The tap holds the energy of the frame the FFT produced last,
/// so it matches the selected frame only when no context stage sits
/// between the two.
pub struct Selection<S> {
    source: S,
    picks: Vec<Pick>,
    energy: Option<EnergyTap>,
    input: Vec<f64>,
}

impl<S: FrameSource> Selection<S> {
    pub fn new(source: S, spec: SelectionSpec, energy: Option<EnergyTap>) -> Result<Self, FrameError> {
        let n = source.frame_size();
        if spec.picks.is_empty() {
            return Err(config("selection is empty"));
        }
        for p in &spec.picks {
            match p {
                Pick::Index(i) if *i >= n => {
                    return Err(config(format!("selected index {i} outside frame of {n}")));
                }
                Pick::Energy if energy.is_none() => {
                    return Err(config("energy selected but no energy source is available"));
                }
                _ => {}
            }
        }
        Ok(Self {
            source,
            picks: spec.picks,
            energy,
            input: vec![0.0; n],
        })
    }
}

impl<S: FrameSource> FrameSource for Selection<S> {
    fn frame_size(&self) -> usize {
        self.picks.len()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        for (out, p) in buf.iter_mut().zip(&self.picks) {
            *out = match p {
                Pick::Index(i) => self.input[*i],
                Pick::Energy => self
                    .energy
                    .as_ref()
                    .map_or(0.0, |tap| tap.energy().max(MIN_ENERGY).ln()),
            };
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::VecFrames;

    #[test]
    fn test_reorders() {
        let src = VecFrames::new(4, vec![vec![10.0, 11.0, 12.0, 13.0]]).unwrap();
        let spec = SelectionSpec {
            picks: vec![Pick::Index(3), Pick::Index(0), Pick::Index(3)],
        };
        let mut s = Selection::new(src, spec, None).unwrap();
        let mut out = [0.0; 3];
        s.read(&mut out).unwrap();
        assert_eq!(out, [13.0, 10.0, 13.0]);
    }

    #[test]
    fn test_energy_channel() {
        let tap = EnergyTap::new();
        tap.set(std::f64::consts::E.powi(3));
        let src = VecFrames::new(2, vec![vec![1.0, 2.0]]).unwrap();
        let spec = SelectionSpec {
            picks: vec![Pick::Energy, Pick::Index(1)],
        };
        let mut s = Selection::new(src, spec, Some(tap)).unwrap();
        let mut out = [0.0; 2];
        s.read(&mut out).unwrap();
        assert!((out[0] - 3.0).abs() < 1e-12);
        assert_eq!(out[1], 2.0);
    }

    #[test]
    fn test_rejects_invalid() {
        let spec = SelectionSpec {
            picks: vec![Pick::Energy],
        };
        assert!(Selection::new(VecFrames::new(2, vec![]).unwrap(), spec, None).is_err());
        let spec = SelectionSpec {
            picks: vec![Pick::Index(2)],
        };
        assert!(Selection::new(VecFrames::new(2, vec![]).unwrap(), spec, None).is_err());
    }
}
