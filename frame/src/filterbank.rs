//! Filter banks over spectral frames, including Mel layout and VTLN.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FrameError, config};
use crate::source::FrameSource;

// Floor applied before log compression.
const LOG_FLOOR: f64 = 1e-10;

/// Hz to Mel: `1127 ln(1 + f / 700)`.
pub fn fhz2fmel(hz: f64) -> f64 {
    1127.0 * (1.0 + hz / 700.0).ln()
}

/// Mel to Hz.
pub fn fmel2fhz(mel: f64) -> f64 {
    700.0 * ((mel / 1127.0).exp() - 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterShape {
    Rectangular,
    #[default]
    Triangular,
}

/// Weighted sum over the inclusive index range `start ..= end`.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    start: usize,
    end: usize,
    shape: FilterShape,
    log: bool,
    weights: Vec<f64>,
}

impl Filter {
    pub fn new(start: usize, end: usize, shape: FilterShape, log: bool) -> Result<Self, FrameError> {
        if start > end {
            return Err(config(format!("filter start {start} is after end {end}")));
        }
        let len = end - start + 1;
        let weights = match shape {
            FilterShape::Rectangular => vec![1.0; len],
            FilterShape::Triangular => {
                let half = (len - 1) as f64 / 2.0;
                (0..len)
                    .map(|i| 1.0 - (i as f64 - half).abs() / (half + 1.0))
                    .collect()
            }
        };
        Ok(Self {
            start,
            end,
            shape,
            log,
            weights,
        })
    }

    pub fn start(&self) -> usize {
        self.start
    }

    pub fn end(&self) -> usize {
        self.end
    }

    pub fn shape(&self) -> FilterShape {
        self.shape
    }

    pub fn is_log(&self) -> bool {
        self.log
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Applies the filter to a frame.
    pub fn apply(&self, frame: &[f64]) -> f64 {
        let sum: f64 = frame[self.start..=self.end]
            .iter()
            .zip(&self.weights)
            .map(|(x, w)| x * w)
            .sum();
        if self.log { sum.max(LOG_FLOOR).ln() } else { sum }
    }
}

/// Piecewise-linear vocal tract length warp.
///
/// Frequencies between the cutoffs are scaled by `1 / warp`; the outer
/// segments are linear so that `low_hz` and `high_hz` map to themselves.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VtlnParams {
    pub low_cutoff: f64,
    pub high_cutoff: f64,
    pub warp: f64,
}

impl Default for VtlnParams {
    fn default() -> Self {
        Self {
            low_cutoff: 200.0,
            high_cutoff: 5500.0,
            warp: 1.0,
        }
    }
}

impl VtlnParams {
    /// Checks the cutoffs against the filter bank range.
    pub fn validate(&self, low_hz: f64, high_hz: f64) -> Result<(), FrameError> {
        if self.low_cutoff.is_nan() || self.low_cutoff <= low_hz {
            return Err(config(format!(
                "vtln low cutoff {} must be above the low frequency {low_hz}",
                self.low_cutoff
            )));
        }
        if self.high_cutoff.is_nan() || self.high_cutoff >= high_hz {
            return Err(config(format!(
                "vtln high cutoff {} must be below the high frequency {high_hz}",
                self.high_cutoff
            )));
        }
        if self.warp.is_nan() || self.warp <= 0.0 {
            return Err(config(format!("vtln warp factor must be positive, got {}", self.warp)));
        }
        Ok(())
    }

    /// Warps `hz`; frequencies outside `[low_hz, high_hz]` are unchanged.
    pub fn warp_frequency(&self, hz: f64, low_hz: f64, high_hz: f64) -> f64 {
        if hz < low_hz || hz > high_hz {
            return hz;
        }
        let l = self.low_cutoff * self.warp.max(1.0);
        let h = self.high_cutoff * self.warp.min(1.0);
        let scale = 1.0 / self.warp;
        if hz < l {
            let fl = scale * l;
            low_hz + (fl - low_hz) / (l - low_hz) * (hz - low_hz)
        } else if hz < h {
            scale * hz
        } else {
            let fh = scale * h;
            high_hz + (high_hz - fh) / (high_hz - h) * (hz - high_hz)
        }
    }
}

/// Mel filter bank layout.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MelParams {
    pub low_hz: f64,
    pub high_hz: f64,
    /// Filter width in Mel.
    pub width: f64,
    /// Fraction of a filter shared with its neighbour, in `[0, 1)`.
    pub overlap: f64,
    pub shape: FilterShape,
    pub log: bool,
    pub vtln: Option<VtlnParams>,
}

impl Default for MelParams {
    fn default() -> Self {
        Self {
            low_hz: 188.0,
            high_hz: 6071.0,
            width: 226.79982,
            overlap: 0.5,
            shape: FilterShape::Triangular,
            log: true,
            vtln: None,
        }
    }
}

impl MelParams {
    /// Lays out the filters over a spectrum of `bins` bins spaced
    /// `resolution` Hz apart.
    pub fn filters(&self, resolution: f64, bins: usize) -> Result<Vec<Filter>, FrameError> {
        if resolution.is_nan() || resolution <= 0.0 || bins == 0 {
            return Err(config(format!(
                "mel filters need a positive resolution and bins, got {resolution} Hz / {bins}"
            )));
        }
        if self.low_hz < 0.0 || self.low_hz.is_nan() || self.high_hz.is_nan() || self.high_hz <= self.low_hz {
            return Err(config(format!(
                "invalid mel frequency range {} .. {} Hz",
                self.low_hz, self.high_hz
            )));
        }
        if self.width.is_nan() || self.width <= 0.0 || !(0.0..1.0).contains(&self.overlap) {
            return Err(config(format!(
                "invalid mel filter width {} / overlap {}",
                self.width, self.overlap
            )));
        }
        if let Some(vtln) = &self.vtln {
            vtln.validate(self.low_hz, self.high_hz)?;
        }

        let to_bin = |mel: f64| {
            let mut hz = fmel2fhz(mel);
            if let Some(vtln) = &self.vtln {
                hz = vtln.warp_frequency(hz, self.low_hz, self.high_hz);
            }
            ((hz / resolution).round() as usize).min(bins - 1)
        };

        let lo = fhz2fmel(self.low_hz);
        let hi = fhz2fmel(self.high_hz);
        let step = self.width * (1.0 - self.overlap);
        let mut filters = Vec::new();
        let mut i = 0;
        loop {
            let start = lo + i as f64 * step;
            let end = start + self.width;
            if end > hi + 1e-9 {
                break;
            }
            filters.push(Filter::new(to_bin(start), to_bin(end), self.shape, self.log)?);
            i += 1;
        }
        if filters.is_empty() {
            return Err(config(format!(
                "mel range {} .. {} Hz holds no filter of width {}",
                self.low_hz, self.high_hz, self.width
            )));
        }
        debug!(count = filters.len(), resolution, "mel filters laid out");
        Ok(filters)
    }
}

/// Applies a list of filters to every frame; one output value per filter.
pub struct FilterBank<S> {
    source: S,
    filters: Vec<Filter>,
    input: Vec<f64>,
}

impl<S: FrameSource> FilterBank<S> {
    pub fn new(source: S, filters: Vec<Filter>) -> Result<Self, FrameError> {
        let n = source.frame_size();
        if filters.is_empty() {
            return Err(config("filter bank has no filters"));
        }
        if let Some(f) = filters.iter().find(|f| f.end >= n) {
            return Err(config(format!(
                "filter {}..={} exceeds the input frame of {n}",
                f.start, f.end
            )));
        }
        Ok(Self {
            source,
            filters,
            input: vec![0.0; n],
        })
    }

    /// Creates a Mel filter bank for a spectrum with bins `resolution` Hz
    /// apart.
    pub fn mel(source: S, resolution: f64, params: &MelParams) -> Result<Self, FrameError> {
        let filters = params.filters(resolution, source.frame_size())?;
        Self::new(source, filters)
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }
}

impl<S: FrameSource> FrameSource for FilterBank<S> {
    fn frame_size(&self) -> usize {
        self.filters.len()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        if !self.source.read(&mut self.input)? {
            return Ok(false);
        }
        for (out, f) in buf.iter_mut().zip(&self.filters) {
            *out = f.apply(&self.input);
        }
        Ok(true)
    }
}
