//! JSON-configurable stage chains.

use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::acf::{FastAcf, SimpleAcf};
use crate::dct::{Dct, DctParams};
use crate::dht::Dht;
use crate::error::{FrameError, config};
use crate::fft::{Fft, FftParams};
use crate::filterbank::{FilterBank, MelParams};
use crate::formants::{FormantParams, Formants};
use crate::lpc::{Lpc, LpcParams, LpcSpectrum};
use crate::mvn::{Mvn, MvnStats};
use crate::params::FilterSpec;
use crate::pitch::{Pitch, PitchParams};
use crate::sdc::{Sdc, SdcParams};
use crate::selection::{Selection, SelectionSpec};
use crate::slope::{Slope, SlopeParams};
use crate::source::{FrameSource, SampleSource};
use crate::tap::EnergyTap;
use crate::traps::{Traps, TrapsParams};
use crate::vuv::{VuvDetector, VuvParams, VuvSmoothing};
use crate::window::{Window, WindowParams};

/// One stage after the window, tagged by `type` in JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StageConfig {
    Fft(FftParams),
    Dct(DctParams),
    Dht,
    Acf {
        /// FFT based instead of direct computation.
        #[serde(default)]
        fast: bool,
        /// Input carries a voiced flag at index 0 (direct only).
        #[serde(default)]
        vuv: bool,
        /// Correct for the window autocorrelation (fast only, directly
        /// after the window).
        #[serde(default)]
        deconvolve: bool,
    },
    Lpc {
        order: usize,
    },
    LpcSpectrum(LpcParams),
    Mel(MelParams),
    /// Explicit filters in `FilterSpec` notation.
    Filters {
        spec: String,
    },
    Formants(FormantParams),
    Pitch(PitchParams),
    Vuv(VuvParams),
    VuvSmoothing,
    /// Selection in `SelectionSpec` notation, e.g. `"E,1-12"`.
    Selection {
        spec: String,
    },
    Mvn {
        #[serde(default)]
        variance: bool,
        /// Parameter file for static normalisation; running otherwise.
        #[serde(default)]
        stats: Option<PathBuf>,
    },
    Slope(SlopeParams),
    Sdc(SdcParams),
    Traps(TrapsParams),
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub window: WindowParams,
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    pub fn from_json(s: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn to_json(&self) -> Result<String, FrameError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Log energy and 12 cepstra from 25 ms Hamming windows, with first
    /// and second derivatives.
    pub fn mfcc() -> Self {
        Self {
            window: WindowParams::default(),
            stages: vec![
                StageConfig::Fft(FftParams::default()),
                StageConfig::Mel(MelParams::default()),
                StageConfig::Dct(DctParams::default()),
                StageConfig::Selection {
                    spec: "E,1-12".into(),
                },
                StageConfig::Slope(SlopeParams::default()),
            ],
        }
    }
}

/// A built chain; reads frames of the last stage.
pub struct Pipeline {
    head: Box<dyn FrameSource>,
    sample_rate: u32,
    stages: usize,
}

impl Pipeline {
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Number of stages, window included.
    pub fn len(&self) -> usize {
        self.stages
    }

    pub fn is_empty(&self) -> bool {
        self.stages == 0
    }
}

impl FrameSource for Pipeline {
    fn frame_size(&self) -> usize {
        self.head.frame_size()
    }

    fn read(&mut self, buf: &mut [f64]) -> Result<bool, FrameError> {
        self.head.read(buf)
    }
}

// Capabilities handed from earlier stages to later ones.
#[derive(Default)]
struct Wiring {
    // Weights of the window, while its frames are still unchanged.
    window_weights: Option<Arc<[f64]>>,
    // Raw energy of the last FFT.
    energy: Option<EnergyTap>,
    // Bin spacing, while frames are spectra.
    resolution: Option<f64>,
}

/// Builds the chain described by `config` on top of `source`.
pub fn build<S: SampleSource + 'static>(source: S, config: &PipelineConfig) -> Result<Pipeline, FrameError> {
    let sample_rate = source.sample_rate();
    let window = Window::new(source, config.window)?;
    let mut wiring = Wiring {
        window_weights: Some(window.weights()),
        ..Wiring::default()
    };
    let mut head: Box<dyn FrameSource> = Box::new(window);

    for stage in &config.stages {
        let weights = wiring.window_weights.take();
        let resolution = wiring.resolution.take();
        let need_resolution = || {
            resolution.ok_or_else(|| config_error(stage, "needs a spectrum (fft or lpc_spectrum) upstream"))
        };
        head = match stage {
            StageConfig::Fft(p) => {
                let fft = Fft::new(head, *p)?;
                wiring.energy = Some(fft.energy_tap());
                wiring.resolution = Some(fft.resolution(sample_rate));
                Box::new(fft)
            }
            StageConfig::Dct(p) => Box::new(Dct::new(head, *p)?),
            StageConfig::Dht => Box::new(Dht::new(head)?),
            StageConfig::Acf { fast, vuv, deconvolve } => match (fast, deconvolve) {
                (false, true) => return Err(config_error(stage, "deconvolution needs the fast acf")),
                (true, _) if *vuv => return Err(config_error(stage, "vuv passthrough needs the direct acf")),
                (true, true) => {
                    let w = weights.ok_or_else(|| config_error(stage, "deconvolution must follow the window"))?;
                    Box::new(FastAcf::with_window(head, w)?)
                }
                (true, false) => Box::new(FastAcf::new(head)?),
                (false, false) => Box::new(SimpleAcf::new(head, *vuv)?),
            },
            StageConfig::Lpc { order } => Box::new(Lpc::new(head, *order)?),
            StageConfig::LpcSpectrum(p) => {
                let s = LpcSpectrum::new(head, *p)?;
                wiring.resolution = Some(s.resolution(sample_rate));
                Box::new(s)
            }
            StageConfig::Mel(p) => Box::new(FilterBank::mel(head, need_resolution()?, p)?),
            StageConfig::Filters { spec } => {
                let spec: FilterSpec = spec.parse()?;
                Box::new(FilterBank::new(head, spec.filters)?)
            }
            StageConfig::Formants(p) => Box::new(Formants::new(head, need_resolution()?, *p)?),
            StageConfig::Pitch(p) => Box::new(Pitch::new(head, sample_rate, *p)?),
            StageConfig::Vuv(p) => Box::new(VuvDetector::new(head, sample_rate, *p)?),
            StageConfig::VuvSmoothing => Box::new(VuvSmoothing::new(head)?),
            StageConfig::Selection { spec } => {
                let spec: SelectionSpec = spec.parse()?;
                let energy = if spec.needs_energy() { wiring.energy.clone() } else { None };
                Box::new(Selection::new(head, spec, energy)?)
            }
            StageConfig::Mvn { variance, stats } => match stats {
                Some(path) => {
                    let mut file = File::open(path)?;
                    let stats = MvnStats::read(&mut file)?;
                    Box::new(Mvn::with_stats(head, stats, *variance)?)
                }
                None => Box::new(Mvn::running(head, *variance)?),
            },
            StageConfig::Slope(p) => Box::new(Slope::new(head, p)?),
            StageConfig::Sdc(p) => Box::new(Sdc::new(head, *p)?),
            StageConfig::Traps(p) => Box::new(Traps::new(head, *p)?),
        };
    }

    info!(
        stages = config.stages.len() + 1,
        frame_size = head.frame_size(),
        sample_rate,
        "pipeline built"
    );
    Ok(Pipeline {
        head,
        sample_rate,
        stages: config.stages.len() + 1,
    })
}

fn config_error(stage: &StageConfig, msg: &str) -> FrameError {
    config(format!("{stage:?}: {msg}"))
}
