//! Pull-based speech feature extraction.
//!
//! A pipeline is a chain of [`FrameSource`] stages. The entry stage,
//! [`Window`], cuts a [`SampleSource`] into overlapping weighted windows;
//! every further stage pulls fixed-size frames from its upstream stage and
//! exposes its own frame size:
//!
//! - spectra: [`Fft`], [`Dct`], [`Dht`], [`LpcSpectrum`]
//! - autocorrelation and prediction: [`SimpleAcf`], [`FastAcf`], [`Lpc`]
//! - derived features: [`FilterBank`], [`Formants`], [`Pitch`],
//!   [`VuvDetector`], [`Selection`], [`Mvn`]
//! - context features over a frame ring: [`Slope`], [`Sdc`], [`Traps`],
//!   [`VuvSmoothing`]
//!
//! Stages are single-threaded; exhaustion is `Ok(false)`, never an error.
//! Side channels between stages (FFT energy, window weights, spectral
//! resolution) are passed explicitly at construction, which
//! [`pipeline::build`] does from a JSON [`PipelineConfig`].
//!
//! [`EnergyDetector`] and [`Segmenter`] work on frame energies outside the
//! pull chain.
//!
//! # Example
//!
//! ```
//! use stk_frame::{FrameSource, PipelineConfig, VecSource, collect_frames, pipeline};
//!
//! let samples: Vec<f64> = (0..16000)
//!     .map(|i| (2.0 * std::f64::consts::PI * 440.0 * i as f64 / 16000.0).sin())
//!     .collect();
//! let mut mfcc = pipeline::build(VecSource::new(samples, 16000), &PipelineConfig::mfcc()).unwrap();
//! assert_eq!(mfcc.frame_size(), 39);
//! let frames = collect_frames(&mut mfcc).unwrap();
//! assert!(!frames.is_empty());
//! ```

mod acf;
mod dct;
mod dht;
mod energy_detector;
mod error;
mod fft;
mod filterbank;
mod formants;
mod lpc;
mod mvn;
mod params;
mod pitch;
mod sdc;
mod segmenter;
mod selection;
mod slope;
mod source;
mod tap;
mod traps;
mod vuv;
mod window;

pub mod pipeline;

pub use acf::{FastAcf, SimpleAcf, autocorrelation};
pub use dct::{Dct, DctParams, DctTable};
pub use dht::Dht;
pub use energy_detector::{BOUNDARY_STEPS, EnergyDetector, Seeding, ThresholdMode, decision_boundary};
pub use error::FrameError;
pub use fft::{Fft, FftParams, one_sided_energy};
pub use filterbank::{Filter, FilterBank, FilterShape, MelParams, VtlnParams, fhz2fmel, fmel2fhz};
pub use formants::{FormantParams, Formants};
pub use lpc::{DEFAULT_ORDER, Lpc, LpcParams, LpcSpectrum, durbin};
pub use mvn::{Mvn, MvnAccumulator, MvnMode, MvnStats};
pub use params::FilterSpec;
pub use pipeline::{Pipeline, PipelineConfig, StageConfig};
pub use pitch::{Pitch, PitchParams};
pub use sdc::{Sdc, SdcParams};
pub use segmenter::{SegmentReport, Segmenter, SegmenterParams, WindowStat};
pub use selection::{Pick, Selection, SelectionSpec};
pub use slope::{Slope, SlopeContext, SlopeParams};
pub use source::{FrameSource, SampleSource, VecFrames, VecSource, collect_frames};
pub use tap::{AtomicF64, EnergyTap};
pub use traps::{Traps, TrapsParams};
pub use vuv::{VuvDetector, VuvParams, VuvSmoothing};
pub use window::{Window, WindowFunction, WindowParams};
