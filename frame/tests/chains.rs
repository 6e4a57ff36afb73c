use std::f64::consts::PI;
use std::fs::{self, File};

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal};
use stk_frame::{
    EnergyDetector, Fft, FftParams, FrameSource, MvnAccumulator, PipelineConfig, Pick, Selection,
    SelectionSpec, StageConfig, ThresholdMode, VecSource, Window, WindowFunction, collect_frames,
    one_sided_energy, pipeline,
};

const RATE: u32 = 8000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("stk_frame=debug")
        .try_init();
}

fn sines(freqs: &[f64], n: usize, amplitude: f64) -> Vec<f64> {
    (0..n)
        .map(|i| {
            let t = i as f64 / RATE as f64;
            freqs.iter().map(|f| amplitude * (2.0 * PI * f * t).sin()).sum()
        })
        .collect()
}

/// 0.5 s of low noise, 0.5 s of a 150 Hz tone plus noise, 0.5 s of noise.
fn tone_burst(seed: u64) -> Vec<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 1e-3).unwrap();
    let tone = sines(&[150.0], 4000, 0.5);
    (0..12000)
        .map(|i| {
            let s = if (4000..8000).contains(&i) { tone[i - 4000] } else { 0.0 };
            s + noise.sample(&mut rng)
        })
        .collect()
}

fn window(samples: Vec<f64>) -> Window<VecSource> {
    Window::with_samples(VecSource::new(samples, RATE), WindowFunction::Hamming, 200, 80, false).unwrap()
}

#[test]
fn test_mfcc_chain() {
    init_tracing();
    let samples = sines(&[440.0], 16000, 0.3);
    let mut p = pipeline::build(VecSource::new(samples, 16000), &PipelineConfig::mfcc()).unwrap();
    assert_eq!(p.len(), 6);
    assert_eq!(p.frame_size(), 39);
    let frames = collect_frames(&mut p).unwrap();
    // 25 ms / 10 ms windows over one second.
    assert_eq!(frames.len(), 100);
    assert!(frames.iter().flatten().all(|v| v.is_finite()));
}

#[test]
fn test_fft_energy_matches_window_energy() {
    let samples = tone_burst(1);
    let mut plain = window(samples.clone());
    let mut fft = Fft::new(window(samples), FftParams::default()).unwrap();
    let tap = fft.energy_tap();
    let mut w = vec![0.0; plain.frame_size()];
    let mut s = vec![0.0; fft.frame_size()];
    let mut frames = 0;
    while fft.read(&mut s).unwrap() {
        assert!(plain.read(&mut w).unwrap());
        let time: f64 = w.iter().map(|v| v * v).sum();
        let freq = one_sided_energy(&s, fft.block_size());
        assert!((time - freq).abs() <= 1e-9 * time.max(1e-12));
        assert!((tap.energy() - s.iter().sum::<f64>()).abs() <= 1e-9 * tap.energy().max(1e-12));
        frames += 1;
    }
    assert!(!plain.read(&mut w).unwrap());
    assert_eq!(frames, 150);
}

#[test]
fn test_selection_reads_fft_energy() {
    let samples = tone_burst(2);
    let mut reference = Fft::new(window(samples.clone()), FftParams::default()).unwrap();
    let fft = Fft::new(window(samples), FftParams::default()).unwrap();
    let tap = fft.energy_tap();
    let spec = SelectionSpec {
        picks: vec![Pick::Energy, Pick::Index(0)],
    };
    let mut sel = Selection::new(fft, spec, Some(tap)).unwrap();
    let mut spectrum = vec![0.0; reference.frame_size()];
    let mut out = [0.0; 2];
    while sel.read(&mut out).unwrap() {
        assert!(reference.read(&mut spectrum).unwrap());
        let energy: f64 = spectrum.iter().sum();
        assert!((out[0] - energy.ln()).abs() < 1e-9);
        assert_eq!(out[1], spectrum[0]);
    }
}

#[test]
fn test_vuv_chain() {
    let json = r#"{
        "window": {"function": "hamming", "length_ms": 25, "shift_ms": 10},
        "stages": [
            {"type": "vuv"},
            {"type": "vuv_smoothing"},
            {"type": "acf", "vuv": true}
        ]
    }"#;
    let cfg = PipelineConfig::from_json(json).unwrap();
    let mut p = pipeline::build(VecSource::new(tone_burst(3), RATE), &cfg).unwrap();
    assert_eq!(p.frame_size(), 201);
    let frames = collect_frames(&mut p).unwrap();
    assert_eq!(frames.len(), 150);
    for (k, f) in frames.iter().enumerate() {
        if (52..=95).contains(&k) {
            assert_eq!(f[0], 1.0, "frame {k} should be voiced");
            assert!(f[1] > 0.0);
        }
        if k <= 45 || k >= 102 {
            assert_eq!(f[0], 0.0, "frame {k} should be unvoiced");
        }
    }
}

#[test]
fn test_energy_detector_on_log_energies() {
    let mut w = window(tone_burst(4));
    let energies: Vec<f64> = collect_frames(&mut w)
        .unwrap()
        .iter()
        .map(|f| (f.iter().map(|v| v * v).sum::<f64>() / f.len() as f64 + 1e-10).ln())
        .collect();
    for mode in [ThresholdMode::Mean, ThresholdMode::default()] {
        let flags = EnergyDetector::new(mode).detect(&energies).unwrap();
        for (k, f) in flags.iter().enumerate() {
            if (50..=97).contains(&k) {
                assert!(*f, "{mode:?}: frame {k} should be speech");
            }
            if k <= 47 || k >= 100 {
                assert!(!*f, "{mode:?}: frame {k} should be silence");
            }
        }
    }
}

#[test]
fn test_lpc_formants() {
    let json = r#"{
        "window": {"function": "hamming", "length_ms": 25, "shift_ms": 10},
        "stages": [
            {"type": "acf", "fast": true},
            {"type": "lpc_spectrum", "order": 6},
            {"type": "formants", "count": 3}
        ]
    }"#;
    let mut rng = StdRng::seed_from_u64(5);
    let noise = Normal::new(0.0, 0.01).unwrap();
    let samples: Vec<f64> = sines(&[500.0, 1500.0, 2500.0], 4000, 0.3)
        .into_iter()
        .map(|s| s + noise.sample(&mut rng))
        .collect();
    let cfg = PipelineConfig::from_json(json).unwrap();
    let mut p = pipeline::build(VecSource::new(samples, RATE), &cfg).unwrap();
    let frames = collect_frames(&mut p).unwrap();
    for f in frames.iter().take(40) {
        for (got, want) in f.iter().zip([500.0, 1500.0, 2500.0]) {
            assert!((got - want).abs() < 100.0, "formants {f:?}");
        }
    }
}

#[test]
fn test_context_stages_from_json() {
    let json = r#"{
        "stages": [
            {"type": "fft"},
            {"type": "mel"},
            {"type": "dct", "orthonormal": true},
            {"type": "sdc", "d": 1, "p": 3, "k": 7, "include_static": true}
        ]
    }"#;
    let cfg = PipelineConfig::from_json(json).unwrap();
    let mut p = pipeline::build(VecSource::new(tone_burst(6), RATE), &cfg).unwrap();
    // 8 kHz: the filters above Nyquist collapse onto the last bin.
    let mel = p.frame_size() / 8;
    assert_eq!(p.frame_size(), mel * 8);
    assert_eq!(collect_frames(&mut p).unwrap().len(), 150);

    let mut traps_cfg = cfg.clone();
    traps_cfg.stages[3] = StageConfig::Traps(stk_frame::TrapsParams { rbs: 11, ncoef: 4 });
    let mut p = pipeline::build(VecSource::new(tone_burst(6), RATE), &traps_cfg).unwrap();
    assert_eq!(p.frame_size(), mel * 4);
    assert_eq!(collect_frames(&mut p).unwrap().len(), 150);
}

#[test]
fn test_static_mvn_from_file() {
    let base = PipelineConfig {
        stages: vec![
            StageConfig::Fft(FftParams::default()),
            StageConfig::Mel(Default::default()),
            StageConfig::Dct(Default::default()),
        ],
        ..PipelineConfig::default()
    };
    let mut p = pipeline::build(VecSource::new(tone_burst(7), RATE), &base).unwrap();
    let frames = collect_frames(&mut p).unwrap();
    let mut acc = MvnAccumulator::new(p.frame_size());
    for f in &frames {
        acc.extend(f).unwrap();
    }
    let stats = acc.finish().unwrap();

    let path = std::env::temp_dir().join(format!("stk-frame-mvn-{}.bin", std::process::id()));
    stats.write(&mut File::create(&path).unwrap()).unwrap();

    let mut cfg = base.clone();
    cfg.stages.push(StageConfig::Mvn {
        variance: true,
        stats: Some(path.clone()),
    });
    let mut p = pipeline::build(VecSource::new(tone_burst(7), RATE), &cfg).unwrap();
    let normalized = collect_frames(&mut p).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(normalized.len(), frames.len());
    let n = normalized.len() as f64;
    for d in 0..p.frame_size() {
        let mean = normalized.iter().map(|f| f[d]).sum::<f64>() / n;
        let var = normalized.iter().map(|f| (f[d] - mean).powi(2)).sum::<f64>() / n;
        assert!(mean.abs() < 1e-6, "dim {d} mean {mean}");
        if stats.sigmas[d] > 1e-6 {
            assert!((var - 1.0).abs() < 1e-6, "dim {d} var {var}");
        }
    }
}
