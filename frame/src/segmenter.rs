//! Online speech/silence segmentation.
//!
//! A producer thread feeds samples through [`Segmenter::process_samples`];
//! a consumer thread calls [`Segmenter::update`] to publish the windows
//! computed so far and recompute the segmentation. The two sides only
//! meet in the pending-window handoff. Published window lists are never
//! modified: every update builds a new list and report without holding
//! the lock readers take, then swaps the `Arc`s.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{FrameError, config};

const EPSILON: f64 = 1e-10;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SegmenterParams {
    /// Analysis window length.
    pub window_ms: f64,
    /// Radius of the opening; removes speech runs shorter than
    /// `2 * opening + 1` windows.
    pub opening: usize,
    /// Radius of the closing; fills pauses shorter than `2 * closing + 1`
    /// windows.
    pub closing: usize,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self {
            window_ms: 10.0,
            opening: 2,
            closing: 5,
        }
    }
}

/// Statistics of one analysis window.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WindowStat {
    /// Mean square amplitude.
    pub energy: f64,
    /// Peak absolute amplitude.
    pub amplitude: f64,
}

impl WindowStat {
    fn of(samples: &[f64]) -> Self {
        let n = samples.len().max(1) as f64;
        Self {
            energy: samples.iter().map(|x| x * x).sum::<f64>() / n,
            amplitude: samples.iter().fold(0.0, |m, x| f64::max(m, x.abs())),
        }
    }
}

/// Segmentation of the windows published so far.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SegmentReport {
    /// Geometric mean of the window energies.
    pub threshold: f64,
    /// Smoothed speech flag per window.
    pub speech: Vec<bool>,
    /// `10 log10(speech energy) − 10 log10(silence energy)` in dB.
    pub snr_db: f64,
    /// Silence before the first speech window, in seconds.
    pub initial_silence: f64,
    /// Silence after the last speech window, in seconds.
    pub terminal_silence: f64,
}

#[derive(Debug, Default)]
struct Published {
    stats: Arc<Vec<WindowStat>>,
    report: Arc<SegmentReport>,
}

#[derive(Debug)]
pub struct Segmenter {
    params: SegmenterParams,
    window: usize,
    window_secs: f64,
    // Producer side: samples of the incomplete window.
    carry: Mutex<Vec<f64>>,
    // Handoff.
    pending: Mutex<Vec<WindowStat>>,
    // Serializes consumers; readers never wait on it.
    consumer: Mutex<()>,
    // Consumer side.
    published: Mutex<Published>,
}

impl Segmenter {
    pub fn new(sample_rate: u32, params: SegmenterParams) -> Result<Self, FrameError> {
        if sample_rate == 0 || params.window_ms.is_nan() || params.window_ms <= 0.0 {
            return Err(config(format!(
                "segmenter needs a positive rate and window, got {sample_rate} Hz / {} ms",
                params.window_ms
            )));
        }
        let window = ((sample_rate as f64 * params.window_ms / 1000.0).round() as usize).max(1);
        Ok(Self {
            params,
            window,
            window_secs: window as f64 / sample_rate as f64,
            carry: Mutex::new(Vec::with_capacity(window)),
            pending: Mutex::new(Vec::new()),
            consumer: Mutex::new(()),
            published: Mutex::new(Published::default()),
        })
    }

    /// Window length in samples.
    pub fn window_len(&self) -> usize {
        self.window
    }

    /// Producer: consumes samples and queues the statistics of every
    /// completed window.
    pub fn process_samples(&self, samples: &[f64]) {
        let mut carry = self.carry.lock();
        let mut done = Vec::new();
        let mut rest = samples;
        while !rest.is_empty() {
            let take = (self.window - carry.len()).min(rest.len());
            carry.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if carry.len() == self.window {
                done.push(WindowStat::of(&carry));
                carry.clear();
            }
        }
        if !done.is_empty() {
            self.pending.lock().extend(done);
        }
    }

    /// Producer: queues the incomplete trailing window, if any.
    pub fn flush(&self) {
        let mut carry = self.carry.lock();
        if !carry.is_empty() {
            let stat = WindowStat::of(&carry);
            carry.clear();
            self.pending.lock().push(stat);
        }
    }

    /// Consumer: publishes pending windows and recomputes the
    /// segmentation.
    pub fn update(&self) -> Arc<SegmentReport> {
        let _turn = self.consumer.lock();
        let fresh = std::mem::take(&mut *self.pending.lock());
        if fresh.is_empty() {
            return self.report();
        }
        let base = self.stats();
        let mut stats = Vec::with_capacity(base.len() + fresh.len());
        stats.extend_from_slice(&base);
        stats.extend(fresh);
        let stats = Arc::new(stats);
        let report = Arc::new(analyze(&stats, &self.params, self.window_secs));
        debug!(
            windows = stats.len(),
            threshold = report.threshold,
            snr_db = report.snr_db,
            "segmentation updated"
        );
        *self.published.lock() = Published {
            stats,
            report: report.clone(),
        };
        report
    }

    /// Last published segmentation.
    pub fn report(&self) -> Arc<SegmentReport> {
        self.published.lock().report.clone()
    }

    /// Window statistics published so far.
    pub fn stats(&self) -> Arc<Vec<WindowStat>> {
        self.published.lock().stats.clone()
    }

    pub fn snr(&self) -> f64 {
        self.report().snr_db
    }

    pub fn initial_silence(&self) -> f64 {
        self.report().initial_silence
    }

    pub fn terminal_silence(&self) -> f64 {
        self.report().terminal_silence
    }
}

fn analyze(stats: &[WindowStat], params: &SegmenterParams, window_secs: f64) -> SegmentReport {
    let n = stats.len();
    if n == 0 {
        return SegmentReport::default();
    }
    let log_mean = stats.iter().map(|s| (s.energy + EPSILON).ln()).sum::<f64>() / n as f64;
    let threshold = log_mean.exp();
    let raw: Vec<bool> = stats.iter().map(|s| s.energy > threshold).collect();
    let opened = dilate(&erode(&raw, params.opening), params.opening);
    let speech = erode(&dilate(&opened, params.closing), params.closing);

    let mean_of = |want: bool| {
        let (sum, count) = stats
            .iter()
            .zip(&speech)
            .filter(|&(_, &s)| s == want)
            .fold((0.0, 0usize), |(sum, c), (st, _)| (sum + st.energy, c + 1));
        if count == 0 { 0.0 } else { sum / count as f64 }
    };
    let snr_db = 10.0 * (mean_of(true) + EPSILON).log10() - 10.0 * (mean_of(false) + EPSILON).log10();

    let first = speech.iter().position(|&s| s).unwrap_or(n);
    let last = speech.iter().rposition(|&s| s).map_or(n, |i| n - 1 - i);
    SegmentReport {
        threshold,
        speech,
        snr_db,
        initial_silence: first as f64 * window_secs,
        terminal_silence: last as f64 * window_secs,
    }
}

/// True where every flag within `radius` is true.
fn erode(flags: &[bool], radius: usize) -> Vec<bool> {
    smear(flags, radius, false)
}

/// True where any flag within `radius` is true.
fn dilate(flags: &[bool], radius: usize) -> Vec<bool> {
    let inverted: Vec<bool> = flags.iter().map(|f| !f).collect();
    smear(&inverted, radius, false).iter().map(|f| !f).collect()
}

// Spreads every run of `value` by `radius` on both sides.
fn smear(flags: &[bool], radius: usize, value: bool) -> Vec<bool> {
    let mut out = flags.to_vec();
    let n = flags.len();
    let mut i = 0;
    while i < n {
        if flags[i] != value {
            i += 1;
            continue;
        }
        let start = i;
        while i < n && flags[i] == value {
            i += 1;
        }
        let lo = start.saturating_sub(radius);
        let hi = (i + radius).min(n);
        out[lo..hi].iter_mut().for_each(|f| *f = value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const RATE: u32 = 1000;

    fn signal() -> Vec<f64> {
        let mut windows = Vec::new();
        for w in 0..100 {
            let speech = (30..70).contains(&w) && !(50..53).contains(&w);
            let loud = speech || w == 10;
            for i in 0..10 {
                windows.push(if loud {
                    if i % 2 == 0 { 1.0 } else { -1.0 }
                } else {
                    0.01
                });
            }
        }
        windows
    }

    fn check(report: &SegmentReport) {
        assert_eq!(report.speech.len(), 100);
        for (w, s) in report.speech.iter().enumerate() {
            assert_eq!(*s, (30..70).contains(&w), "window {w}");
        }
        assert!((report.initial_silence - 0.3).abs() < 1e-9);
        assert!((report.terminal_silence - 0.3).abs() < 1e-9);
        assert!(report.snr_db > 10.0, "snr {}", report.snr_db);
        assert!(report.threshold > 1e-4 && report.threshold < 1.0);
    }

    #[test]
    fn test_morphology() {
        let flags = [false, true, true, true, false, false, true];
        assert_eq!(erode(&flags, 1), vec![false, false, true, false, false, false, false]);
        assert_eq!(dilate(&flags, 1), vec![true, true, true, true, true, true, true]);
        assert_eq!(erode(&flags, 0), flags.to_vec());
    }

    #[test]
    fn test_segmentation() {
        let seg = Segmenter::new(RATE, SegmenterParams::default()).unwrap();
        assert_eq!(seg.window_len(), 10);
        for chunk in signal().chunks(7) {
            seg.process_samples(chunk);
        }
        seg.flush();
        let report = seg.update();
        check(&report);
        assert_eq!(seg.stats().len(), 100);
        assert_eq!(seg.snr(), report.snr_db);
    }

    #[test]
    fn test_update_without_data() {
        let seg = Segmenter::new(RATE, SegmenterParams::default()).unwrap();
        let report = seg.update();
        assert!(report.speech.is_empty());
        seg.process_samples(&[0.5; 5]);
        assert!(seg.update().speech.is_empty());
        seg.flush();
        assert_eq!(seg.update().speech.len(), 1);
    }

    #[test]
    fn test_published_snapshots_are_immutable() {
        let seg = Segmenter::new(RATE, SegmenterParams::default()).unwrap();
        seg.process_samples(&[0.1; 20]);
        seg.update();
        let before = seg.stats();
        seg.process_samples(&[0.1; 20]);
        seg.update();
        assert_eq!(before.len(), 2);
        assert_eq!(seg.stats().len(), 4);
    }

    #[test]
    fn test_concurrent_producer_and_consumer() {
        let seg = Arc::new(Segmenter::new(RATE, SegmenterParams::default()).unwrap());
        let producer = {
            let seg = Arc::clone(&seg);
            std::thread::spawn(move || {
                for chunk in signal().chunks(13) {
                    seg.process_samples(chunk);
                }
                seg.flush();
            })
        };
        for _ in 0..50 {
            let report = seg.update();
            assert!(report.speech.len() <= 100);
        }
        producer.join().unwrap();
        check(&seg.update());
    }

    #[test]
    fn test_concurrent_consumers_keep_every_window() {
        let seg = Arc::new(Segmenter::new(RATE, SegmenterParams::default()).unwrap());
        let producer = {
            let seg = Arc::clone(&seg);
            std::thread::spawn(move || {
                for chunk in signal().chunks(11) {
                    seg.process_samples(chunk);
                }
                seg.flush();
            })
        };
        let consumers: Vec<_> = (0..2)
            .map(|_| {
                let seg = Arc::clone(&seg);
                std::thread::spawn(move || {
                    for _ in 0..40 {
                        let report = seg.update();
                        assert!(report.speech.len() <= 100);
                        assert!(seg.stats().len() <= 100);
                    }
                })
            })
            .collect();
        producer.join().unwrap();
        for c in consumers {
            c.join().unwrap();
        }
        check(&seg.update());
        assert_eq!(seg.stats().len(), 100);
    }

    #[test]
    fn test_invalid_params() {
        let params = SegmenterParams {
            window_ms: 0.0,
            ..SegmenterParams::default()
        };
        assert!(Segmenter::new(RATE, params).is_err());
        assert!(Segmenter::new(0, SegmenterParams::default()).is_err());
    }
}
