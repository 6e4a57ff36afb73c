//! Energy threshold voice activity detection.

use serde::{Deserialize, Serialize};
use stk_gmm::init::{self, MIN_CLUSTER_SIZE, Ranking};
use stk_gmm::{CovarianceKind, GmmError, Mixture, TrainingContext, UpdateFlags, trainer};
use tracing::debug;

use crate::error::{FrameError, config};

/// Steps of the decision boundary scan between the two cluster means.
pub const BOUNDARY_STEPS: usize = 10_000;

// Lloyd passes of the initial two-way split.
const SPLIT_ITERATIONS: usize = 10;

/// Initial two-way split of the energies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Seeding {
    /// LBG binary splitting.
    #[default]
    Lbg,
    /// Hierarchical principal-axis split. Needs [`MIN_CLUSTER_SIZE`]
    /// frames on each side and falls back to LBG otherwise.
    Hierarchical,
}

/// How the speech threshold is derived from the frame energies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ThresholdMode {
    /// Mean of all energies.
    Mean,
    /// Two-way Gaussian split of the energies, refined with
    /// `em_iterations` EM passes (0, 1 and 5 are the usual choices); the
    /// threshold is the posterior crossover of the two components.
    Gaussian {
        em_iterations: usize,
        #[serde(default)]
        seeding: Seeding,
    },
}

impl Default for ThresholdMode {
    fn default() -> Self {
        ThresholdMode::Gaussian {
            em_iterations: 5,
            seeding: Seeding::Lbg,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyDetector {
    pub mode: ThresholdMode,
    /// Seed of the clustering initialisation.
    pub seed: u64,
}

impl EnergyDetector {
    pub fn new(mode: ThresholdMode) -> Self {
        Self { mode, seed: 0 }
    }

    /// Computes the speech threshold of a sequence of frame energies.
    pub fn threshold(&self, energies: &[f64]) -> Result<f64, FrameError> {
        if energies.is_empty() {
            return Err(config("energy detector needs at least one frame"));
        }
        if let Some(bad) = energies.iter().find(|e| !e.is_finite()) {
            return Err(config(format!("non-finite frame energy {bad}")));
        }
        let mean = energies.iter().sum::<f64>() / energies.len() as f64;
        let (em_iterations, seeding) = match self.mode {
            ThresholdMode::Mean => return Ok(mean),
            ThresholdMode::Gaussian { em_iterations, seeding } => (em_iterations, seeding),
        };

        let data: Vec<[f64; 1]> = energies.iter().map(|&e| [e]).collect();
        let mut ctx = TrainingContext::seeded(self.seed);
        let seeded = match seeding {
            Seeding::Hierarchical if data.len() >= 2 * MIN_CLUSTER_SIZE => {
                let m = init::hierarchical(&data, 2, CovarianceKind::Diagonal, &Ranking::Covariance, &mut ctx)?;
                (m.nd() == 2).then_some(m)
            }
            _ => None,
        };
        let mut m = match seeded {
            Some(m) => m,
            None => match init::lbg(&data, 2, SPLIT_ITERATIONS, &mut ctx) {
                Ok(split) => split.to_mixture(&data, CovarianceKind::Diagonal)?,
                Err(GmmError::NotEnoughData { .. }) => return Ok(mean),
                Err(e) => return Err(e.into()),
            },
        };
        if em_iterations > 0 {
            trainer::em(&mut m, &data, em_iterations, UpdateFlags::default(), &mut ctx)?;
        }
        let t = decision_boundary(&mut m)?;
        debug!(threshold = t, em_iterations, ?seeding, frames = energies.len(), "energy threshold");
        Ok(t)
    }

    /// Flags every frame whose energy exceeds the threshold.
    pub fn detect(&self, energies: &[f64]) -> Result<Vec<bool>, FrameError> {
        let t = self.threshold(energies)?;
        Ok(energies.iter().map(|&e| e > t).collect())
    }
}

/// Scans [`BOUNDARY_STEPS`] steps from the lower to the higher component
/// mean of a one-dimensional two-component mixture and returns the first
/// point where the higher component's posterior reaches the lower one's.
///
/// Returns the midpoint of the means if the posteriors never cross.
pub fn decision_boundary(m: &mut Mixture) -> Result<f64, FrameError> {
    if m.nd() != 2 || m.fd() != 1 {
        return Err(config(format!(
            "decision boundary needs a 1-d mixture of 2 components, got {}-d with {}",
            m.fd(),
            m.nd()
        )));
    }
    let (a, b) = (m.components()[0].mue()[0], m.components()[1].mue()[0]);
    let (lo_idx, lo, hi) = if a <= b { (0, a, b) } else { (1, b, a) };
    let hi_idx = 1 - lo_idx;
    let step = (hi - lo) / BOUNDARY_STEPS as f64;
    for i in 0..=BOUNDARY_STEPS {
        let x = lo + i as f64 * step;
        m.evaluate(&[x]);
        let post = m.posteriors();
        if post[hi_idx] >= post[lo_idx] {
            return Ok(x);
        }
    }
    Ok(0.5 * (lo + hi))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_gaussians(m0: f64, m1: f64) -> Mixture {
        let mut m = Mixture::new(0, 1, 2, CovarianceKind::Diagonal);
        m.components_mut()[0].fill(0.5, &[m1], &[1.0]).unwrap();
        m.components_mut()[1].fill(0.5, &[m0], &[1.0]).unwrap();
        m
    }

    #[test]
    fn test_equal_variance_midpoint() {
        let mut m = two_gaussians(0.0, 10.0);
        let b = decision_boundary(&mut m).unwrap();
        assert!((b - 5.0).abs() < 0.1, "boundary {b}");
    }

    #[test]
    fn test_rejects_wrong_shape() {
        let mut m = Mixture::new(0, 2, 2, CovarianceKind::Diagonal);
        assert!(decision_boundary(&mut m).is_err());
    }

    fn energies() -> Vec<f64> {
        // Silence around 1, speech around 9.
        (0..200)
            .map(|i| {
                let jitter = (i % 7) as f64 * 0.1;
                if (50..150).contains(&i) { 9.0 + jitter } else { 1.0 + jitter }
            })
            .collect()
    }

    #[test]
    fn test_modes_separate_speech() {
        let e = energies();
        let gaussian = |em_iterations, seeding| ThresholdMode::Gaussian { em_iterations, seeding };
        for mode in [
            ThresholdMode::Mean,
            gaussian(0, Seeding::Lbg),
            gaussian(1, Seeding::Lbg),
            gaussian(5, Seeding::Lbg),
            gaussian(0, Seeding::Hierarchical),
            gaussian(5, Seeding::Hierarchical),
        ] {
            let flags = EnergyDetector::new(mode).detect(&e).unwrap();
            for (i, f) in flags.iter().enumerate() {
                assert_eq!(*f, (50..150).contains(&i), "{mode:?} frame {i}");
            }
        }
    }

    // Two identically shaped clusters around 0 and 10.
    fn mirrored(per: usize) -> Vec<f64> {
        (0..2 * per)
            .map(|i| {
                let jitter = ((i % per) % 7) as f64 * 0.1 - 0.3;
                if i < per { jitter } else { 10.0 + jitter }
            })
            .collect()
    }

    #[test]
    fn test_hierarchical_seeding_midpoint() {
        for em_iterations in [0, 5] {
            let d = EnergyDetector::new(ThresholdMode::Gaussian {
                em_iterations,
                seeding: Seeding::Hierarchical,
            });
            let t = d.threshold(&mirrored(100)).unwrap();
            assert!((t - 5.0).abs() < 0.1, "threshold {t}");
        }
    }

    #[test]
    fn test_hierarchical_seeding_falls_back_on_few_frames() {
        let e = mirrored(10);
        let d = EnergyDetector::new(ThresholdMode::Gaussian {
            em_iterations: 0,
            seeding: Seeding::Hierarchical,
        });
        let t = d.threshold(&e).unwrap();
        assert!(t > 0.3 && t < 9.7, "threshold {t}");
    }

    #[test]
    fn test_mode_json() {
        let mode: ThresholdMode = serde_json::from_str(r#"{"mode": "gaussian", "em_iterations": 1}"#).unwrap();
        assert_eq!(
            mode,
            ThresholdMode::Gaussian {
                em_iterations: 1,
                seeding: Seeding::Lbg
            }
        );
        let mode: ThresholdMode =
            serde_json::from_str(r#"{"mode": "gaussian", "em_iterations": 0, "seeding": "hierarchical"}"#).unwrap();
        assert_eq!(
            mode,
            ThresholdMode::Gaussian {
                em_iterations: 0,
                seeding: Seeding::Hierarchical
            }
        );
    }

    #[test]
    fn test_invalid_input() {
        let d = EnergyDetector::default();
        assert!(d.threshold(&[]).is_err());
        assert!(d.threshold(&[1.0, f64::NAN]).is_err());
        // A single frame cannot be split.
        assert_eq!(d.threshold(&[3.0]).unwrap(), 3.0);
    }
}
