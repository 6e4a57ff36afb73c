//! Discriminative (MMIE) training with extended Baum-Welch updates.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::accumulator::{DensityAccumulator, MixtureAccumulator, UpdateFlags};
use crate::context::TrainingContext;
use crate::density::{CovarianceKind, Density};
use crate::error::GmmError;
use crate::linalg::{cholesky, log_sum_exp, packed_index};
use crate::mixture::Mixture;

/// Parameters of the EBW update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MmieConfig {
    /// Scale applied to segment log-likelihoods before the class softmax.
    pub kr: f64,
    /// Multiplier of the denominator occupancy for the initial smoothing
    /// constant `D`.
    pub e: f64,
    /// Maximum number of `D` doublings before a density update is
    /// abandoned.
    pub max_iterations: usize,
    pub flags: UpdateFlags,
}

impl Default for MmieConfig {
    fn default() -> Self {
        Self {
            kr: 1.0,
            e: 2.0,
            max_iterations: 10,
            flags: UpdateFlags::default(),
        }
    }
}

/// Numerator (correct class) and denominator (all classes) statistics of
/// one class model.
#[derive(Debug, Clone)]
pub struct MmieStats {
    pub num: MixtureAccumulator,
    pub den: MixtureAccumulator,
}

/// Collects MMIE statistics for a set of competing class mixtures.
#[derive(Debug, Clone)]
pub struct MmieAccumulator {
    cfg: MmieConfig,
    stats: Vec<MmieStats>,
}

impl MmieAccumulator {
    /// Creates empty statistics shaped like `mixtures`, trained with `cfg`.
    pub fn new(mixtures: &[Mixture], cfg: MmieConfig) -> Self {
        let stats = mixtures
            .iter()
            .map(|m| MmieStats {
                num: MixtureAccumulator::for_mixture(m),
                den: MixtureAccumulator::for_mixture(m),
            })
            .collect();
        Self { cfg, stats }
    }

    pub fn config(&self) -> &MmieConfig {
        &self.cfg
    }

    pub fn stats(&self) -> &[MmieStats] {
        &self.stats
    }

    /// Accumulates one labelled segment.
    ///
    /// Class posteriors of the segment are `softmax(kr · L_c)` over the
    /// segment log-likelihoods `L_c`. The correct class receives the
    /// segment in its numerator statistics; every class receives it in
    /// the denominator weighted by its posterior. Returns the log
    /// posterior of the correct class.
    pub fn accumulate<S: AsRef<[f64]>>(
        &mut self,
        mixtures: &mut [Mixture],
        correct: usize,
        segment: &[S],
    ) -> Result<f64, GmmError> {
        if mixtures.len() != self.stats.len() {
            return Err(GmmError::DimensionMismatch {
                expected: self.stats.len(),
                got: mixtures.len(),
            });
        }
        if correct >= mixtures.len() {
            return Err(GmmError::InvalidConfig(format!(
                "correct class {correct} out of range 0..{}",
                mixtures.len()
            )));
        }
        if segment.is_empty() {
            return Ok(0.0);
        }

        let mut scaled = Vec::with_capacity(mixtures.len());
        for m in mixtures.iter_mut() {
            let mut ll = 0.0;
            for x in segment {
                let x = x.as_ref();
                if x.len() != m.fd() {
                    return Err(GmmError::DimensionMismatch {
                        expected: m.fd(),
                        got: x.len(),
                    });
                }
                ll += m.evaluate(x).log_score;
            }
            scaled.push(self.cfg.kr * ll);
        }
        let norm = log_sum_exp(&scaled);
        let gammas: Vec<f64> = scaled.iter().map(|s| (s - norm).exp()).collect();

        for (c, (m, st)) in mixtures.iter_mut().zip(self.stats.iter_mut()).enumerate() {
            for x in segment {
                let x = x.as_ref();
                if c == correct {
                    st.num.accumulate(m, x)?;
                }
                if gammas[c] > 0.0 {
                    st.den.accumulate_weighted(m, x, gammas[c])?;
                }
            }
        }
        Ok(scaled[correct] - norm)
    }

    /// Adds the statistics of `other`.
    pub fn propagate(&mut self, other: &MmieAccumulator) -> Result<(), GmmError> {
        if other.stats.len() != self.stats.len() {
            return Err(GmmError::DimensionMismatch {
                expected: self.stats.len(),
                got: other.stats.len(),
            });
        }
        for (a, b) in self.stats.iter_mut().zip(&other.stats) {
            a.num.propagate(&b.num)?;
            a.den.propagate(&b.den)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        for st in self.stats.iter_mut() {
            st.num.flush();
            st.den.flush();
        }
    }

    /// Applies the EBW update to every class mixture.
    pub fn update(
        &self,
        mixtures: &mut [Mixture],
        ctx: &mut TrainingContext,
    ) -> Result<(), GmmError> {
        let cfg = &self.cfg;
        if mixtures.len() != self.stats.len() {
            return Err(GmmError::DimensionMismatch {
                expected: self.stats.len(),
                got: mixtures.len(),
            });
        }
        for (m, st) in mixtures.iter_mut().zip(&self.stats) {
            if m.nd() != st.num.nd() {
                return Err(GmmError::DimensionMismatch {
                    expected: st.num.nd(),
                    got: m.nd(),
                });
            }
            for (d, (num, den)) in m
                .components_mut()
                .iter_mut()
                .zip(st.num.densities().iter().zip(st.den.densities()))
            {
                ebw_update(d, num, den, cfg, ctx)?;
            }
            if cfg.flags.weights {
                update_weights(m, &st.num, &st.den);
            }
        }
        Ok(())
    }
}

/// EBW update of one density.
///
/// Starts from `D = max(E · γ_den, 1)` and doubles `D` until the new
/// covariance is positive (positive definite for full covariance). After
/// `max_iterations` failed attempts the density is left unchanged and the
/// abandonment is counted. Returns whether the density was updated.
pub fn ebw_update(
    d: &mut Density,
    num: &DensityAccumulator,
    den: &DensityAccumulator,
    cfg: &MmieConfig,
    ctx: &mut TrainingContext,
) -> Result<bool, GmmError> {
    if num.fd() != d.fd() || den.fd() != d.fd() {
        return Err(GmmError::DimensionMismatch {
            expected: d.fd(),
            got: if num.fd() != d.fd() { num.fd() } else { den.fd() },
        });
    }
    if num.kind() != d.kind() || den.kind() != d.kind() {
        return Err(GmmError::KindMismatch {
            expected: d.kind(),
            got: if num.kind() != d.kind() { num.kind() } else { den.kind() },
        });
    }
    let (gn, gd) = (num.occupancy(), den.occupancy());
    if gn <= 0.0 && gd <= 0.0 {
        return Ok(false);
    }

    let fd = d.fd();
    let kind = d.kind();
    let mue = d.mue().to_vec();
    let cov = d.cov().to_vec();

    // D (Σ + μμᵗ): the old second moment scaled by D.
    let mut old_moment = cov.clone();
    for i in 0..fd {
        match kind {
            CovarianceKind::Diagonal => old_moment[i] += mue[i] * mue[i],
            CovarianceKind::Full => {
                for j in 0..=i {
                    old_moment[packed_index(i, j)] += mue[i] * mue[j];
                }
            }
        }
    }

    let mut dconst = (cfg.e * gd).max(1.0);
    for attempt in 0..cfg.max_iterations.max(1) {
        let denom = gn - gd + dconst;
        if denom > 0.0 {
            let new_mue: Vec<f64> = if cfg.flags.means {
                (0..fd)
                    .map(|i| (num.sum()[i] - den.sum()[i] + dconst * mue[i]) / denom)
                    .collect()
            } else {
                mue.clone()
            };
            let new_cov = if cfg.flags.variances {
                let mut c: Vec<f64> = (0..cov.len())
                    .map(|k| (num.sum2()[k] - den.sum2()[k] + dconst * old_moment[k]) / denom)
                    .collect();
                for i in 0..fd {
                    match kind {
                        CovarianceKind::Diagonal => c[i] -= new_mue[i] * new_mue[i],
                        CovarianceKind::Full => {
                            for j in 0..=i {
                                c[packed_index(i, j)] -= new_mue[i] * new_mue[j];
                            }
                        }
                    }
                }
                c
            } else {
                cov.clone()
            };
            if is_positive(&new_cov, fd, kind) {
                let report = d.fill(d.apr(), &new_mue, &new_cov)?;
                ctx.record_update(report);
                return Ok(true);
            }
        }
        debug!(id = d.id, attempt, d = dconst, "ebw variance not positive, doubling D");
        dconst *= 2.0;
    }

    warn!(
        id = d.id,
        attempts = cfg.max_iterations,
        "ebw update abandoned, keeping previous parameters"
    );
    ctx.diagnostics_mut().ebw_abandoned += 1;
    Ok(false)
}

fn is_positive(cov: &[f64], fd: usize, kind: CovarianceKind) -> bool {
    match kind {
        CovarianceKind::Diagonal => cov.iter().all(|v| *v > 0.0 && v.is_finite()),
        CovarianceKind::Full => cholesky(cov, fd).is_some(),
    }
}

/// Weight update `w' ∝ (γ_num − γ_den) + C·w` with `C` chosen so that
/// every term stays positive.
fn update_weights(m: &mut Mixture, num: &MixtureAccumulator, den: &MixtureAccumulator) {
    let diffs: Vec<f64> = num
        .densities()
        .iter()
        .zip(den.densities())
        .map(|(n, d)| n.occupancy() - d.occupancy())
        .collect();
    let c = m
        .components()
        .iter()
        .zip(&diffs)
        .map(|(d, diff)| -diff / d.apr())
        .fold(0.0f64, f64::max)
        + 1.0;
    for (d, diff) in m.components_mut().iter_mut().zip(&diffs) {
        let w = diff + c * d.apr();
        d.set_apr(w);
    }
    m.normalize_weights();
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one_d(mean: f64) -> Mixture {
        let mut m = Mixture::new(0, 1, 1, CovarianceKind::Diagonal);
        m.components_mut()[0].fill(1.0, &[mean], &[1.0]).unwrap();
        m
    }

    #[test]
    fn test_segment_posteriors_sum_to_one() {
        let mut ms = vec![one_d(0.0), one_d(1.0)];
        let mut acc = MmieAccumulator::new(&ms, MmieConfig::default());
        let lp = acc.accumulate(&mut ms, 0, &[[0.5]]).unwrap();
        // Equidistant point: both classes equally likely.
        assert!((lp - 0.5f64.ln()).abs() < 1e-12);
        let den: f64 = acc.stats().iter().map(|s| s.den.occupancy()).sum();
        assert!((den - 1.0).abs() < 1e-12);
        assert!((acc.stats()[0].num.occupancy() - 1.0).abs() < 1e-12);
        assert_eq!(acc.stats()[1].num.occupancy(), 0.0);
    }

    #[test]
    fn test_kr_sharpens_class_posteriors() {
        let segment = [[0.2], [0.3]];
        let log_posterior = |kr: f64| {
            let mut ms = vec![one_d(0.0), one_d(1.0)];
            let cfg = MmieConfig {
                kr,
                ..MmieConfig::default()
            };
            let mut acc = MmieAccumulator::new(&ms, cfg);
            let lp = acc.accumulate(&mut ms, 0, &segment).unwrap();
            (lp, acc.stats()[1].den.occupancy())
        };
        let (flat, flat_den) = log_posterior(0.1);
        let (sharp, sharp_den) = log_posterior(1.0);
        assert!(sharp > flat);
        assert!(sharp < 0.0);
        // Competitor mass in the denominator shrinks as kr grows.
        assert!(sharp_den < flat_den);
        let (none, _) = log_posterior(0.0);
        assert!((none - 0.5f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_ebw_moves_mean_away_from_competitor() {
        // Class 0 at 0 sees its data at 0.5; class 1 at 1.0 competes.
        let mut ms = vec![one_d(0.0), one_d(1.0)];
        let mut acc = MmieAccumulator::new(&ms, MmieConfig::default());
        for _ in 0..5 {
            acc.accumulate(&mut ms, 0, &[[0.2]]).unwrap();
            acc.accumulate(&mut ms, 1, &[[0.8]]).unwrap();
        }
        let mut ctx = TrainingContext::seeded(0);
        acc.update(&mut ms, &mut ctx).unwrap();
        let (m0, m1) = (ms[0].components()[0].mue()[0], ms[1].components()[0].mue()[0]);
        assert!(m0 < m1);
        assert!(ms.iter().all(|m| m.components()[0].variance(0) > 0.0));
        assert_eq!(ctx.diagnostics().ebw_abandoned, 0);
    }

    #[test]
    fn test_ebw_abandons_and_keeps_density() {
        // Denominator mass far from the mean forces a negative variance
        // that a single attempt with D = 1 cannot repair.
        let mut d = Density::diagonal(1);
        let num = DensityAccumulator::new(1, CovarianceKind::Diagonal);
        let mut den = DensityAccumulator::new(1, CovarianceKind::Diagonal);
        den.accumulate(0.1, &[100.0]);
        let cfg = MmieConfig {
            max_iterations: 1,
            ..MmieConfig::default()
        };
        let mut ctx = TrainingContext::seeded(0);
        let updated = ebw_update(&mut d, &num, &den, &cfg, &mut ctx).unwrap();
        assert!(!updated);
        assert_eq!(d.mue(), &[0.0]);
        assert_eq!(d.variance(0), 1.0);
        assert_eq!(ctx.diagnostics().ebw_abandoned, 1);
    }

    #[test]
    fn test_ebw_doubling_recovers() {
        let mut d = Density::diagonal(1);
        let num = DensityAccumulator::new(1, CovarianceKind::Diagonal);
        let mut den = DensityAccumulator::new(1, CovarianceKind::Diagonal);
        den.accumulate(0.1, &[100.0]);
        let cfg = MmieConfig {
            max_iterations: 20,
            ..MmieConfig::default()
        };
        let mut ctx = TrainingContext::seeded(0);
        assert!(ebw_update(&mut d, &num, &den, &cfg, &mut ctx).unwrap());
        assert!(d.variance(0) > 0.0);
        assert!(d.mue()[0] < 0.0);
    }
}
