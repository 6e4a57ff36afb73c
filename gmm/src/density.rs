//! Gaussian densities with diagonal or full covariance.

use std::f64::consts::PI;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::GmmError;
use crate::linalg::{cholesky, pack, packed_index, packed_len, unpack};

/// Variance floor applied on every update.
pub const MIN_COV: f64 = 1e-6;

/// Prior (mixture weight) floor applied on every update.
pub const MIN_WEIGHT: f64 = 1e-6;

/// Lower bound of a linear-domain density score.
pub const MIN_PROB: f64 = 1e-300;

/// Covariance storage layout of a [`Density`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceKind {
    /// `fd` variances.
    Diagonal,
    /// `fd * (fd + 1) / 2` packed lower-triangular covariances.
    Full,
}

impl CovarianceKind {
    /// Returns the number of stored covariance values for dimension `fd`.
    pub fn cov_len(self, fd: usize) -> usize {
        match self {
            CovarianceKind::Diagonal => fd,
            CovarianceKind::Full => packed_len(fd),
        }
    }

    /// Returns the index of the `i`-th variance inside the covariance
    /// storage.
    #[inline]
    pub fn variance_index(self, i: usize) -> usize {
        match self {
            CovarianceKind::Diagonal => i,
            CovarianceKind::Full => packed_index(i, i),
        }
    }
}

/// Counts the repairs a parameter update had to make.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateReport {
    /// Non-finite prior, mean or covariance values replaced by defaults.
    pub nan_fixes: usize,
    /// Full covariances that were not positive definite and were reduced
    /// to their diagonal.
    pub diagonalized: usize,
}

impl UpdateReport {
    /// Returns true if no repair was necessary.
    pub fn is_clean(&self) -> bool {
        self.nan_fixes == 0 && self.diagonalized == 0
    }

    /// Adds the counts of `other`.
    pub fn merge(&mut self, other: UpdateReport) {
        self.nan_fixes += other.nan_fixes;
        self.diagonalized += other.diagonalized;
    }
}

/// Cached evaluation state derived from the covariance on update.
#[derive(Debug, Clone)]
enum Factor {
    /// Inverse variances.
    Diagonal { inv: Vec<f64> },
    /// Packed Cholesky factor with the diagonal stored inverted.
    Full { chol: Vec<f64> },
}

/// A multivariate Gaussian density with a prior weight.
///
/// Parameters are changed through [`Density::fill`] or the setters, each
/// of which re-runs [`Density::update`]: floors are applied, non-finite
/// values are replaced, and the evaluation cache (inverse variances or
/// Cholesky factor, log-determinant) is rebuilt.
#[derive(Debug, Clone)]
pub struct Density {
    /// Component index inside its mixture.
    pub id: i32,
    fd: usize,
    kind: CovarianceKind,
    apr: f64,
    mue: Vec<f64>,
    cov: Vec<f64>,
    factor: Factor,
    logdet: f64,
    lognorm: f64,
}

impl Density {
    /// Creates a standard normal density of dimension `fd`.
    pub fn new(fd: usize, kind: CovarianceKind) -> Self {
        let mut cov = vec![0.0; kind.cov_len(fd)];
        for i in 0..fd {
            cov[kind.variance_index(i)] = 1.0;
        }
        let mut d = Self {
            id: 0,
            fd,
            kind,
            apr: 1.0,
            mue: vec![0.0; fd],
            cov,
            factor: Factor::Diagonal { inv: Vec::new() },
            logdet: 0.0,
            lognorm: 0.0,
        };
        d.update();
        d
    }

    /// Creates a diagonal-covariance standard normal density.
    pub fn diagonal(fd: usize) -> Self {
        Self::new(fd, CovarianceKind::Diagonal)
    }

    /// Creates a full-covariance standard normal density.
    pub fn full(fd: usize) -> Self {
        Self::new(fd, CovarianceKind::Full)
    }

    /// Replaces all parameters and updates the density.
    pub fn fill(&mut self, apr: f64, mue: &[f64], cov: &[f64]) -> Result<UpdateReport, GmmError> {
        if mue.len() != self.fd {
            return Err(GmmError::DimensionMismatch {
                expected: self.fd,
                got: mue.len(),
            });
        }
        let want = self.kind.cov_len(self.fd);
        if cov.len() != want {
            return Err(GmmError::DimensionMismatch {
                expected: want,
                got: cov.len(),
            });
        }
        self.apr = apr;
        self.mue.copy_from_slice(mue);
        self.cov.copy_from_slice(cov);
        Ok(self.update())
    }

    /// Returns the feature dimension.
    pub fn fd(&self) -> usize {
        self.fd
    }

    /// Returns the covariance layout.
    pub fn kind(&self) -> CovarianceKind {
        self.kind
    }

    /// Returns the prior weight.
    pub fn apr(&self) -> f64 {
        self.apr
    }

    /// Sets the prior weight, applying the weight floor.
    pub fn set_apr(&mut self, apr: f64) -> UpdateReport {
        self.apr = apr;
        let mut report = UpdateReport::default();
        self.fix_prior(&mut report);
        report
    }

    /// Returns the mean vector.
    pub fn mue(&self) -> &[f64] {
        &self.mue
    }

    /// Returns the covariance storage (variances or packed lower triangle).
    pub fn cov(&self) -> &[f64] {
        &self.cov
    }

    /// Returns the variance of dimension `i`.
    pub fn variance(&self, i: usize) -> f64 {
        self.cov[self.kind.variance_index(i)]
    }

    /// Returns the cached log-determinant of the covariance.
    pub fn log_det(&self) -> f64 {
        self.logdet
    }

    /// Returns the covariance as a full symmetric matrix.
    pub fn covariance_matrix(&self) -> Vec<Vec<f64>> {
        match self.kind {
            CovarianceKind::Diagonal => {
                let mut m = vec![vec![0.0; self.fd]; self.fd];
                for (i, row) in m.iter_mut().enumerate() {
                    row[i] = self.cov[i];
                }
                m
            }
            CovarianceKind::Full => unpack(&self.cov, self.fd),
        }
    }

    /// Re-establishes the parameter invariants and rebuilds the cache.
    ///
    /// Non-finite values are replaced (prior by [`MIN_WEIGHT`], means by 0,
    /// variances by 1, covariances by 0), variances are floored at
    /// [`MIN_COV`], and a full covariance that fails Cholesky
    /// factorisation is reduced to its diagonal.
    pub fn update(&mut self) -> UpdateReport {
        let mut report = UpdateReport::default();
        self.fix_prior(&mut report);

        for m in self.mue.iter_mut() {
            if !m.is_finite() {
                *m = 0.0;
                report.nan_fixes += 1;
            }
        }

        for i in 0..self.fd {
            for j in 0..=i {
                let idx = match self.kind {
                    CovarianceKind::Diagonal if i != j => continue,
                    CovarianceKind::Diagonal => i,
                    CovarianceKind::Full => packed_index(i, j),
                };
                let v = &mut self.cov[idx];
                if !v.is_finite() {
                    *v = if i == j { 1.0 } else { 0.0 };
                    report.nan_fixes += 1;
                }
                if i == j && *v < MIN_COV {
                    *v = MIN_COV;
                }
            }
        }

        match self.kind {
            CovarianceKind::Diagonal => {
                let inv: Vec<f64> = self.cov.iter().map(|v| 1.0 / v).collect();
                self.logdet = self.cov.iter().map(|v| v.ln()).sum();
                self.factor = Factor::Diagonal { inv };
            }
            CovarianceKind::Full => {
                let chol = match cholesky(&self.cov, self.fd) {
                    Some(l) => l,
                    None => {
                        report.diagonalized += 1;
                        for i in 0..self.fd {
                            for j in 0..i {
                                self.cov[packed_index(i, j)] = 0.0;
                            }
                        }
                        let mut l = vec![0.0; self.cov.len()];
                        for i in 0..self.fd {
                            let idx = packed_index(i, i);
                            l[idx] = self.cov[idx].sqrt();
                        }
                        l
                    }
                };
                let mut chol = chol;
                let mut logdet = 0.0;
                for i in 0..self.fd {
                    let idx = packed_index(i, i);
                    logdet += 2.0 * chol[idx].ln();
                    chol[idx] = 1.0 / chol[idx];
                }
                self.logdet = logdet;
                self.factor = Factor::Full { chol };
            }
        }
        self.lognorm = -0.5 * (self.logdet + self.fd as f64 * (2.0 * PI).ln());

        if !report.is_clean() {
            warn!(
                id = self.id,
                nan_fixes = report.nan_fixes,
                diagonalized = report.diagonalized,
                "density parameters repaired on update"
            );
        }
        report
    }

    fn fix_prior(&mut self, report: &mut UpdateReport) {
        if !self.apr.is_finite() {
            self.apr = MIN_WEIGHT;
            report.nan_fixes += 1;
        }
        if self.apr < MIN_WEIGHT {
            self.apr = MIN_WEIGHT;
        }
    }

    /// Returns the log-density `ln N(x; μ, K)`.
    ///
    /// A non-finite result (e.g. NaN in `x`) is replaced by `ln(MIN_PROB)`.
    pub fn log_score(&self, x: &[f64]) -> f64 {
        let ll = self.raw_log_score(x);
        if ll.is_nan() { MIN_PROB.ln() } else { ll }
    }

    fn raw_log_score(&self, x: &[f64]) -> f64 {
        debug_assert_eq!(x.len(), self.fd);
        let mahal = match &self.factor {
            Factor::Diagonal { inv } => x
                .iter()
                .zip(&self.mue)
                .zip(inv)
                .map(|((x, m), iv)| (x - m) * (x - m) * iv)
                .sum::<f64>(),
            Factor::Full { chol } => {
                // Forward substitution L y = x - μ.
                let mut y = vec![0.0; self.fd];
                let mut s = 0.0;
                for i in 0..self.fd {
                    let mut v = x[i] - self.mue[i];
                    let row = i * (i + 1) / 2;
                    for k in 0..i {
                        v -= chol[row + k] * y[k];
                    }
                    y[i] = v * chol[row + i];
                    s += y[i] * y[i];
                }
                s
            }
        };
        self.lognorm - 0.5 * mahal
    }

    /// Returns the density `N(x; μ, K)`, floored at [`MIN_PROB`].
    pub fn score(&self, x: &[f64]) -> f64 {
        let ll = self.raw_log_score(x);
        if ll.is_nan() { MIN_PROB } else { ll.exp().max(MIN_PROB) }
    }

    /// Returns the prior-weighted score `apr · N(x; μ, K)`.
    pub fn ascore(&self, x: &[f64]) -> f64 {
        self.apr * self.score(x)
    }

    /// Projects the density onto the given dimensions.
    pub fn marginalize(&self, dims: &[usize]) -> Result<Density, GmmError> {
        if let Some(&bad) = dims.iter().find(|&&d| d >= self.fd) {
            return Err(GmmError::InvalidConfig(format!(
                "marginal dimension {bad} out of range 0..{}",
                self.fd
            )));
        }
        let mue: Vec<f64> = dims.iter().map(|&d| self.mue[d]).collect();
        let cov = match self.kind {
            CovarianceKind::Diagonal => dims.iter().map(|&d| self.cov[d]).collect(),
            CovarianceKind::Full => {
                let full = unpack(&self.cov, self.fd);
                let sub: Vec<Vec<f64>> = dims
                    .iter()
                    .map(|&r| dims.iter().map(|&c| full[r][c]).collect())
                    .collect();
                pack(&sub)
            }
        };
        let mut d = Density::new(dims.len(), self.kind);
        d.id = self.id;
        d.fill(self.apr, &mue, &cov)?;
        Ok(d)
    }

    /// Returns a diagonal copy of this density (off-diagonals dropped).
    pub fn to_diagonal(&self) -> Density {
        let mut d = Density::diagonal(self.fd);
        d.id = self.id;
        d.apr = self.apr;
        d.mue.copy_from_slice(&self.mue);
        for i in 0..self.fd {
            d.cov[i] = self.variance(i);
        }
        d.update();
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_normal_peak() {
        let d = Density::diagonal(2);
        let expected = 1.0 / (2.0 * PI);
        assert!((d.score(&[0.0, 0.0]) - expected).abs() < 1e-12);
        assert!((d.log_score(&[0.0, 0.0]) - expected.ln()).abs() < 1e-12);
    }

    #[test]
    fn test_diagonal_and_full_agree() {
        let mut dd = Density::diagonal(2);
        dd.fill(0.5, &[1.0, -1.0], &[2.0, 0.5]).unwrap();
        let mut df = Density::full(2);
        df.fill(0.5, &[1.0, -1.0], &[2.0, 0.0, 0.5]).unwrap();
        for x in [[0.0, 0.0], [1.0, -1.0], [3.0, 2.0]] {
            assert!((dd.log_score(&x) - df.log_score(&x)).abs() < 1e-12);
        }
        assert!((dd.log_det() - df.log_det()).abs() < 1e-12);
    }

    #[test]
    fn test_full_covariance_score() {
        // K = [[2, 1], [1, 2]], det = 3, K^-1 = 1/3 [[2, -1], [-1, 2]].
        let mut d = Density::full(2);
        d.fill(1.0, &[0.0, 0.0], &[2.0, 1.0, 2.0]).unwrap();
        let x = [1.0, 0.0];
        let mahal = 2.0 / 3.0;
        let expected = -0.5 * (3f64.ln() + 2.0 * (2.0 * PI).ln() + mahal);
        assert!((d.log_score(&x) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_update_floors_and_fixes_nan() {
        let mut d = Density::diagonal(3);
        let report = d
            .fill(f64::NAN, &[f64::NAN, 1.0, 2.0], &[0.0, f64::NAN, 4.0])
            .unwrap();
        assert_eq!(report.nan_fixes, 3);
        assert_eq!(d.apr(), MIN_WEIGHT);
        assert_eq!(d.mue()[0], 0.0);
        assert_eq!(d.variance(0), MIN_COV);
        assert_eq!(d.variance(1), 1.0);
        assert!(d.score(&[0.0, 1.0, 2.0]).is_finite());
    }

    #[test]
    fn test_non_spd_falls_back_to_diagonal() {
        let mut d = Density::full(2);
        let report = d.fill(1.0, &[0.0, 0.0], &[1.0, 2.0, 1.0]).unwrap();
        assert_eq!(report.diagonalized, 1);
        assert_eq!(d.cov(), &[1.0, 0.0, 1.0]);
        let reference = Density::diagonal(2);
        assert!((d.log_score(&[0.3, 0.2]) - reference.log_score(&[0.3, 0.2])).abs() < 1e-12);
    }

    #[test]
    fn test_score_floor() {
        let d = Density::diagonal(1);
        assert_eq!(d.score(&[1e6]), MIN_PROB);
        assert_eq!(d.score(&[f64::NAN]), MIN_PROB);
    }

    #[test]
    fn test_fill_rejects_wrong_dims() {
        let mut d = Density::full(3);
        assert!(matches!(
            d.fill(1.0, &[0.0; 3], &[1.0; 3]),
            Err(GmmError::DimensionMismatch { expected: 6, got: 3 })
        ));
    }

    #[test]
    fn test_marginalize_full() {
        let mut d = Density::full(3);
        d.fill(1.0, &[1.0, 2.0, 3.0], &[4.0, 1.0, 5.0, 0.5, 0.2, 6.0]).unwrap();
        let m = d.marginalize(&[0, 2]).unwrap();
        assert_eq!(m.mue(), &[1.0, 3.0]);
        assert_eq!(m.cov(), &[4.0, 0.5, 6.0]);
        assert!(d.marginalize(&[3]).is_err());
    }
}
