//! Sufficient statistics for maximum-likelihood and MAP estimation.

use std::fmt;
use std::io::{BufWriter, Read, Write};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::density::{CovarianceKind, Density, UpdateReport};
use crate::error::GmmError;
use crate::io::{read_count, read_f64, read_f64s, read_i32};
use crate::linalg::packed_index;
use crate::mixture::Mixture;

/// Selects which parameters an update touches.
///
/// Parsed from a string of the letters `w` (weights), `m` (means) and
/// `v` (variances), e.g. `"mv"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFlags {
    pub weights: bool,
    pub means: bool,
    pub variances: bool,
}

impl Default for UpdateFlags {
    fn default() -> Self {
        Self {
            weights: true,
            means: true,
            variances: true,
        }
    }
}

impl FromStr for UpdateFlags {
    type Err = GmmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut flags = UpdateFlags {
            weights: false,
            means: false,
            variances: false,
        };
        for c in s.chars() {
            match c {
                'w' => flags.weights = true,
                'm' => flags.means = true,
                'v' => flags.variances = true,
                _ => {
                    return Err(GmmError::InvalidConfig(format!(
                        "unknown update flag {c:?} in {s:?}"
                    )));
                }
            }
        }
        Ok(flags)
    }
}

impl fmt::Display for UpdateFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.weights {
            f.write_str("w")?;
        }
        if self.means {
            f.write_str("m")?;
        }
        if self.variances {
            f.write_str("v")?;
        }
        Ok(())
    }
}

/// Zeroth, first and second order statistics of one density.
///
/// `sum2` uses the covariance layout of the density: squared values for
/// diagonal, packed lower-triangular outer products for full.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityAccumulator {
    fd: usize,
    kind: CovarianceKind,
    occ: f64,
    sum: Vec<f64>,
    sum2: Vec<f64>,
}

impl DensityAccumulator {
    pub fn new(fd: usize, kind: CovarianceKind) -> Self {
        Self {
            fd,
            kind,
            occ: 0.0,
            sum: vec![0.0; fd],
            sum2: vec![0.0; kind.cov_len(fd)],
        }
    }

    /// Creates an empty accumulator matching `d`.
    pub fn for_density(d: &Density) -> Self {
        Self::new(d.fd(), d.kind())
    }

    pub fn fd(&self) -> usize {
        self.fd
    }

    pub fn kind(&self) -> CovarianceKind {
        self.kind
    }

    /// Returns the accumulated occupancy (sum of weights).
    pub fn occupancy(&self) -> f64 {
        self.occ
    }

    pub fn sum(&self) -> &[f64] {
        &self.sum
    }

    pub fn sum2(&self) -> &[f64] {
        &self.sum2
    }

    /// Adds `x` with weight `gamma`.
    pub fn accumulate(&mut self, gamma: f64, x: &[f64]) {
        debug_assert_eq!(x.len(), self.fd);
        self.occ += gamma;
        for (s, v) in self.sum.iter_mut().zip(x) {
            *s += gamma * v;
        }
        match self.kind {
            CovarianceKind::Diagonal => {
                for (s, v) in self.sum2.iter_mut().zip(x) {
                    *s += gamma * v * v;
                }
            }
            CovarianceKind::Full => {
                let mut k = 0;
                for i in 0..self.fd {
                    let gx = gamma * x[i];
                    for xj in &x[..=i] {
                        self.sum2[k] += gx * xj;
                        k += 1;
                    }
                }
            }
        }
    }

    /// Adds the statistics of `other`.
    pub fn propagate(&mut self, other: &DensityAccumulator) -> Result<(), GmmError> {
        self.check_compatible(other.fd, other.kind)?;
        self.occ += other.occ;
        for (a, b) in self.sum.iter_mut().zip(&other.sum) {
            *a += b;
        }
        for (a, b) in self.sum2.iter_mut().zip(&other.sum2) {
            *a += b;
        }
        Ok(())
    }

    /// Resets all statistics to zero.
    pub fn flush(&mut self) {
        self.occ = 0.0;
        self.sum.iter_mut().for_each(|v| *v = 0.0);
        self.sum2.iter_mut().for_each(|v| *v = 0.0);
    }

    /// Returns `sum / occ`, or `None` without occupancy.
    pub fn mean(&self) -> Option<Vec<f64>> {
        if self.occ <= 0.0 {
            return None;
        }
        Some(self.sum.iter().map(|s| s / self.occ).collect())
    }

    /// Returns the second moment `E[xxᵗ]` in covariance layout.
    pub fn second_moment(&self) -> Option<Vec<f64>> {
        if self.occ <= 0.0 {
            return None;
        }
        Some(self.sum2.iter().map(|s| s / self.occ).collect())
    }

    /// Returns the maximum-likelihood mean and covariance
    /// (`E[xxᵗ] − μμᵗ`), or `None` without occupancy.
    pub fn estimate(&self) -> Option<(Vec<f64>, Vec<f64>)> {
        let mean = self.mean()?;
        let mut cov = self.second_moment()?;
        subtract_outer(&mut cov, &mean, self.kind);
        Some((mean, cov))
    }

    /// Writes mean and covariance into `d`, leaving its prior untouched.
    /// Densities without occupancy keep their parameters.
    pub fn update_ml(&self, d: &mut Density, flags: UpdateFlags) -> Result<UpdateReport, GmmError> {
        self.check_compatible(d.fd(), d.kind())?;
        let Some((mean, cov)) = self.estimate() else {
            return Ok(UpdateReport::default());
        };
        let mean = if flags.means { mean } else { d.mue().to_vec() };
        let cov = if flags.variances {
            if flags.means {
                cov
            } else {
                // Covariance about the unchanged mean.
                let mut c = self.second_moment().unwrap_or(cov);
                subtract_cross(&mut c, &mean, &self.sum, self.occ, self.kind);
                c
            }
        } else {
            d.cov().to_vec()
        };
        d.fill(d.apr(), &mean, &cov)
    }

    fn check_compatible(&self, fd: usize, kind: CovarianceKind) -> Result<(), GmmError> {
        if fd != self.fd {
            return Err(GmmError::DimensionMismatch {
                expected: self.fd,
                got: fd,
            });
        }
        if kind != self.kind {
            return Err(GmmError::KindMismatch {
                expected: self.kind,
                got: kind,
            });
        }
        Ok(())
    }

    /// Writes the accumulator:
    /// `int32 fd, int32 diagonalFlag, f64 occ, f64[fd] sum, f64[cov_len] sum2`.
    pub fn write(&self, w: &mut dyn Write) -> Result<(), GmmError> {
        let mut bw = BufWriter::new(w);
        self.write_to(&mut bw)?;
        bw.flush()?;
        Ok(())
    }

    fn write_to(&self, w: &mut impl Write) -> Result<(), GmmError> {
        w.write_all(&(self.fd as i32).to_le_bytes())?;
        let flag: i32 = match self.kind {
            CovarianceKind::Diagonal => 1,
            CovarianceKind::Full => 0,
        };
        w.write_all(&flag.to_le_bytes())?;
        w.write_all(&self.occ.to_le_bytes())?;
        for v in self.sum.iter().chain(&self.sum2) {
            w.write_all(&v.to_le_bytes())?;
        }
        Ok(())
    }

    /// Reads an accumulator written by [`DensityAccumulator::write`],
    /// consuming exactly one record.
    pub fn read(mut r: &mut dyn Read) -> Result<Self, GmmError> {
        Self::read_from(&mut r)
    }

    fn read_from(r: &mut impl Read) -> Result<Self, GmmError> {
        let fd = read_count(r, "feature dimension")?;
        let kind = match read_i32(r)? {
            1 => CovarianceKind::Diagonal,
            0 => CovarianceKind::Full,
            other => {
                return Err(GmmError::InvalidFormat(format!(
                    "invalid diagonal flag {other}"
                )));
            }
        };
        let occ = read_f64(r)?;
        let sum = read_f64s(r, fd)?;
        let sum2 = read_f64s(r, kind.cov_len(fd))?;
        Ok(Self {
            fd,
            kind,
            occ,
            sum,
            sum2,
        })
    }
}

/// `cov -= μμᵗ` in covariance layout.
fn subtract_outer(cov: &mut [f64], mean: &[f64], kind: CovarianceKind) {
    match kind {
        CovarianceKind::Diagonal => {
            for (c, m) in cov.iter_mut().zip(mean) {
                *c -= m * m;
            }
        }
        CovarianceKind::Full => {
            for i in 0..mean.len() {
                for j in 0..=i {
                    cov[packed_index(i, j)] -= mean[i] * mean[j];
                }
            }
        }
    }
}

/// Turns a second moment into the scatter about a fixed mean `m`:
/// `E[xxᵗ] − m E[x]ᵗ − E[x] mᵗ + m mᵗ`.
fn subtract_cross(cov: &mut [f64], m: &[f64], sum: &[f64], occ: f64, kind: CovarianceKind) {
    let ex: Vec<f64> = sum.iter().map(|s| s / occ).collect();
    match kind {
        CovarianceKind::Diagonal => {
            for i in 0..m.len() {
                cov[i] += -2.0 * m[i] * ex[i] + m[i] * m[i];
            }
        }
        CovarianceKind::Full => {
            for i in 0..m.len() {
                for j in 0..=i {
                    cov[packed_index(i, j)] += -m[i] * ex[j] - ex[i] * m[j] + m[i] * m[j];
                }
            }
        }
    }
}

/// Statistics of every component of a mixture.
#[derive(Debug, Clone, PartialEq)]
pub struct MixtureAccumulator {
    fd: usize,
    kind: CovarianceKind,
    accs: Vec<DensityAccumulator>,
}

impl MixtureAccumulator {
    pub fn new(fd: usize, nd: usize, kind: CovarianceKind) -> Self {
        Self {
            fd,
            kind,
            accs: (0..nd).map(|_| DensityAccumulator::new(fd, kind)).collect(),
        }
    }

    /// Creates an empty accumulator shaped like `m`.
    pub fn for_mixture(m: &Mixture) -> Self {
        Self::new(m.fd(), m.nd(), m.kind())
    }

    pub fn fd(&self) -> usize {
        self.fd
    }

    pub fn nd(&self) -> usize {
        self.accs.len()
    }

    pub fn kind(&self) -> CovarianceKind {
        self.kind
    }

    pub fn densities(&self) -> &[DensityAccumulator] {
        &self.accs
    }

    /// Returns the total occupancy over all components.
    pub fn occupancy(&self) -> f64 {
        self.accs.iter().map(|a| a.occ).sum()
    }

    fn check_mixture(&self, m: &Mixture) -> Result<(), GmmError> {
        if m.fd() != self.fd {
            return Err(GmmError::DimensionMismatch {
                expected: self.fd,
                got: m.fd(),
            });
        }
        if m.nd() != self.accs.len() {
            return Err(GmmError::DimensionMismatch {
                expected: self.accs.len(),
                got: m.nd(),
            });
        }
        if m.kind() != self.kind {
            return Err(GmmError::KindMismatch {
                expected: self.kind,
                got: m.kind(),
            });
        }
        Ok(())
    }

    /// E-step for one vector: evaluates `m` at `x` and accumulates `x`
    /// into every component with its posterior. Returns the log score.
    pub fn accumulate(&mut self, m: &mut Mixture, x: &[f64]) -> Result<f64, GmmError> {
        self.accumulate_weighted(m, x, 1.0)
    }

    /// Like [`MixtureAccumulator::accumulate`] with all posteriors scaled
    /// by `weight`.
    pub fn accumulate_weighted(
        &mut self,
        m: &mut Mixture,
        x: &[f64],
        weight: f64,
    ) -> Result<f64, GmmError> {
        self.check_mixture(m)?;
        if x.len() != self.fd {
            return Err(GmmError::DimensionMismatch {
                expected: self.fd,
                got: x.len(),
            });
        }
        let score = m.evaluate(x);
        for (acc, &p) in self.accs.iter_mut().zip(m.posteriors()) {
            acc.accumulate(weight * p, x);
        }
        Ok(score.log_score)
    }

    /// Accumulates `x` into component `i` only (hard assignment).
    pub fn accumulate_component(&mut self, i: usize, x: &[f64]) -> Result<(), GmmError> {
        let nd = self.accs.len();
        let acc = self.accs.get_mut(i).ok_or_else(|| {
            GmmError::InvalidConfig(format!("component {i} out of range 0..{nd}"))
        })?;
        if x.len() != acc.fd {
            return Err(GmmError::DimensionMismatch {
                expected: acc.fd,
                got: x.len(),
            });
        }
        acc.accumulate(1.0, x);
        Ok(())
    }

    /// Adds the statistics of `other`.
    pub fn propagate(&mut self, other: &MixtureAccumulator) -> Result<(), GmmError> {
        if other.accs.len() != self.accs.len() {
            return Err(GmmError::DimensionMismatch {
                expected: self.accs.len(),
                got: other.accs.len(),
            });
        }
        for (a, b) in self.accs.iter_mut().zip(&other.accs) {
            a.propagate(b)?;
        }
        Ok(())
    }

    pub fn flush(&mut self) {
        self.accs.iter_mut().for_each(DensityAccumulator::flush);
    }

    /// Maximum-likelihood M-step.
    ///
    /// Weights become relative occupancies; components without occupancy
    /// keep mean and covariance. Priors sum to one afterwards.
    pub fn update_ml(&self, m: &mut Mixture, flags: UpdateFlags) -> Result<UpdateReport, GmmError> {
        self.check_mixture(m)?;
        let total = self.occupancy();
        let mut report = UpdateReport::default();
        for (d, acc) in m.components_mut().iter_mut().zip(&self.accs) {
            report.merge(acc.update_ml(d, flags)?);
            if flags.weights && total > 0.0 {
                report.merge(d.set_apr(acc.occ / total));
            }
        }
        m.normalize_weights();
        Ok(report)
    }

    /// MAP M-step towards `prior` with relevance factor `r`.
    ///
    /// Per component, `α = occ / (occ + r)` interpolates the data estimate
    /// with the prior component; the covariance interpolates second
    /// moments so that it stays consistent with the adapted mean.
    pub fn update_map(
        &self,
        m: &mut Mixture,
        prior: &Mixture,
        r: f64,
        flags: UpdateFlags,
    ) -> Result<UpdateReport, GmmError> {
        self.check_mixture(m)?;
        self.check_mixture(prior)?;
        if r < 0.0 || r.is_nan() {
            return Err(GmmError::InvalidConfig(format!(
                "relevance factor must be non-negative, got {r}"
            )));
        }
        let total = self.occupancy();
        let nd = self.accs.len() as f64;
        let mut report = UpdateReport::default();

        for ((d, p), acc) in m
            .components_mut()
            .iter_mut()
            .zip(prior.components())
            .zip(&self.accs)
        {
            let occ = acc.occ;
            let alpha = if occ + r > 0.0 { occ / (occ + r) } else { 0.0 };

            let apr = if flags.weights {
                let w_ml = if total > 0.0 { occ / total } else { 1.0 / nd };
                alpha * w_ml + (1.0 - alpha) * p.apr()
            } else {
                d.apr()
            };

            let (Some(ex), Some(exx)) = (acc.mean(), acc.second_moment()) else {
                // No data: fall back to the prior parameters.
                report.merge(d.fill(apr, p.mue(), p.cov())?);
                continue;
            };

            let mean: Vec<f64> = if flags.means {
                ex.iter()
                    .zip(p.mue())
                    .map(|(x, pm)| alpha * x + (1.0 - alpha) * pm)
                    .collect()
            } else {
                d.mue().to_vec()
            };

            let cov = if flags.variances {
                let mut prior_moment = p.cov().to_vec();
                add_outer(&mut prior_moment, p.mue(), acc.kind);
                let mut cov: Vec<f64> = exx
                    .iter()
                    .zip(&prior_moment)
                    .map(|(a, b)| alpha * a + (1.0 - alpha) * b)
                    .collect();
                subtract_outer(&mut cov, &mean, acc.kind);
                cov
            } else {
                d.cov().to_vec()
            };

            report.merge(d.fill(apr, &mean, &cov)?);
        }
        m.normalize_weights();
        Ok(report)
    }

    /// Writes `int32 nd` followed by `nd` density accumulator records.
    pub fn write(&self, w: &mut dyn Write) -> Result<(), GmmError> {
        let mut bw = BufWriter::new(w);
        bw.write_all(&(self.accs.len() as i32).to_le_bytes())?;
        for a in &self.accs {
            a.write_to(&mut bw)?;
        }
        bw.flush()?;
        Ok(())
    }

    /// Reads an accumulator written by [`MixtureAccumulator::write`],
    /// consuming exactly one record.
    pub fn read(mut r: &mut dyn Read) -> Result<Self, GmmError> {
        let nd = read_count(&mut r, "density count")?;
        let mut accs = Vec::new();
        for _ in 0..nd {
            accs.push(DensityAccumulator::read_from(&mut r)?);
        }
        let (fd, kind) = (accs[0].fd, accs[0].kind);
        if accs.iter().any(|a| a.fd != fd || a.kind != kind) {
            return Err(GmmError::InvalidFormat(
                "density accumulators disagree in shape".into(),
            ));
        }
        Ok(Self { fd, kind, accs })
    }
}

fn add_outer(cov: &mut [f64], mean: &[f64], kind: CovarianceKind) {
    match kind {
        CovarianceKind::Diagonal => {
            for (c, m) in cov.iter_mut().zip(mean) {
                *c += m * m;
            }
        }
        CovarianceKind::Full => {
            for i in 0..mean.len() {
                for j in 0..=i {
                    cov[packed_index(i, j)] += mean[i] * mean[j];
                }
            }
        }
    }
}
