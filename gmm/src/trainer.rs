//! Single-threaded ML, EM and MAP estimation.

use tracing::debug;

use crate::accumulator::{DensityAccumulator, MixtureAccumulator, UpdateFlags};
use crate::context::TrainingContext;
use crate::density::{CovarianceKind, Density};
use crate::error::GmmError;
use crate::mixture::Mixture;

/// Estimates a single density from `data` in one pass
/// (`μ = E[x]`, `K = E[xxᵗ] − μμᵗ`).
pub fn ml<S: AsRef<[f64]>>(data: &[S], kind: CovarianceKind) -> Result<Density, GmmError> {
    let first = data.first().ok_or(GmmError::NotEnoughData { need: 1, got: 0 })?;
    let fd = first.as_ref().len();
    let mut acc = DensityAccumulator::new(fd, kind);
    for x in data {
        let x = check_dim(x.as_ref(), fd)?;
        acc.accumulate(1.0, x);
    }
    let mut d = Density::new(fd, kind);
    acc.update_ml(&mut d, UpdateFlags::default())?;
    Ok(d)
}

/// Runs `iterations` EM passes on `m`.
///
/// Returns the average log-likelihood of the last E-step. Parameter
/// repairs are recorded in `ctx`.
pub fn em<S: AsRef<[f64]>>(
    m: &mut Mixture,
    data: &[S],
    iterations: usize,
    flags: UpdateFlags,
    ctx: &mut TrainingContext,
) -> Result<f64, GmmError> {
    if data.is_empty() {
        return Err(GmmError::NotEnoughData { need: 1, got: 0 });
    }
    let mut acc = MixtureAccumulator::for_mixture(m);
    let mut avg = f64::NEG_INFINITY;
    for it in 0..iterations {
        acc.flush();
        avg = e_step(&mut acc, m, data)?;
        let report = acc.update_ml(m, flags)?;
        ctx.record_update(report);
        debug!(iteration = it, avg_log_likelihood = avg, "em iteration");
    }
    Ok(avg)
}

/// Runs `iterations` MAP passes adapting `m` towards the data, with
/// `prior` as the fixed prior model and relevance factor `r`.
pub fn map<S: AsRef<[f64]>>(
    m: &mut Mixture,
    prior: &Mixture,
    data: &[S],
    r: f64,
    iterations: usize,
    flags: UpdateFlags,
    ctx: &mut TrainingContext,
) -> Result<f64, GmmError> {
    if data.is_empty() {
        return Err(GmmError::NotEnoughData { need: 1, got: 0 });
    }
    let mut acc = MixtureAccumulator::for_mixture(m);
    let mut avg = f64::NEG_INFINITY;
    for it in 0..iterations {
        acc.flush();
        avg = e_step(&mut acc, m, data)?;
        let report = acc.update_map(m, prior, r, flags)?;
        ctx.record_update(report);
        debug!(iteration = it, avg_log_likelihood = avg, relevance = r, "map iteration");
    }
    Ok(avg)
}

/// Average log-likelihood of `data` under `m`.
pub fn average_log_likelihood<S: AsRef<[f64]>>(m: &mut Mixture, data: &[S]) -> Result<f64, GmmError> {
    if data.is_empty() {
        return Err(GmmError::NotEnoughData { need: 1, got: 0 });
    }
    let mut total = 0.0;
    for x in data {
        let x = check_dim(x.as_ref(), m.fd())?;
        total += m.evaluate(x).log_score;
    }
    Ok(total / data.len() as f64)
}

fn e_step<S: AsRef<[f64]>>(
    acc: &mut MixtureAccumulator,
    m: &mut Mixture,
    data: &[S],
) -> Result<f64, GmmError> {
    let mut total = 0.0;
    for x in data {
        total += acc.accumulate(m, x.as_ref())?;
    }
    Ok(total / data.len() as f64)
}

pub(crate) fn check_dim(x: &[f64], fd: usize) -> Result<&[f64], GmmError> {
    if x.len() != fd {
        return Err(GmmError::DimensionMismatch {
            expected: fd,
            got: x.len(),
        });
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ml_full() {
        let data = vec![vec![0.0, 0.0], vec![2.0, 2.0], vec![0.0, 2.0], vec![2.0, 0.0]];
        let d = ml(&data, CovarianceKind::Full).unwrap();
        assert_eq!(d.mue(), &[1.0, 1.0]);
        assert_eq!(d.cov(), &[1.0, 0.0, 1.0]);
    }

    #[test]
    fn test_ml_rejects_ragged_and_empty() {
        let ragged = vec![vec![0.0, 0.0], vec![1.0]];
        assert!(matches!(
            ml(&ragged, CovarianceKind::Diagonal),
            Err(GmmError::DimensionMismatch { expected: 2, got: 1 })
        ));
        let empty: Vec<Vec<f64>> = Vec::new();
        assert!(matches!(
            ml(&empty, CovarianceKind::Diagonal),
            Err(GmmError::NotEnoughData { .. })
        ));
    }

    #[test]
    fn test_em_does_not_decrease_likelihood() {
        let data: Vec<[f64; 1]> = (0..40)
            .map(|i| if i % 2 == 0 { [i as f64 * 0.01] } else { [8.0 + i as f64 * 0.01] })
            .collect();
        let mut m = Mixture::new(0, 1, 2, CovarianceKind::Diagonal);
        m.components_mut()[0].fill(0.5, &[1.0], &[4.0]).unwrap();
        m.components_mut()[1].fill(0.5, &[6.0], &[4.0]).unwrap();
        let mut ctx = TrainingContext::seeded(1);
        let before = average_log_likelihood(&mut m, &data).unwrap();
        em(&mut m, &data, 10, UpdateFlags::default(), &mut ctx).unwrap();
        let after = average_log_likelihood(&mut m, &data).unwrap();
        assert!(after > before);
        let sum: f64 = m.components().iter().map(|d| d.apr()).sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
