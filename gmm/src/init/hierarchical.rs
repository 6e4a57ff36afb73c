use tracing::{debug, warn};

use super::ranking::{covariance, mean};
use super::{Ranker, check_data, mixture_from_assignment};
use crate::context::TrainingContext;
use crate::density::CovarianceKind;
use crate::error::GmmError;
use crate::linalg::principal_component;
use crate::mixture::Mixture;

/// Splits producing a child with fewer samples are rejected.
pub const MIN_CLUSTER_SIZE: usize = 50;

const SPLIT_ITERATIONS: usize = 20;

struct Cluster {
    members: Vec<usize>,
    splittable: bool,
}

/// Hierarchical Gaussian clustering.
///
/// Starting from one cluster holding all samples, repeatedly splits the
/// splittable cluster that `ranker` scores highest. A split projects the
/// cluster onto its principal axis and runs 2-means on the projection,
/// seeded at `±√λ`. If either half would hold fewer than
/// [`MIN_CLUSTER_SIZE`] samples the split is rejected and the cluster is
/// never tried again. Stops at `nd` clusters or when nothing is left to
/// split, so the result may have fewer than `nd` components.
pub fn hierarchical<S: AsRef<[f64]>>(
    data: &[S],
    nd: usize,
    kind: CovarianceKind,
    ranker: &dyn Ranker,
    ctx: &mut TrainingContext,
) -> Result<Mixture, GmmError> {
    if nd == 0 {
        return Err(GmmError::InvalidConfig(
            "hierarchical clustering needs at least one cluster".into(),
        ));
    }
    check_data(data, 1)?;
    let mut clusters = vec![Cluster {
        members: (0..data.len()).collect(),
        splittable: true,
    }];

    while clusters.len() < nd {
        let mut worst: Option<(usize, f64)> = None;
        for (i, c) in clusters.iter().enumerate() {
            if !c.splittable {
                continue;
            }
            let samples: Vec<&[f64]> = c.members.iter().map(|&j| data[j].as_ref()).collect();
            let rank = ranker.rank(&samples);
            if worst.is_none_or(|(_, r)| rank > r) {
                worst = Some((i, rank));
            }
        }
        let Some((target, rank)) = worst else {
            warn!(
                clusters = clusters.len(),
                requested = nd,
                "no splittable cluster left, stopping early"
            );
            break;
        };

        match split(data, &clusters[target].members) {
            Some((a, b)) if a.len() >= MIN_CLUSTER_SIZE && b.len() >= MIN_CLUSTER_SIZE => {
                debug!(cluster = target, rank, left = a.len(), right = b.len(), "cluster split");
                clusters[target] = Cluster {
                    members: a,
                    splittable: true,
                };
                clusters.push(Cluster {
                    members: b,
                    splittable: true,
                });
            }
            result => {
                let sizes = result.map(|(a, b)| (a.len(), b.len()));
                warn!(cluster = target, ?sizes, "split rejected");
                ctx.diagnostics_mut().rejected_splits += 1;
                clusters[target].splittable = false;
            }
        }
    }

    let mut assignment = vec![0; data.len()];
    for (c, cluster) in clusters.iter().enumerate() {
        for &j in &cluster.members {
            assignment[j] = c;
        }
    }
    let m = mixture_from_assignment(data, &assignment, clusters.len(), kind)?;
    Ok(m)
}

/// Principal-axis 2-means split; `None` if the cluster has no spread.
fn split<S: AsRef<[f64]>>(data: &[S], members: &[usize]) -> Option<(Vec<usize>, Vec<usize>)> {
    let samples: Vec<&[f64]> = members.iter().map(|&j| data[j].as_ref()).collect();
    let mu = mean(&samples);
    let (lambda, axis) = principal_component(&covariance(&samples));
    if lambda <= 0.0 || !lambda.is_finite() {
        return None;
    }
    let proj: Vec<f64> = samples
        .iter()
        .map(|x| x.iter().zip(&mu).zip(&axis).map(|((v, m), a)| (v - m) * a).sum())
        .collect();

    let mut c = [-lambda.sqrt(), lambda.sqrt()];
    let mut side = vec![false; proj.len()];
    for _ in 0..SPLIT_ITERATIONS {
        let mut changed = false;
        for (s, p) in side.iter_mut().zip(&proj) {
            let right = (p - c[1]).abs() < (p - c[0]).abs();
            if *s != right {
                *s = right;
                changed = true;
            }
        }
        let (mut sum, mut n) = ([0.0; 2], [0usize; 2]);
        for (s, p) in side.iter().zip(&proj) {
            let k = usize::from(*s);
            sum[k] += p;
            n[k] += 1;
        }
        for k in 0..2 {
            if n[k] > 0 {
                c[k] = sum[k] / n[k] as f64;
            }
        }
        if !changed {
            break;
        }
    }

    let (mut a, mut b) = (Vec::new(), Vec::new());
    for (&j, &s) in members.iter().zip(&side) {
        if s { b.push(j) } else { a.push(j) }
    }
    Some((a, b))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::init::Ranking;

    fn blobs(per: usize) -> Vec<[f64; 2]> {
        let mut v = Vec::new();
        for i in 0..per {
            let t = i as f64 / per as f64;
            v.push([t, 1.0 - t]);
            v.push([20.0 + t, 20.0 - t]);
        }
        v
    }

    #[test]
    fn test_splits_two_blobs() {
        let data = blobs(60);
        let mut ctx = TrainingContext::seeded(0);
        let m = hierarchical(&data, 2, CovarianceKind::Diagonal, &Ranking::Covariance, &mut ctx).unwrap();
        assert_eq!(m.nd(), 2);
        let mut means: Vec<f64> = m.components().iter().map(|d| d.mue()[0]).collect();
        means.sort_by(|a, b| a.total_cmp(b));
        assert!((means[0] - 0.5).abs() < 0.05);
        assert!((means[1] - 20.5).abs() < 0.05);
        assert!((m.components()[0].apr() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_small_children_are_rejected() {
        let data = blobs(30);
        let mut ctx = TrainingContext::seeded(0);
        let m = hierarchical(&data, 4, CovarianceKind::Full, &Ranking::SampleCount, &mut ctx).unwrap();
        assert_eq!(m.nd(), 1);
        assert_eq!(ctx.diagnostics().rejected_splits, 1);
    }
}
