//! Model initialization: k-means, LBG and hierarchical Gaussian
//! clustering.
//!
//! All routines take an explicit [`TrainingContext`] for randomness and
//! diagnostics, so a fixed seed reproduces the same clustering.

mod anderson_darling;
mod hierarchical;
mod kmeans;
mod lbg;
mod ranking;

pub use anderson_darling::{anderson_darling, normal_cdf};
pub use hierarchical::{MIN_CLUSTER_SIZE, hierarchical};
pub use kmeans::kmeans;
pub use lbg::{SPLIT_EPSILON, lbg};
pub use ranking::{Ranker, Ranking};

use tracing::{debug, warn};

use crate::accumulator::{MixtureAccumulator, UpdateFlags};
use crate::context::TrainingContext;
use crate::density::CovarianceKind;
use crate::error::GmmError;
use crate::linalg::sq_dist;
use crate::mixture::Mixture;
use crate::trainer::check_dim;

/// Result of a hard clustering.
#[derive(Debug, Clone, PartialEq)]
pub struct Clustering {
    pub centroids: Vec<Vec<f64>>,
    /// Cluster index of every sample.
    pub assignment: Vec<usize>,
}

impl Clustering {
    /// Returns the number of samples per cluster.
    pub fn counts(&self) -> Vec<usize> {
        let mut counts = vec![0; self.centroids.len()];
        for &a in &self.assignment {
            counts[a] += 1;
        }
        counts
    }

    /// Builds a mixture with one ML-estimated component per cluster,
    /// weighted by cluster size.
    pub fn to_mixture<S: AsRef<[f64]>>(
        &self,
        data: &[S],
        kind: CovarianceKind,
    ) -> Result<Mixture, GmmError> {
        mixture_from_assignment(data, &self.assignment, self.centroids.len(), kind)
    }
}

/// Builds a mixture from a hard assignment of `data` to `nd` clusters.
pub fn mixture_from_assignment<S: AsRef<[f64]>>(
    data: &[S],
    assignment: &[usize],
    nd: usize,
    kind: CovarianceKind,
) -> Result<Mixture, GmmError> {
    let first = data.first().ok_or(GmmError::NotEnoughData { need: 1, got: 0 })?;
    let fd = first.as_ref().len();
    let mut m = Mixture::new(0, fd, nd, kind);
    let mut acc = MixtureAccumulator::for_mixture(&m);
    for (x, &a) in data.iter().zip(assignment) {
        acc.accumulate_component(a, check_dim(x.as_ref(), fd)?)?;
    }
    acc.update_ml(&mut m, UpdateFlags::default())?;
    Ok(m)
}

pub(crate) fn check_data<S: AsRef<[f64]>>(data: &[S], need: usize) -> Result<usize, GmmError> {
    if data.len() < need.max(1) {
        return Err(GmmError::NotEnoughData {
            need: need.max(1),
            got: data.len(),
        });
    }
    let fd = data[0].as_ref().len();
    for x in data {
        check_dim(x.as_ref(), fd)?;
    }
    Ok(fd)
}

pub(crate) fn nearest(centroids: &[Vec<f64>], x: &[f64]) -> usize {
    let mut best = 0;
    let mut best_d = f64::INFINITY;
    for (i, c) in centroids.iter().enumerate() {
        let d = sq_dist(c, x);
        if d < best_d {
            best_d = d;
            best = i;
        }
    }
    best
}

/// Per-dimension mean and standard deviation of the selected samples.
pub(crate) fn mean_std<S: AsRef<[f64]>>(data: &[S], members: &[usize], fd: usize) -> (Vec<f64>, Vec<f64>) {
    let n = members.len().max(1) as f64;
    let mut mean = vec![0.0; fd];
    for &i in members {
        for (m, v) in mean.iter_mut().zip(data[i].as_ref()) {
            *m += v;
        }
    }
    mean.iter_mut().for_each(|m| *m /= n);
    let mut var = vec![0.0; fd];
    for &i in members {
        for ((s, v), m) in var.iter_mut().zip(data[i].as_ref()).zip(&mean) {
            *s += (v - m) * (v - m);
        }
    }
    let std = var.iter().map(|s| (s / n).sqrt()).collect();
    (mean, std)
}

/// Lloyd iterations from the given centroids.
///
/// A cluster that loses all samples is repaired by splitting the largest
/// cluster along its standard deviation; each repair is counted in the
/// diagnostics.
pub(crate) fn refine<S: AsRef<[f64]>>(
    data: &[S],
    mut centroids: Vec<Vec<f64>>,
    max_iterations: usize,
    ctx: &mut TrainingContext,
) -> Clustering {
    let fd = centroids.first().map_or(0, Vec::len);
    let k = centroids.len();
    let mut assignment = vec![usize::MAX; data.len()];

    for it in 0..max_iterations.max(1) {
        let mut moves = 0;
        for (a, x) in assignment.iter_mut().zip(data) {
            let c = nearest(&centroids, x.as_ref());
            if *a != c {
                *a = c;
                moves += 1;
            }
        }

        let mut members: Vec<Vec<usize>> = vec![Vec::new(); k];
        for (i, &a) in assignment.iter().enumerate() {
            members[a].push(i);
        }
        for (c, m) in centroids.iter_mut().zip(&members) {
            if !m.is_empty() {
                *c = mean_std(data, m, fd).0;
            }
        }

        let mut repaired = false;
        for empty in 0..k {
            if !members[empty].is_empty() {
                continue;
            }
            let largest = (0..k).max_by_key(|&i| members[i].len()).unwrap_or(0);
            let (mean, std) = mean_std(data, &members[largest], fd);
            centroids[largest] = mean.iter().zip(&std).map(|(m, s)| m - SPLIT_EPSILON * s).collect();
            centroids[empty] = mean.iter().zip(&std).map(|(m, s)| m + SPLIT_EPSILON * s).collect();
            let (stay, go): (Vec<usize>, Vec<usize>) =
                members[largest].iter().copied().partition(|&i| {
                    let x = data[i].as_ref();
                    sq_dist(x, &centroids[largest]) <= sq_dist(x, &centroids[empty])
                });
            members[largest] = stay;
            members[empty] = go;
            ctx.diagnostics_mut().empty_clusters += 1;
            warn!(cluster = empty, from = largest, "empty cluster repaired by splitting");
            repaired = true;
        }

        debug!(iteration = it, moves, "k-means iteration");
        if moves == 0 && !repaired {
            break;
        }
    }

    for (a, x) in assignment.iter_mut().zip(data) {
        *a = nearest(&centroids, x.as_ref());
    }
    Clustering {
        centroids,
        assignment,
    }
}
