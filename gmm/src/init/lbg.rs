use tracing::debug;

use super::{Clustering, check_data, mean_std, refine};
use crate::context::TrainingContext;
use crate::error::GmmError;

/// Relative offset (in standard deviations) of the two halves of a split
/// centroid.
pub const SPLIT_EPSILON: f64 = 0.2;

/// Linde-Buzo-Gray codebook growth.
///
/// Starts from the global mean and repeatedly splits the cluster with the
/// highest occupancy into `c ± ε·σ`, refining all centroids with up to
/// `iterations` Lloyd passes after every split, until `nd` clusters exist.
pub fn lbg<S: AsRef<[f64]>>(
    data: &[S],
    nd: usize,
    iterations: usize,
    ctx: &mut TrainingContext,
) -> Result<Clustering, GmmError> {
    if nd == 0 {
        return Err(GmmError::InvalidConfig("LBG needs at least one cluster".into()));
    }
    let fd = check_data(data, nd)?;
    let all: Vec<usize> = (0..data.len()).collect();
    let mut clustering = Clustering {
        centroids: vec![mean_std(data, &all, fd).0],
        assignment: vec![0; data.len()],
    };

    while clustering.centroids.len() < nd {
        let counts = clustering.counts();
        let largest = (0..counts.len()).max_by_key(|&i| counts[i]).unwrap_or(0);
        let members: Vec<usize> = clustering
            .assignment
            .iter()
            .enumerate()
            .filter(|&(_, &a)| a == largest)
            .map(|(i, _)| i)
            .collect();
        let (mean, std) = mean_std(data, &members, fd);

        let mut centroids = clustering.centroids;
        centroids[largest] = mean.iter().zip(&std).map(|(m, s)| m - SPLIT_EPSILON * s).collect();
        centroids.push(mean.iter().zip(&std).map(|(m, s)| m + SPLIT_EPSILON * s).collect());
        debug!(split = largest, occupancy = counts[largest], clusters = centroids.len(), "lbg split");

        clustering = refine(data, centroids, iterations, ctx);
    }
    Ok(clustering)
}
