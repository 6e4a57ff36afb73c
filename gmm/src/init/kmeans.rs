use rand::seq::index::sample;

use super::{Clustering, check_data, refine};
use crate::context::TrainingContext;
use crate::error::GmmError;

/// k-means clustering from `k` distinct random samples.
pub fn kmeans<S: AsRef<[f64]>>(
    data: &[S],
    k: usize,
    max_iterations: usize,
    ctx: &mut TrainingContext,
) -> Result<Clustering, GmmError> {
    if k == 0 {
        return Err(GmmError::InvalidConfig("k-means needs k > 0".into()));
    }
    check_data(data, k)?;
    let start: Vec<Vec<f64>> = sample(ctx.rng(), data.len(), k)
        .into_iter()
        .map(|i| data[i].as_ref().to_vec())
        .collect();
    Ok(refine(data, start, max_iterations, ctx))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_separates_two_groups() {
        let data: Vec<[f64; 1]> = [0.0, 0.1, 0.2, 9.8, 9.9, 10.0].map(|v| [v]).to_vec();
        let mut ctx = TrainingContext::seeded(7);
        let c = kmeans(&data, 2, 20, &mut ctx).unwrap();
        assert_eq!(c.assignment[0], c.assignment[1]);
        assert_eq!(c.assignment[0], c.assignment[2]);
        assert_eq!(c.assignment[3], c.assignment[5]);
        assert_ne!(c.assignment[0], c.assignment[3]);
        assert_eq!(c.counts(), vec![3, 3]);
    }

    #[test]
    fn test_reproducible_with_seed() {
        let data: Vec<[f64; 2]> = (0..50).map(|i| [(i * 7 % 13) as f64, (i * 3 % 5) as f64]).collect();
        let a = kmeans(&data, 4, 10, &mut TrainingContext::seeded(3)).unwrap();
        let b = kmeans(&data, 4, 10, &mut TrainingContext::seeded(3)).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_needs_enough_samples() {
        let data = vec![[1.0]];
        let err = kmeans(&data, 2, 5, &mut TrainingContext::seeded(0)).unwrap_err();
        assert!(matches!(err, GmmError::NotEnoughData { need: 2, got: 1 }));
    }

    #[test]
    fn test_empty_cluster_is_repaired() {
        // Identical start points: one cluster starts empty.
        let data: Vec<[f64; 1]> = vec![[0.0], [0.0], [1.0], [10.0], [11.0]];
        let mut ctx = TrainingContext::seeded(0);
        let c = super::super::refine(&data, vec![vec![0.0], vec![0.0], vec![10.5]], 20, &mut ctx);
        assert!(ctx.diagnostics().empty_clusters >= 1);
        assert!(c.counts().iter().all(|&n| n > 0));
    }
}
