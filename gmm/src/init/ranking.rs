use serde::{Deserialize, Serialize};

use super::anderson_darling::anderson_darling;
use crate::linalg::principal_component;

/// Scores a cluster for splitting; the highest-ranked cluster is split
/// first.
pub trait Ranker {
    fn rank(&self, samples: &[&[f64]]) -> f64;
}

/// Built-in ranking strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ranking {
    /// Trace of the sample covariance.
    #[default]
    Covariance,
    /// Largest eigenvalue of the sample covariance.
    Eigenvalue,
    /// Anderson-Darling statistic of the projection onto the principal
    /// axis; large values indicate a non-Gaussian cluster.
    AndersonDarling,
    /// Number of samples.
    SampleCount,
}

impl Ranker for Ranking {
    fn rank(&self, samples: &[&[f64]]) -> f64 {
        if samples.is_empty() {
            return 0.0;
        }
        match self {
            Ranking::SampleCount => samples.len() as f64,
            Ranking::Covariance => {
                let cov = covariance(samples);
                (0..cov.len()).map(|i| cov[i][i]).sum()
            }
            Ranking::Eigenvalue => principal_component(&covariance(samples)).0,
            Ranking::AndersonDarling => {
                let (_, axis) = principal_component(&covariance(samples));
                let projected: Vec<f64> = samples
                    .iter()
                    .map(|x| x.iter().zip(&axis).map(|(a, b)| a * b).sum())
                    .collect();
                anderson_darling(&projected)
            }
        }
    }
}

/// Sample mean.
pub(crate) fn mean(samples: &[&[f64]]) -> Vec<f64> {
    let fd = samples.first().map_or(0, |x| x.len());
    let mut m = vec![0.0; fd];
    for x in samples {
        for (a, v) in m.iter_mut().zip(x.iter()) {
            *a += v;
        }
    }
    let n = samples.len().max(1) as f64;
    m.iter_mut().for_each(|a| *a /= n);
    m
}

/// Full (maximum-likelihood) sample covariance.
pub(crate) fn covariance(samples: &[&[f64]]) -> Vec<Vec<f64>> {
    let mu = mean(samples);
    let fd = mu.len();
    let mut c = vec![vec![0.0; fd]; fd];
    for x in samples {
        for i in 0..fd {
            let di = x[i] - mu[i];
            for j in 0..=i {
                c[i][j] += di * (x[j] - mu[j]);
            }
        }
    }
    let n = samples.len().max(1) as f64;
    for i in 0..fd {
        for j in 0..=i {
            c[i][j] /= n;
            c[j][i] = c[i][j];
        }
    }
    c
}
