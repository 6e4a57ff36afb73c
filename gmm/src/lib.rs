//! Gaussian densities and mixtures with their estimators.
//!
//! - [`Density`] / [`Mixture`]: diagonal or full covariance Gaussians with
//!   numerically guarded evaluation in the linear and log domain.
//! - [`trainer`]: single-pass ML, EM and MAP.
//! - [`mmie`]: discriminative training with extended Baum-Welch updates.
//! - [`init`]: k-means, LBG and hierarchical Gaussian clustering.
//! - [`ParallelEm`] / [`ParallelMl`]: the same estimators over a
//!   [`ChunkedDataSet`] on a reusable [`WorkerPool`].
//!
//! Randomness and repair counters live in an explicit
//! [`TrainingContext`]; nothing in this crate holds global state.
//!
//! # Example
//!
//! ```
//! use stk_gmm::{CovarianceKind, TrainingContext, UpdateFlags, init, trainer};
//!
//! let data: Vec<[f64; 1]> = (0..200)
//!     .map(|i| [(if i % 2 == 0 { 0.0 } else { 10.0 }) + (i % 10) as f64 * 0.1])
//!     .collect();
//! let mut ctx = TrainingContext::seeded(1);
//! let clusters = init::kmeans(&data, 2, 20, &mut ctx).unwrap();
//! let mut m = clusters.to_mixture(&data, CovarianceKind::Diagonal).unwrap();
//! trainer::em(&mut m, &data, 5, UpdateFlags::default(), &mut ctx).unwrap();
//! assert_eq!(m.nd(), 2);
//! ```

mod accumulator;
mod context;
mod density;
mod error;
mod io;
mod linalg;
mod mixture;
mod parallel;
mod pool;

pub mod init;
pub mod mmie;
pub mod trainer;

pub use accumulator::{DensityAccumulator, MixtureAccumulator, UpdateFlags};
pub use context::{Diagnostics, TrainingContext};
pub use density::{CovarianceKind, Density, MIN_COV, MIN_PROB, MIN_WEIGHT, UpdateReport};
pub use error::GmmError;
pub use io::{read_mixture, read_mixtures, write_mixture, write_mixtures};
pub use linalg::{log_sum_exp, packed_index, packed_len};
pub use mixture::{Mixture, MixtureScore};
pub use mmie::{MmieAccumulator, MmieConfig};
pub use parallel::{ChunkedDataSet, ParallelEm, ParallelMl, VecDataSet};
pub use pool::WorkerPool;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Mixture>();
        assert_sync::<Mixture>();
        assert_send::<MixtureAccumulator>();
        assert_sync::<WorkerPool>();
        assert_sync::<VecDataSet>();
    }
}
