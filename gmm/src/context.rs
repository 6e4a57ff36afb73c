//! Explicit training state: random source and diagnostics.

use rand::SeedableRng;
use rand::rngs::StdRng;

use crate::density::UpdateReport;

/// Counters of numeric repairs and rejected operations during training.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Diagnostics {
    /// Non-finite parameter values replaced on update.
    pub nan_fixes: usize,
    /// Full covariances reduced to their diagonal.
    pub diagonal_fallbacks: usize,
    /// Empty clusters repaired by splitting another cluster.
    pub empty_clusters: usize,
    /// EBW updates abandoned because the variance never became positive.
    pub ebw_abandoned: usize,
    /// Cluster splits rejected for producing too small clusters.
    pub rejected_splits: usize,
}

impl Diagnostics {
    /// Returns true if nothing was repaired or rejected.
    pub fn is_clean(&self) -> bool {
        *self == Diagnostics::default()
    }
}

/// Context threaded through the estimators in place of global state.
///
/// Carries the random generator used by k-means/LBG/hierarchical
/// initialization, so a fixed seed gives a reproducible model.
#[derive(Debug, Clone)]
pub struct TrainingContext {
    rng: StdRng,
    diagnostics: Diagnostics,
}

impl TrainingContext {
    /// Creates a context with a deterministic generator.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            diagnostics: Diagnostics::default(),
        }
    }

    /// Creates a context seeded from the operating system.
    pub fn from_entropy() -> Self {
        Self {
            rng: StdRng::from_entropy(),
            diagnostics: Diagnostics::default(),
        }
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn diagnostics_mut(&mut self) -> &mut Diagnostics {
        &mut self.diagnostics
    }

    /// Folds the repairs of a parameter update into the diagnostics.
    pub fn record_update(&mut self, report: UpdateReport) {
        self.diagnostics.nan_fixes += report.nan_fixes;
        self.diagnostics.diagonal_fallbacks += report.diagonalized;
    }

    /// Returns and resets the diagnostics.
    pub fn take_diagnostics(&mut self) -> Diagnostics {
        std::mem::take(&mut self.diagnostics)
    }
}

impl Default for TrainingContext {
    fn default() -> Self {
        Self::seeded(0)
    }
}
