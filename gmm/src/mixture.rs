//! Weighted sums of Gaussian densities.

use crate::density::{CovarianceKind, Density, MIN_PROB, MIN_WEIGHT, UpdateReport};
use crate::error::GmmError;
use crate::linalg::log_sum_exp;

/// Scores of one mixture evaluation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixtureScore {
    /// Linear-domain mixture probability `Σ apr_i · N_i(x)`.
    pub score: f64,
    /// Log-domain mixture probability via log-sum-exp over
    /// `ln apr_i + ln N_i(x)`, floored at `ln(MIN_PROB)` like `score`.
    pub log_score: f64,
}

#[derive(Debug, Clone)]
struct Evaluation {
    x: Vec<f64>,
    ascores: Vec<f64>,
    log_ascores: Vec<f64>,
    posteriors: Vec<f64>,
    result: MixtureScore,
}

/// A Gaussian mixture model.
///
/// The most recent evaluation (input vector, component scores and
/// posteriors) is cached. [`Mixture::evaluate`] always recomputes;
/// [`Mixture::evaluate_cached`] returns the cached result when called
/// again with an identical vector, which keeps inner loops that score the
/// same frame repeatedly cheap.
#[derive(Debug, Clone)]
pub struct Mixture {
    /// Mixture identifier (e.g. class index).
    pub id: i32,
    fd: usize,
    kind: CovarianceKind,
    components: Vec<Density>,
    last: Option<Evaluation>,
}

impl Mixture {
    /// Creates a mixture of `nd` standard normal components with uniform
    /// priors.
    pub fn new(id: i32, fd: usize, nd: usize, kind: CovarianceKind) -> Self {
        let components = (0..nd)
            .map(|i| {
                let mut d = Density::new(fd, kind);
                d.id = i as i32;
                d.set_apr(1.0 / nd as f64);
                d
            })
            .collect();
        Self {
            id,
            fd,
            kind,
            components,
            last: None,
        }
    }

    /// Builds a mixture from existing densities, which must share the
    /// dimension and covariance layout.
    pub fn from_components(id: i32, components: Vec<Density>) -> Result<Self, GmmError> {
        let first = components
            .first()
            .ok_or_else(|| GmmError::InvalidConfig("mixture needs at least one component".into()))?;
        let (fd, kind) = (first.fd(), first.kind());
        for d in &components {
            if d.fd() != fd {
                return Err(GmmError::DimensionMismatch {
                    expected: fd,
                    got: d.fd(),
                });
            }
            if d.kind() != kind {
                return Err(GmmError::KindMismatch {
                    expected: kind,
                    got: d.kind(),
                });
            }
        }
        Ok(Self {
            id,
            fd,
            kind,
            components,
            last: None,
        })
    }

    /// Returns the feature dimension.
    pub fn fd(&self) -> usize {
        self.fd
    }

    /// Returns the number of components.
    pub fn nd(&self) -> usize {
        self.components.len()
    }

    /// Returns the covariance layout shared by all components.
    pub fn kind(&self) -> CovarianceKind {
        self.kind
    }

    /// Returns the components.
    pub fn components(&self) -> &[Density] {
        &self.components
    }

    /// Returns the components for modification; the evaluation cache is
    /// dropped.
    pub fn components_mut(&mut self) -> &mut [Density] {
        self.last = None;
        &mut self.components
    }

    /// Evaluates the mixture at `x`, refreshing the cache.
    pub fn evaluate(&mut self, x: &[f64]) -> MixtureScore {
        debug_assert_eq!(x.len(), self.fd);
        let nd = self.components.len();
        let mut eval = match self.last.take() {
            Some(mut e) => {
                e.x.clear();
                e.x.extend_from_slice(x);
                e
            }
            None => Evaluation {
                x: x.to_vec(),
                ascores: vec![0.0; nd],
                log_ascores: vec![0.0; nd],
                posteriors: vec![0.0; nd],
                result: MixtureScore {
                    score: 0.0,
                    log_score: 0.0,
                },
            },
        };

        let mut score = 0.0;
        for (i, d) in self.components.iter().enumerate() {
            let a = d.ascore(x);
            eval.ascores[i] = a;
            eval.log_ascores[i] = d.apr().ln() + d.log_score(x);
            score += a;
        }
        // Posteriors use the unfloored total so they stay meaningful far
        // from every component.
        let log_total = log_sum_exp(&eval.log_ascores);
        for i in 0..nd {
            eval.posteriors[i] = (eval.log_ascores[i] - log_total).exp();
        }
        let log_score = log_total.max(MIN_PROB.ln());
        eval.result = MixtureScore { score, log_score };

        let result = eval.result;
        self.last = Some(eval);
        result
    }

    /// Evaluates the mixture at `x`, returning the cached result if `x`
    /// equals the previously evaluated vector.
    pub fn evaluate_cached(&mut self, x: &[f64]) -> MixtureScore {
        if let Some(e) = &self.last {
            if e.x.as_slice() == x {
                return e.result;
            }
        }
        self.evaluate(x)
    }

    /// Returns the result of the last evaluation, if any.
    pub fn last_score(&self) -> Option<MixtureScore> {
        self.last.as_ref().map(|e| e.result)
    }

    /// Returns the prior-weighted component scores of the last evaluation.
    pub fn ascores(&self) -> &[f64] {
        self.last.as_ref().map(|e| e.ascores.as_slice()).unwrap_or(&[])
    }

    /// Returns the component posteriors of the last evaluation, computed
    /// in the log domain; empty before the first evaluation.
    pub fn posteriors(&self) -> &[f64] {
        self.last.as_ref().map(|e| e.posteriors.as_slice()).unwrap_or(&[])
    }

    /// Returns the index of the component with the highest posterior.
    pub fn classify(&mut self, x: &[f64]) -> usize {
        self.evaluate_cached(x);
        let mut best = 0;
        let post = self.posteriors();
        for i in 1..post.len() {
            if post[i] > post[best] {
                best = i;
            }
        }
        best
    }

    /// Rescales the priors to sum to one, applying the weight floor.
    pub fn normalize_weights(&mut self) {
        self.last = None;
        for _ in 0..2 {
            let sum: f64 = self.components.iter().map(|d| d.apr()).sum();
            if sum <= 0.0 || !sum.is_finite() {
                let uniform = 1.0 / self.components.len() as f64;
                self.components.iter_mut().for_each(|d| {
                    d.set_apr(uniform);
                });
                return;
            }
            let mut floored = false;
            for d in self.components.iter_mut() {
                let w = d.apr() / sum;
                if w < MIN_WEIGHT {
                    floored = true;
                }
                d.set_apr(w);
            }
            if !floored {
                return;
            }
        }
    }

    /// Updates every component and returns the accumulated repairs.
    pub fn update(&mut self) -> UpdateReport {
        self.last = None;
        let mut report = UpdateReport::default();
        for d in self.components.iter_mut() {
            report.merge(d.update());
        }
        report
    }

    /// Projects the mixture onto the given dimensions.
    pub fn marginalize(&self, dims: &[usize]) -> Result<Mixture, GmmError> {
        let components = self
            .components
            .iter()
            .map(|d| d.marginalize(dims))
            .collect::<Result<Vec<_>, _>>()?;
        Mixture::from_components(self.id, components)
    }

    /// Returns a copy with every component reduced to diagonal covariance.
    pub fn to_diagonal(&self) -> Mixture {
        Mixture {
            id: self.id,
            fd: self.fd,
            kind: CovarianceKind::Diagonal,
            components: self.components.iter().map(|d| d.to_diagonal()).collect(),
            last: None,
        }
    }
}
