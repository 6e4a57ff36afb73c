//! Data-parallel ML and EM over chunked data sets.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::accumulator::{DensityAccumulator, MixtureAccumulator, UpdateFlags};
use crate::context::TrainingContext;
use crate::density::{CovarianceKind, Density};
use crate::error::GmmError;
use crate::mixture::Mixture;
use crate::pool::WorkerPool;

/// A data set handed out in chunks to concurrent workers.
///
/// `next_chunk` is called from several threads at once and must hand out
/// every sample exactly once per pass; it returns `None` when the pass is
/// exhausted. `rewind` starts a new pass.
pub trait ChunkedDataSet: Send + Sync {
    fn next_chunk(&self) -> Option<Vec<Vec<f64>>>;
    fn rewind(&self);
}

/// In-memory [`ChunkedDataSet`].
#[derive(Debug)]
pub struct VecDataSet {
    data: Vec<Vec<f64>>,
    chunk_size: usize,
    cursor: Mutex<usize>,
}

impl VecDataSet {
    pub fn new(data: Vec<Vec<f64>>, chunk_size: usize) -> Result<Self, GmmError> {
        if chunk_size == 0 {
            return Err(GmmError::InvalidConfig("chunk size must be positive".into()));
        }
        Ok(Self {
            data,
            chunk_size,
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl ChunkedDataSet for VecDataSet {
    fn next_chunk(&self) -> Option<Vec<Vec<f64>>> {
        let mut cursor = self.cursor.lock();
        if *cursor >= self.data.len() {
            return None;
        }
        let end = (*cursor + self.chunk_size).min(self.data.len());
        let chunk = self.data[*cursor..end].to_vec();
        *cursor = end;
        Some(chunk)
    }

    fn rewind(&self) {
        *self.cursor.lock() = 0;
    }
}

/// Parallel EM: every worker evaluates its chunks against a snapshot of
/// the mixture into a private accumulator; the accumulators are merged
/// and the update runs once on the calling thread.
#[derive(Debug)]
pub struct ParallelEm<'a> {
    pool: &'a WorkerPool,
}

impl<'a> ParallelEm<'a> {
    pub fn new(pool: &'a WorkerPool) -> Self {
        Self { pool }
    }

    /// Runs one EM iteration and returns the average log-likelihood of
    /// the E-step.
    pub fn iterate(
        &self,
        m: &mut Mixture,
        data: &Arc<dyn ChunkedDataSet>,
        flags: UpdateFlags,
        ctx: &mut TrainingContext,
    ) -> Result<f64, GmmError> {
        data.rewind();
        let snapshot = Arc::new(m.clone());
        let tasks: Vec<_> = (0..self.pool.size())
            .map(|_| {
                let snapshot = Arc::clone(&snapshot);
                let data = Arc::clone(data);
                move || -> Result<(MixtureAccumulator, f64, usize), GmmError> {
                    let mut local = (*snapshot).clone();
                    let mut acc = MixtureAccumulator::for_mixture(&local);
                    let (mut ll, mut n) = (0.0, 0);
                    while let Some(chunk) = data.next_chunk() {
                        for x in &chunk {
                            ll += acc.accumulate(&mut local, x)?;
                            n += 1;
                        }
                    }
                    Ok((acc, ll, n))
                }
            })
            .collect();

        let mut merged = MixtureAccumulator::for_mixture(m);
        let (mut ll, mut n) = (0.0, 0);
        for result in self.pool.run(tasks)? {
            let (acc, part_ll, part_n) = result?;
            merged.propagate(&acc)?;
            ll += part_ll;
            n += part_n;
        }
        if n == 0 {
            return Err(GmmError::NotEnoughData { need: 1, got: 0 });
        }
        let report = merged.update_ml(m, flags)?;
        ctx.record_update(report);
        Ok(ll / n as f64)
    }

    /// Runs `iterations` EM iterations; returns the last average
    /// log-likelihood.
    pub fn train(
        &self,
        m: &mut Mixture,
        data: &Arc<dyn ChunkedDataSet>,
        iterations: usize,
        flags: UpdateFlags,
        ctx: &mut TrainingContext,
    ) -> Result<f64, GmmError> {
        let mut avg = f64::NEG_INFINITY;
        for it in 0..iterations {
            avg = self.iterate(m, data, flags, ctx)?;
            debug!(iteration = it, avg_log_likelihood = avg, workers = self.pool.size(), "parallel em iteration");
        }
        Ok(avg)
    }
}

/// Parallel single-density ML estimation.
#[derive(Debug)]
pub struct ParallelMl<'a> {
    pool: &'a WorkerPool,
}

impl<'a> ParallelMl<'a> {
    pub fn new(pool: &'a WorkerPool) -> Self {
        Self { pool }
    }

    /// Estimates one density of dimension `fd` from all chunks.
    pub fn estimate(
        &self,
        data: &Arc<dyn ChunkedDataSet>,
        fd: usize,
        kind: CovarianceKind,
    ) -> Result<Density, GmmError> {
        data.rewind();
        let tasks: Vec<_> = (0..self.pool.size())
            .map(|_| {
                let data = Arc::clone(data);
                move || -> Result<DensityAccumulator, GmmError> {
                    let mut acc = DensityAccumulator::new(fd, kind);
                    while let Some(chunk) = data.next_chunk() {
                        for x in &chunk {
                            if x.len() != fd {
                                return Err(GmmError::DimensionMismatch {
                                    expected: fd,
                                    got: x.len(),
                                });
                            }
                            acc.accumulate(1.0, x);
                        }
                    }
                    Ok(acc)
                }
            })
            .collect();

        let mut merged = DensityAccumulator::new(fd, kind);
        for result in self.pool.run(tasks)? {
            merged.propagate(&result?)?;
        }
        if merged.occupancy() <= 0.0 {
            return Err(GmmError::NotEnoughData { need: 1, got: 0 });
        }
        let mut d = Density::new(fd, kind);
        merged.update_ml(&mut d, UpdateFlags::default())?;
        Ok(d)
    }
}
