//! Fixed-size worker pool reused across training iterations.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::thread::{self, JoinHandle};

use crossbeam_channel::{Sender, unbounded};
use crossbeam_utils::sync::WaitGroup;
use tracing::debug;

use crate::error::GmmError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A fixed set of threads fed through a job channel.
///
/// [`WorkerPool::run`] submits one batch and blocks on a [`WaitGroup`]
/// until every job of the batch has finished, so callers never observe a
/// partially completed batch.
pub struct WorkerPool {
    sender: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads.
    pub fn new(size: usize) -> Result<Self, GmmError> {
        if size == 0 {
            return Err(GmmError::InvalidConfig(
                "worker pool needs at least one thread".into(),
            ));
        }
        let (tx, rx) = unbounded::<Job>();
        let mut workers = Vec::with_capacity(size);
        for i in 0..size {
            let rx = rx.clone();
            let handle = thread::Builder::new()
                .name(format!("stk-worker-{i}"))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })?;
            workers.push(handle);
        }
        debug!(size, "worker pool started");
        Ok(Self {
            sender: Some(tx),
            workers,
        })
    }

    /// Returns the number of worker threads.
    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Runs every task on the pool and returns the results in task order.
    ///
    /// A panicking task is reported as [`GmmError::Worker`] after the whole
    /// batch has finished; the worker thread survives.
    pub fn run<T, F>(&self, tasks: Vec<F>) -> Result<Vec<T>, GmmError>
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| GmmError::Worker("pool is shut down".into()))?;
        let n = tasks.len();
        let (rtx, rrx) = unbounded::<(usize, Result<T, String>)>();
        let wg = WaitGroup::new();

        for (i, task) in tasks.into_iter().enumerate() {
            let rtx = rtx.clone();
            let wg = wg.clone();
            let job: Job = Box::new(move || {
                let result = catch_unwind(AssertUnwindSafe(task)).map_err(panic_message);
                let _ = rtx.send((i, result));
                drop(wg);
            });
            sender
                .send(job)
                .map_err(|_| GmmError::Worker("job channel closed".into()))?;
        }
        drop(rtx);
        wg.wait();

        let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
        for (i, result) in rrx.try_iter() {
            match result {
                Ok(v) => slots[i] = Some(v),
                Err(msg) => return Err(GmmError::Worker(format!("task {i} panicked: {msg}"))),
            }
        }
        slots
            .into_iter()
            .enumerate()
            .map(|(i, s)| s.ok_or_else(|| GmmError::Worker(format!("task {i} produced no result"))))
            .collect()
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.sender.take();
        for w in self.workers.drain(..) {
            let _ = w.join();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.workers.len())
            .finish()
    }
}
