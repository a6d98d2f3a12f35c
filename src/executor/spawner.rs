//! Execution resources for executor workers.
//!
//! The executor never creates threads itself; it hands one drain job at a
//! time to a [`WorkerSpawner`] whenever it has queued work and no worker.

use crate::core::{DaoError, Result};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::thread;
use tracing::error;

/// One drain cycle of an executor worker
pub type WorkerJob = Box<dyn FnOnce() + Send + 'static>;

/// Runs executor drain jobs
pub trait WorkerSpawner: Send + Sync {
    fn spawn(&self, name: &str, job: WorkerJob) -> Result<()>;
}

/// Dedicated named OS thread per drain cycle
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

impl WorkerSpawner for ThreadSpawner {
    fn spawn(&self, name: &str, job: WorkerJob) -> Result<()> {
        thread::Builder::new()
            .name(name.to_string())
            .spawn(job)
            .map(|_| ())
            .map_err(|err| {
                error!(worker = name, error = %err, "failed to spawn worker thread");
                DaoError::ExecutionError(format!("failed to spawn worker '{}': {}", name, err))
            })
    }
}

/// Runs drain cycles on a tokio runtime's blocking pool
#[derive(Debug, Clone)]
pub struct TokioBlockingSpawner {
    handle: tokio::runtime::Handle,
}

impl TokioBlockingSpawner {
    pub fn new(handle: tokio::runtime::Handle) -> Self {
        Self { handle }
    }

    /// Bind to the runtime the caller is running on
    pub fn current() -> Result<Self> {
        tokio::runtime::Handle::try_current()
            .map(Self::new)
            .map_err(|err| DaoError::ExecutionError(format!("no tokio runtime: {}", err)))
    }
}

impl WorkerSpawner for TokioBlockingSpawner {
    fn spawn(&self, _name: &str, job: WorkerJob) -> Result<()> {
        // Blocking tasks cannot be cancelled once started; the handle is not needed.
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }
}

/// Holds drain jobs until the owner runs them explicitly
///
/// Gives tests full control over when the worker executes: operations stay
/// queued until [`run_all`](ManualSpawner::run_all) is called.
#[derive(Default)]
pub struct ManualSpawner {
    pending: Mutex<VecDeque<WorkerJob>>,
    spawned: Mutex<usize>,
}

impl ManualSpawner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Jobs spawned but not yet run
    pub fn pending(&self) -> Result<usize> {
        Ok(self.pending.lock()?.len())
    }

    /// Jobs spawned so far
    pub fn spawned_count(&self) -> Result<usize> {
        Ok(*self.spawned.lock()?)
    }

    /// Run the oldest pending job on the calling thread
    pub fn run_next(&self) -> Result<bool> {
        let job = self.pending.lock()?.pop_front();
        match job {
            Some(job) => {
                job();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Run pending jobs until none are left; returns how many ran
    pub fn run_all(&self) -> Result<usize> {
        let mut ran = 0;
        while self.run_next()? {
            ran += 1;
        }
        Ok(ran)
    }
}

impl WorkerSpawner for ManualSpawner {
    fn spawn(&self, _name: &str, job: WorkerJob) -> Result<()> {
        self.pending.lock()?.push_back(job);
        *self.spawned.lock()? += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_manual_spawner_defers_jobs() {
        let spawner = ManualSpawner::new();
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            spawner
                .spawn("worker", Box::new(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                }))
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 0);
        assert_eq!(spawner.pending().unwrap(), 2);
        assert_eq!(spawner.run_all().unwrap(), 2);
        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(spawner.spawned_count().unwrap(), 2);
    }

    #[test]
    fn test_thread_spawner_names_thread() {
        let (tx, rx) = std::sync::mpsc::channel();
        ThreadSpawner
            .spawn("named-worker", Box::new(move || {
                let _ = tx.send(thread::current().name().map(str::to_string));
            }))
            .unwrap();
        assert_eq!(rx.recv().unwrap().as_deref(), Some("named-worker"));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_tokio_blocking_spawner_runs_job() {
        let spawner = TokioBlockingSpawner::current().unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();
        spawner
            .spawn("blocking", Box::new(move || {
                let _ = tx.send(42);
            }))
            .unwrap();
        assert_eq!(rx.await.unwrap(), 42);
    }
}
