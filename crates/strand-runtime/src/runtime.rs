//! The worker pool.
//!
//! A [`Runtime`] owns a fixed set of workers, one OS thread each. There is
//! no cross-worker queue: work is partitioned once, at dispatch time, and
//! an operation always resumes on the worker that submitted it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use strand_core::error::Result;
use strand_core::sinfo;

use crate::task::Task;
use crate::worker::Worker;

/// Fixed pool of reactor workers.
pub struct Runtime {
    workers: Box<[Worker]>,
    is_running: AtomicBool,
}

impl Runtime {
    /// Create a runtime with one worker per hardware thread.
    pub fn new() -> Result<Self> {
        Self::with_workers(0)
    }

    /// Create a runtime with `count` workers; 0 selects the hardware
    /// concurrency (at least one). Fails if any worker's ring cannot be
    /// created.
    pub fn with_workers(count: usize) -> Result<Self> {
        let count = if count == 0 {
            thread::available_parallelism().map(usize::from).unwrap_or(1)
        } else {
            count
        };

        let mut workers = Vec::with_capacity(count);
        for _ in 0..count {
            workers.push(Worker::new()?);
        }

        sinfo!("runtime: {} workers ready", count);

        Ok(Self {
            workers: workers.into_boxed_slice(),
            is_running: AtomicBool::new(false),
        })
    }

    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.is_running.load(Ordering::Relaxed)
    }

    /// The workers of this pool, in dispatch order.
    #[inline]
    pub fn workers(&self) -> &[Worker] {
        &self.workers
    }

    /// Start one thread per worker and block until every worker has
    /// stopped. Only the first caller runs; concurrent calls return
    /// immediately.
    pub fn run(&self) {
        if self.is_running.swap(true, Ordering::Relaxed) {
            return;
        }

        thread::scope(|scope| {
            for (i, worker) in self.workers.iter().enumerate() {
                thread::Builder::new()
                    .name(format!("strand-worker-{}", i))
                    .spawn_scoped(scope, move || worker.run())
                    .expect("failed to spawn worker thread");
            }
        });

        self.is_running.store(false, Ordering::Relaxed);
    }

    /// Request every worker to stop. Returns immediately; workers exit
    /// between loop iterations.
    pub fn stop(&self) {
        for worker in self.workers.iter() {
            worker.stop();
        }
    }

    /// Produce one root task per worker and schedule it there. This is how
    /// work enters a quiescent runtime; it must not be called while the
    /// runtime is running.
    pub fn dispatch<T, F>(&self, mut factory: F)
    where
        T: 'static,
        F: FnMut() -> Task<T>,
    {
        debug_assert!(!self.is_running(), "dispatch() on a running runtime");
        for worker in self.workers.iter() {
            worker.schedule(factory());
        }
    }
}
