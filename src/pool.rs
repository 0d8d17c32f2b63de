//! Worker Pool
//!
//! Background work (eager refreshes, backing-map drains, sweep fan-out) runs on
//! a small pool of named threads fed by a bounded crossbeam channel. When the
//! queue is full the submitting thread runs the job itself, which throttles
//! producers instead of growing the queue without bound.
//!
//! A job that panics is logged and discarded; the worker keeps serving the
//! queue. Workers exit once every sender has been dropped and the queue is
//! empty.

use crossbeam_channel::{Receiver, Sender, TrySendError};
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use tracing::{error, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Fixed-size thread pool with caller-runs overflow.
pub(crate) struct WorkerPool {
    sender: Sender<Job>,
    workers: usize,
}

impl WorkerPool {
    /// Spawns `workers` threads named `{name}-{index}` sharing a queue of
    /// `queue_capacity` jobs.
    pub(crate) fn new(name: &str, workers: usize, queue_capacity: usize) -> Self {
        let (sender, receiver) = crossbeam_channel::bounded::<Job>(queue_capacity.max(1));

        let mut spawned = 0;
        for index in 0..workers.max(1) {
            let receiver = receiver.clone();
            let result = thread::Builder::new()
                .name(format!("{name}-{index}"))
                .spawn(move || worker_loop(&receiver));
            match result {
                Ok(_) => spawned += 1,
                Err(e) => warn!(pool = name, index, error = %e, "failed to spawn worker"),
            }
        }

        Self {
            sender,
            workers: spawned,
        }
    }

    /// Number of running workers.
    pub(crate) fn workers(&self) -> usize {
        self.workers
    }

    /// Queues `job`, or runs it on the calling thread when the queue is full
    /// or no worker could be started.
    pub(crate) fn execute<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.workers == 0 {
            run_guarded(Box::new(job));
            return;
        }
        match self.sender.try_send(Box::new(job)) {
            Ok(()) => {}
            Err(TrySendError::Full(job) | TrySendError::Disconnected(job)) => run_guarded(job),
        }
    }
}

impl core::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("queued", &self.sender.len())
            .finish()
    }
}

fn worker_loop(receiver: &Receiver<Job>) {
    for job in receiver.iter() {
        run_guarded(job);
    }
}

fn run_guarded(job: Job) {
    if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
        let message = payload
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("non-string panic payload");
        error!(panic = message, "background job panicked");
    }
}
