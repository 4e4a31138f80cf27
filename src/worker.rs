//! Fixed-size pool of background threads fed by a bounded queue.

use std::fmt;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{GalleryError, GalleryResult};

/// How often idle workers re-check the cancel flag.
const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    /// Created; jobs queue up but nothing runs them yet.
    Idle,
    Running,
    Stopping,
    Stopped,
}

#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct WorkerStats {
    pub status: PoolStatus,
    pub threads: usize,
    pub queue_len: usize,
    pub in_flight: usize,
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// A job the pool refused, handed back to the caller.
pub enum SubmitError<J> {
    /// The queue is at capacity.
    Full(J),
    /// The pool is shutting down or stopped.
    Closed(J),
}

impl<J> SubmitError<J> {
    pub fn into_inner(self) -> J {
        match self {
            SubmitError::Full(job) | SubmitError::Closed(job) => job,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            SubmitError::Full(_) => "queue full",
            SubmitError::Closed(_) => "pool closed",
        }
    }
}

impl<J> fmt::Debug for SubmitError<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.reason())
    }
}

struct Shared {
    status: Mutex<PoolStatus>,
    cancel: AtomicBool,
    outstanding: Mutex<usize>,
    idle: Condvar,
    in_flight: AtomicUsize,
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn finish(&self, jobs: usize) {
        let mut outstanding = self.outstanding.lock();
        *outstanding = outstanding.saturating_sub(jobs);
        if *outstanding == 0 {
            self.idle.notify_all();
        }
    }
}

/// Long-lived worker threads consuming jobs of type `J`.
///
/// The pool has an explicit lifecycle: jobs may be submitted as soon as it is
/// created, [`WorkerPool::start`] spawns the threads, and
/// [`WorkerPool::shutdown`] stops intake, optionally drains, and hands back
/// whatever was still queued.
pub struct WorkerPool<J: Send + 'static> {
    name: &'static str,
    threads: usize,
    sender: Mutex<Option<Sender<J>>>,
    receiver: Receiver<J>,
    handles: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
}

impl<J: Send + 'static> WorkerPool<J> {
    pub fn new(name: &'static str, threads: usize, queue_size: usize) -> Self {
        let (sender, receiver) = channel::bounded(queue_size.max(1));
        Self {
            name,
            threads: threads.max(1),
            sender: Mutex::new(Some(sender)),
            receiver,
            handles: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                status: Mutex::new(PoolStatus::Idle),
                cancel: AtomicBool::new(false),
                outstanding: Mutex::new(0),
                idle: Condvar::new(),
                in_flight: AtomicUsize::new(0),
                submitted: AtomicU64::new(0),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn the worker threads. `handler` returns `true` on success; a
    /// panicking handler counts as a failure and the worker keeps going.
    pub fn start<F>(&self, handler: F) -> GalleryResult<()>
    where
        F: Fn(J) -> bool + Send + Sync + 'static,
    {
        let mut status = self.shared.status.lock();
        match *status {
            PoolStatus::Idle => {}
            PoolStatus::Running => {
                warn!(pool = self.name, "worker pool already running");
                return Ok(());
            }
            PoolStatus::Stopping | PoolStatus::Stopped => {
                return Err(GalleryError::WorkerUnavailable {
                    reason: "worker pool has been shut down",
                });
            }
        }
        *status = PoolStatus::Running;

        let handler = Arc::new(handler);
        let mut handles = self.handles.lock();
        for index in 0..self.threads {
            let worker_name = format!("{}-{}", self.name, index + 1);
            let receiver = self.receiver.clone();
            let shared = Arc::clone(&self.shared);
            let handler = Arc::clone(&handler);

            let spawned = thread::Builder::new()
                .name(worker_name.clone())
                .spawn(move || worker_loop(&worker_name, &receiver, &shared, handler.as_ref()));
            match spawned {
                Ok(handle) => handles.push(handle),
                Err(err) => {
                    error!(pool = self.name, error = %err, "failed to spawn worker thread");
                    return Err(GalleryError::WorkerUnavailable {
                        reason: "failed to spawn worker thread",
                    });
                }
            }
        }

        info!(pool = self.name, threads = self.threads, "worker pool started");
        Ok(())
    }

    /// Queue a job without blocking.
    pub fn submit(&self, job: J) -> Result<(), SubmitError<J>> {
        let sender = self.sender.lock();
        let Some(sender) = sender.as_ref() else {
            return Err(SubmitError::Closed(job));
        };

        // Count before sending so wait_idle never misses a job.
        *self.shared.outstanding.lock() += 1;
        match sender.try_send(job) {
            Ok(()) => {
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                self.shared.finish(1);
                Err(SubmitError::Full(job))
            }
            Err(TrySendError::Disconnected(job)) => {
                self.shared.finish(1);
                Err(SubmitError::Closed(job))
            }
        }
    }

    pub fn queue_len(&self) -> usize {
        self.receiver.len()
    }

    pub fn status(&self) -> PoolStatus {
        *self.shared.status.lock()
    }

    /// Block until every submitted job has finished or been dropped.
    /// Returns `false` if `timeout` elapsed first.
    pub fn wait_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut outstanding = self.shared.outstanding.lock();
        while *outstanding > 0 {
            if self.shared.idle.wait_until(&mut outstanding, deadline).timed_out() {
                return *outstanding == 0;
            }
        }
        true
    }

    /// Stop accepting jobs and join the workers.
    ///
    /// With `drain`, queued jobs get up to `drain_window` to finish. Jobs
    /// still queued afterwards are never started and are returned. In-flight
    /// jobs always run to completion.
    pub fn shutdown(&self, drain: bool, drain_window: Duration) -> Vec<J> {
        let was_running = {
            let mut status = self.shared.status.lock();
            match *status {
                PoolStatus::Stopping | PoolStatus::Stopped => return Vec::new(),
                PoolStatus::Idle => {
                    *status = PoolStatus::Stopping;
                    false
                }
                PoolStatus::Running => {
                    *status = PoolStatus::Stopping;
                    true
                }
            }
        };

        info!(pool = self.name, drain, "stopping worker pool");
        self.sender.lock().take();

        if drain && was_running && !self.wait_idle(drain_window) {
            warn!(
                pool = self.name,
                window_ms = drain_window.as_millis() as u64,
                "drain window elapsed; remaining queued jobs will be dropped"
            );
        }

        self.shared.cancel.store(true, Ordering::SeqCst);
        let handles = mem::take(&mut *self.handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                error!(pool = self.name, "worker thread terminated abnormally");
            }
        }

        let dropped: Vec<J> = self.receiver.try_iter().collect();
        if !dropped.is_empty() {
            self.shared
                .dropped
                .fetch_add(dropped.len() as u64, Ordering::Relaxed);
            self.shared.finish(dropped.len());
            warn!(pool = self.name, dropped = dropped.len(), "dropped queued jobs");
        }

        *self.shared.status.lock() = PoolStatus::Stopped;
        info!(pool = self.name, "worker pool stopped");
        dropped
    }

    pub fn stats(&self) -> WorkerStats {
        WorkerStats {
            status: self.status(),
            threads: self.threads,
            queue_len: self.queue_len(),
            in_flight: self.shared.in_flight.load(Ordering::Relaxed),
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            completed: self.shared.completed.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
            dropped: self.shared.dropped.load(Ordering::Relaxed),
        }
    }
}

impl<J: Send + 'static> Drop for WorkerPool<J> {
    fn drop(&mut self) {
        self.shutdown(false, Duration::ZERO);
    }
}

fn worker_loop<J, F>(name: &str, receiver: &Receiver<J>, shared: &Shared, handler: &F)
where
    F: Fn(J) -> bool,
{
    debug!(worker = name, "worker thread started");

    while !shared.cancel.load(Ordering::SeqCst) {
        let job = match receiver.recv_timeout(POLL_INTERVAL) {
            Ok(job) => job,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        shared.in_flight.fetch_add(1, Ordering::SeqCst);
        match panic::catch_unwind(AssertUnwindSafe(|| handler(job))) {
            Ok(true) => {
                shared.completed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(false) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {
                error!(worker = name, "job panicked; worker continues");
                shared.failed.fetch_add(1, Ordering::Relaxed);
            }
        }
        shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        shared.finish(1);
    }

    debug!(worker = name, "worker thread stopped");
}
