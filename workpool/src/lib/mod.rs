//! A fixed-size pool of OS threads draining one FIFO job queue.
//!
//! The pool knows nothing about what its jobs do. Jobs are queued without
//! bound, so [`WorkPool::dispatch`] never blocks on worker availability.
//! Shutdown is always orderly: [`WorkPool::destroy`] stops intake, waits
//! for the queue to run dry, wakes every worker and joins them all, so by
//! the time it returns every accepted job has run to completion.
//!
//! There is no error channel for job outcomes; a job that can fail must
//! report through whatever it captured.
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use thiserror::Error;

/// Upper bound on workers per pool.
pub const MAX_THREADS_NUM: usize = 200;

/// Anything a worker can run. Closures qualify out of the box.
pub trait Task: Send + 'static {
    fn run(self);
}

impl<F> Task for F
where F: FnOnce() + Send + 'static {
    fn run(self) {
        self()
    }
}

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("pool size must be within 1..={max}, got {0}", max = MAX_THREADS_NUM)]
    BadSize(usize),
    #[error("failed to start worker #{index}: {source}")]
    Spawn {
        index:  usize,
        #[source]
        source: std::io::Error,
    },
}

/// Lifecycle of a pool. Transitions only go forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum PoolState {
    /// Accepting jobs, workers running.
    Open,
    /// No longer accepting; waiting for the queue to empty.
    Draining,
    /// Workers told to exit.
    Shutdown,
}

struct Queue<T> {
    jobs:   VecDeque<T>,
    state:  PoolState,
}

struct Shared<T> {
    queue:      Mutex<Queue<T>>,
    not_empty:  Condvar,
    empty:      Condvar,
}

impl<T> Shared<T> {
    // Jobs never run under the lock.
    fn lock(&self) -> MutexGuard<'_, Queue<T>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

pub struct WorkPool<T: Task> {
    shared:     Arc<Shared<T>>,
    workers:    Vec<JoinHandle<()>>,
}

impl<T: Task> WorkPool<T> {
    /// Starts `num_threads` workers. Either all of them come up or none
    /// is left running.
    pub fn new(num_threads: usize) -> Result<Self, PoolError> {
        if num_threads == 0 || num_threads > MAX_THREADS_NUM {
            return Err(PoolError::BadSize(num_threads));
        }
        let shared = Arc::new(Shared {
            queue:      Mutex::new(Queue { jobs: VecDeque::new(), state: PoolState::Open }),
            not_empty:  Condvar::new(),
            empty:      Condvar::new(),
        });
        let mut pool = Self {
            shared,
            workers: Vec::with_capacity(num_threads),
        };

        for index in 0..num_threads {
            let shared = pool.shared.clone();
            let spawned = thread::Builder::new()
                .name(format!("workpool-{index}"))
                .spawn(move || work(shared));
            match spawned {
                Ok(handle)  => { pool.workers.push(handle); },
                Err(source) => {
                    tracing::error!(index, "worker thread creation failed: {source}");
                    pool.shutdown();
                    return Err(PoolError::Spawn { index, source });
                }
            }
        }
        tracing::debug!(workers = num_threads, "pool started");

        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn state(&self) -> PoolState {
        self.shared.lock().state
    }

    /// Jobs queued but not yet picked up.
    pub fn pending(&self) -> usize {
        self.shared.lock().jobs.len()
    }

    /// Appends a job to the queue and returns right away. Once the pool
    /// stopped accepting work the job is dropped and `false` comes back.
    pub fn dispatch(&self, job: T) -> bool {
        let mut q = self.shared.lock();
        if q.state != PoolState::Open {
            drop(q);
            tracing::warn!("pool is no longer accepting jobs; job discarded");
            return false;
        }
        q.jobs.push_back(job);
        // One wake-up per queued job, not only on the empty edge.
        self.shared.not_empty.notify_one();

        true
    }

    /// Stops intake and blocks until every queued job has been picked up.
    pub fn drain(&self) {
        let mut q = self.shared.lock();
        if q.state == PoolState::Open {
            q.state = PoolState::Draining;
        }
        while !q.jobs.is_empty() {
            q = self.shared.empty.wait(q).unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Drains the queue, then stops and joins every worker. Jobs already
    /// running are waited for.
    pub fn destroy(mut self) {
        self.drain();
        self.shutdown();
    }

    fn shutdown(&mut self) {
        {
            let mut q = self.shared.lock();
            q.state = PoolState::Shutdown;
            self.shared.not_empty.notify_all();
        }
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                tracing::error!("worker exited abnormally");
            }
        }
    }
}

impl<T: Task> Drop for WorkPool<T> {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.drain();
            self.shutdown();
        }
    }
}

fn work<T: Task>(shared: Arc<Shared<T>>) {
    loop {
        let job = {
            let mut q = shared.lock();
            while q.jobs.is_empty() {
                if q.state == PoolState::Shutdown {
                    return;
                }
                q = shared.not_empty.wait(q).unwrap_or_else(PoisonError::into_inner);
            }
            let job = q.jobs.pop_front();
            if q.jobs.is_empty() && q.state != PoolState::Shutdown {
                shared.empty.notify_all();
            }
            job
        };

        if let Some(job) = job {
            if panic::catch_unwind(AssertUnwindSafe(|| job.run())).is_err() {
                tracing::error!(
                    worker = thread::current().name().unwrap_or("?"),
                    "job panicked"
                );
            }
        }
    }
}
