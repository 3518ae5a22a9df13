//! Background work with main-thread continuations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes background jobs.
pub trait AsyncSystem: Send + Sync {
    fn spawn(&self, job: Job);
}

/// Runs jobs on a rayon pool, or the global pool when none is given.
#[derive(Default)]
pub struct RayonAsyncSystem {
    pool: Option<Arc<rayon::ThreadPool>>,
}

impl RayonAsyncSystem {
    pub fn new(pool: Option<Arc<rayon::ThreadPool>>) -> Self {
        Self { pool }
    }

    pub fn with_threads(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("tile-loader-{i}"))
            .build()?;
        Ok(Self::new(Some(Arc::new(pool))))
    }
}

impl AsyncSystem for RayonAsyncSystem {
    fn spawn(&self, job: Job) {
        match &self.pool {
            Some(pool) => pool.spawn(job),
            None => rayon::spawn(job),
        }
    }
}

/// Runs every job immediately on the calling thread.
#[derive(Debug, Default)]
pub struct InlineAsyncSystem;

impl AsyncSystem for InlineAsyncSystem {
    fn spawn(&self, job: Job) {
        job();
    }
}

/// Queues jobs until [`DeferredAsyncSystem::run_pending`] is called, so
/// tests control exactly when background work completes.
pub struct DeferredAsyncSystem {
    sender: Sender<Job>,
    receiver: Receiver<Job>,
}

impl Default for DeferredAsyncSystem {
    fn default() -> Self {
        let (sender, receiver) = channel::unbounded();
        Self { sender, receiver }
    }
}

impl DeferredAsyncSystem {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs every queued job, including ones queued while running. Returns
    /// how many ran.
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.receiver.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    pub fn pending_count(&self) -> usize {
        self.receiver.len()
    }
}

impl AsyncSystem for DeferredAsyncSystem {
    fn spawn(&self, job: Job) {
        // The receiver lives as long as `self`, so sending cannot fail.
        let _ = self.sender.send(job);
    }
}

/// Shared flag marking work whose result is no longer wanted.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Outcome of polling a [`Task`].
#[derive(Debug, PartialEq, Eq)]
pub enum TaskPoll<T> {
    Pending,
    Ready(T),
    /// The token was cancelled or the job died; any result is dropped.
    Cancelled,
}

/// Handle to a background job producing a `T`.
///
/// Already-dispatched work is never interrupted; cancellation only
/// guarantees the result is discarded instead of handed to the main thread.
#[derive(Debug)]
pub struct Task<T> {
    receiver: Receiver<T>,
    token: CancellationToken,
}

impl<T: Send + 'static> Task<T> {
    pub fn spawn(
        system: &dyn AsyncSystem,
        token: CancellationToken,
        f: impl FnOnce() -> T + Send + 'static,
    ) -> Self {
        let (sender, receiver) = channel::bounded(1);
        system.spawn(Box::new(move || {
            let _ = sender.send(f());
        }));
        Self { receiver, token }
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn poll(&self) -> TaskPoll<T> {
        if self.token.is_cancelled() {
            return TaskPoll::Cancelled;
        }
        match self.receiver.try_recv() {
            Ok(value) => TaskPoll::Ready(value),
            Err(TryRecvError::Empty) => TaskPoll::Pending,
            Err(TryRecvError::Disconnected) => TaskPoll::Cancelled,
        }
    }
}
