//! Bounded worker pool for transfer tasks.
//!
//! The pool is an explicit value handed to whoever submits transfers, so tests
//! can run it on a current-thread runtime or with a single worker.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::trace;

use super::{Outcome, ProgressHandle, Shared, Transfer, TransferKind, TransferState};
use crate::error::BackendError;

pub const DEFAULT_WORKERS: usize = 4;

#[derive(Clone)]
pub struct TransferPool {
    runtime: Handle,
    permits: Arc<Semaphore>,
    workers: usize,
    next_id: Arc<AtomicU64>,
}

impl TransferPool {
    pub fn new(runtime: Handle, workers: usize) -> Self {
        let workers = workers.max(1);
        Self {
            runtime,
            permits: Arc::new(Semaphore::new(workers)),
            workers,
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Pool on the runtime of the caller.
    ///
    /// # Panics
    ///
    /// Panics when called outside of a tokio runtime.
    pub fn current(workers: usize) -> Self {
        Self::new(Handle::current(), workers)
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start `op` as a new transfer. It stays `Pending` until a worker slot is
    /// free, then runs `InProgress` until it finishes or is canceled.
    pub fn submit<T, F, Fut>(
        &self,
        kind: TransferKind,
        key: String,
        index: u64,
        total_bytes: Option<u64>,
        op: F,
    ) -> Transfer<T>
    where
        T: Send + 'static,
        F: FnOnce(ProgressHandle) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, BackendError>> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(Shared::new(total_bytes));
        let progress = ProgressHandle {
            shared: Arc::clone(&shared),
        };
        let permits = Arc::clone(&self.permits);
        let task_shared = Arc::clone(&shared);
        let task_key = key.clone();

        let handle = self.runtime.spawn(async move {
            let shared = task_shared;
            let _permit = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => return Outcome::Canceled,
                permit = permits.acquire_owned() => match permit {
                    Ok(p) => p,
                    Err(e) => {
                        shared.transition(TransferState::Failed);
                        return Outcome::Failed(Box::new(e));
                    }
                },
            };
            if !shared.transition(TransferState::InProgress) {
                return Outcome::Canceled;
            }
            trace!(id, %kind, key = %task_key, "transfer started");

            let result = tokio::select! {
                biased;
                _ = shared.cancel.cancelled() => None,
                r = op(progress) => Some(r),
            };
            let outcome = match result {
                None => Outcome::Canceled,
                Some(Ok(value)) => {
                    if shared.transition(TransferState::Completed) {
                        Outcome::Completed(value)
                    } else {
                        Outcome::Canceled
                    }
                }
                Some(Err(e)) => {
                    if shared.transition(TransferState::Failed) {
                        Outcome::Failed(e)
                    } else {
                        Outcome::Canceled
                    }
                }
            };
            trace!(id, %kind, key = %task_key, state = ?shared.state(), "transfer finished");
            outcome
        });

        Transfer {
            id,
            kind,
            key,
            index,
            started_at: Instant::now(),
            shared,
            handle,
        }
    }
}
