//! Transfer lifecycle tracking
//!
//! Every put or get runs as one [`Transfer`]:
//! `Pending -> InProgress -> {Completed, Failed, Canceled}`.
//!
//! State lives in a `tokio::sync::watch` channel. Each transition is a
//! compare-and-set performed under the channel lock, and terminal states are
//! never left, so a failure racing a cancel can never turn `Canceled` into
//! `Failed`. Waiters are woken by the channel instead of sleeping and polling.
//!
//! Submodules:
//! - `pool`: the bounded worker pool that runs transfer tasks

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, Result, S3napError};

pub mod pool;

pub use pool::TransferPool;

pub type TransferId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferKind {
    Upload,
    Download,
}

impl fmt::Display for TransferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransferKind::Upload => f.write_str("upload"),
            TransferKind::Download => f.write_str("download"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferState {
    Pending,
    InProgress,
    Completed,
    Failed,
    Canceled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TransferState::Completed | TransferState::Failed | TransferState::Canceled
        )
    }

    fn can_move_to(self, next: TransferState) -> bool {
        use TransferState::*;
        match (self, next) {
            (Pending, InProgress) => true,
            (Pending | InProgress, Completed | Failed | Canceled) => true,
            _ => false,
        }
    }
}

/// Snapshot returned by [`Transfer::progress`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    pub id: TransferId,
    pub kind: TransferKind,
    pub state: TransferState,
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    pub started_at: Instant,
}

const UNKNOWN_TOTAL: u64 = u64::MAX;

pub(crate) struct Shared {
    state: watch::Sender<TransferState>,
    bytes: AtomicU64,
    total: AtomicU64,
    cancel: CancellationToken,
}

impl Shared {
    fn new(total: Option<u64>) -> Self {
        let (state, _) = watch::channel(TransferState::Pending);
        Self {
            state,
            bytes: AtomicU64::new(0),
            total: AtomicU64::new(total.unwrap_or(UNKNOWN_TOTAL)),
            cancel: CancellationToken::new(),
        }
    }

    /// Move to `next` if the lifecycle allows it. Returns whether the state
    /// changed.
    pub(crate) fn transition(&self, next: TransferState) -> bool {
        self.state.send_if_modified(|current| {
            if current.can_move_to(next) {
                *current = next;
                true
            } else {
                false
            }
        })
    }

    fn state(&self) -> TransferState {
        *self.state.borrow()
    }
}

/// Handle given to the running operation to report progress.
#[derive(Clone)]
pub struct ProgressHandle {
    shared: Arc<Shared>,
}

impl ProgressHandle {
    pub fn add_bytes(&self, n: u64) {
        self.shared.bytes.fetch_add(n, Ordering::Relaxed);
    }

    pub fn set_total(&self, total: u64) {
        self.shared.total.store(total, Ordering::Relaxed);
    }

}

pub(crate) enum Outcome<T> {
    Completed(T),
    Failed(BackendError),
    Canceled,
}

pub struct Transfer<T> {
    id: TransferId,
    kind: TransferKind,
    key: String,
    index: u64,
    started_at: Instant,
    shared: Arc<Shared>,
    handle: JoinHandle<Outcome<T>>,
}

impl<T> Transfer<T> {
    pub fn id(&self) -> TransferId {
        self.id
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn chunk_index(&self) -> u64 {
        self.index
    }

    pub fn state(&self) -> TransferState {
        self.shared.state()
    }

    /// Never blocks.
    pub fn progress(&self) -> TransferProgress {
        let total = self.shared.total.load(Ordering::Relaxed);
        TransferProgress {
            id: self.id,
            kind: self.kind,
            state: self.shared.state(),
            bytes_transferred: self.shared.bytes.load(Ordering::Relaxed),
            total_bytes: (total != UNKNOWN_TOTAL).then_some(total),
            started_at: self.started_at,
        }
    }

    /// Cancel a transfer that has not reached a terminal state yet. Returns
    /// `false` if it had already finished.
    pub fn cancel(&self) -> bool {
        let changed = self.shared.transition(TransferState::Canceled);
        self.shared.cancel.cancel();
        changed
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<TransferState> {
        self.shared.state.subscribe()
    }

    /// Wait for a terminal state and return the operation's output.
    pub async fn wait(self) -> Result<T> {
        let mut rx = self.subscribe();
        // The sender lives in `shared`, which we hold, so this cannot fail.
        let _ = rx.wait_for(|s| s.is_terminal()).await;
        self.finish().await
    }

    /// Like [`wait`](Self::wait), calling `on_tick` every `period` until the
    /// transfer finishes.
    pub async fn wait_with_progress<F>(self, period: Duration, mut on_tick: F) -> Result<T>
    where
        F: FnMut(&TransferProgress),
    {
        let mut rx = self.subscribe();
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = rx.wait_for(|s| s.is_terminal()) => break,
                _ = ticker.tick() => on_tick(&self.progress()),
            }
        }
        self.finish().await
    }

    async fn finish(self) -> Result<T> {
        let outcome = match self.handle.await {
            Ok(outcome) => outcome,
            Err(join) => {
                self.shared.transition(TransferState::Failed);
                Outcome::Failed(Box::new(join))
            }
        };
        match outcome {
            Outcome::Completed(value) => Ok(value),
            Outcome::Failed(source) => Err(S3napError::TransferFailed {
                kind: self.kind,
                key: self.key,
                index: self.index,
                source,
            }),
            Outcome::Canceled => Err(S3napError::TransferCanceled {
                kind: self.kind,
                key: self.key,
            }),
        }
    }
}
