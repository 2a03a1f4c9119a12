//! Chunked backup operations on top of an object store.
//!
//! [`ChunkedStore`] bundles the object client, the injected transfer pool and
//! the pipeline options. Each operation lives in its own submodule:
//! - `upload`: slice a stream into chunks and put them in index order
//! - `download`: fetch, verify and concatenate the chunks of one logical file
//! - `list`: per-file inventory of a bucket
//! - `delete`: remove every object under a prefix

use std::collections::VecDeque;
use std::time::Duration;

use crate::cadapter::client::{ObjectBackend, ObjectClient};
use crate::transfer::{Transfer, TransferPool};

pub mod delete;
pub mod download;
pub mod list;
pub mod upload;

pub use download::DownloadSummary;
pub use upload::ChunkReceipt;

/// 25 MB, the historical default chunk size.
pub const DEFAULT_CHUNK_SIZE: usize = 25_000_000;

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    /// Transfers outstanding at once. Chunks are still applied strictly in
    /// index order; 1 means fully serial.
    pub max_in_flight: usize,
    /// How often progress and throughput are logged while waiting.
    pub progress_interval: Duration,
    /// After an upload, delete chunks of the same name left over from a
    /// previous, longer upload.
    pub prune_stale: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            max_in_flight: 1,
            progress_interval: Duration::from_millis(500),
            prune_stale: true,
        }
    }
}

pub struct ChunkedStore<B: ObjectBackend> {
    client: ObjectClient<B>,
    pool: TransferPool,
    options: PipelineOptions,
}

impl<B: ObjectBackend + 'static> ChunkedStore<B> {
    pub fn new(client: ObjectClient<B>, pool: TransferPool) -> Self {
        Self {
            client,
            pool,
            options: PipelineOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PipelineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn client(&self) -> &ObjectClient<B> {
        &self.client
    }
}

/// FIFO of outstanding transfers, consumed strictly from the front so
/// results come back in submission order. Dropping the window cancels
/// whatever is still outstanding.
pub(crate) struct OrderedWindow<T> {
    limit: usize,
    queue: VecDeque<Transfer<T>>,
}

impl<T> OrderedWindow<T> {
    pub(crate) fn new(limit: usize) -> Self {
        Self {
            limit: limit.max(1),
            queue: VecDeque::new(),
        }
    }

    pub(crate) fn is_full(&self) -> bool {
        self.queue.len() >= self.limit
    }

    pub(crate) fn push(&mut self, transfer: Transfer<T>) {
        self.queue.push_back(transfer);
    }

    pub(crate) fn pop_front(&mut self) -> Option<Transfer<T>> {
        self.queue.pop_front()
    }
}

impl<T> Drop for OrderedWindow<T> {
    fn drop(&mut self) {
        for transfer in self.queue.drain(..) {
            transfer.cancel();
        }
    }
}
