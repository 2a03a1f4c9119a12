//! Download pipeline: rebuild one logical file from its chunks.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures::TryStreamExt;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::{ChunkedStore, OrderedWindow};
use crate::cadapter::client::ObjectBackend;
use crate::chunk::aggregate::{ChunkAggregator, ChunkObject, aggregate_listing};
use crate::chunk::hash::{ContentHash, ContentHasher, is_multipart_etag};
use crate::chunk::key::chunk_prefix;
use crate::error::{BackendError, Result, S3napError};
use crate::progress::Throughput;
use crate::transfer::{Transfer, TransferKind};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSummary {
    pub name: String,
    pub bytes: u64,
    pub chunks: usize,
    pub elapsed: Duration,
}

struct FetchedChunk {
    index: u64,
    key: String,
    data: Bytes,
    digest: ContentHash,
    etag: Option<String>,
}

impl<B: ObjectBackend + 'static> ChunkedStore<B> {
    /// Write the chunks of `name` to `dest` in index order. Every chunk is
    /// verified before any of its bytes reach `dest`.
    pub async fn download<W>(&self, name: &str, dest: &mut W) -> Result<DownloadSummary>
    where
        W: AsyncWrite + Unpin,
    {
        let prefix = chunk_prefix(name)?;
        let mut found =
            aggregate_listing(&self.client, &prefix, ChunkAggregator::for_name(name)).await?;
        let file = found
            .take(name)
            .ok_or_else(|| S3napError::NotFound(name.to_string()))?;
        if let Some(&index) = file.missing_indices().first() {
            return Err(S3napError::MissingChunk {
                name: name.to_string(),
                index,
            });
        }

        let chunk_count = file.chunks.len();
        info!(
            name,
            chunks = chunk_count,
            bytes = file.total_size(),
            workers = self.pool.workers(),
            window = self.options.max_in_flight,
            "downloading"
        );
        let throughput = Throughput::start();
        let mut window = OrderedWindow::new(self.options.max_in_flight);
        let mut pending = file.chunks.into_iter();
        let mut written = 0u64;

        loop {
            while !window.is_full() {
                match pending.next() {
                    Some(chunk) => window.push(self.submit_get(chunk)),
                    None => break,
                }
            }
            let Some(transfer) = window.pop_front() else {
                break;
            };
            let key = transfer.key().to_string();
            let index = transfer.chunk_index();
            let fetched = transfer
                .wait_with_progress(self.options.progress_interval, |p| {
                    let (mb, rate) = throughput.measure(written + p.bytes_transferred);
                    info!(key = %key, index, "{mb:.2} MB, {rate:.2} MB/s");
                })
                .await?;
            verify(&fetched)?;
            dest.write_all(&fetched.data).await?;
            written += fetched.data.len() as u64;
        }
        dest.flush().await?;

        let elapsed = throughput.elapsed();
        let (_, rate) = throughput.measure(written);
        info!(
            "Downloaded {name}, {written} bytes, {:.2} sec, {rate:.2} MB/s",
            elapsed.as_secs_f64()
        );
        Ok(DownloadSummary {
            name: name.to_string(),
            bytes: written,
            chunks: chunk_count,
            elapsed,
        })
    }

    fn submit_get(&self, chunk: ChunkObject) -> Transfer<FetchedChunk> {
        let client = self.client.clone();
        let key = chunk.key.clone();
        self.pool.submit(
            TransferKind::Download,
            key,
            chunk.index,
            Some(chunk.size),
            move |progress| async move {
                let body = client
                    .get_object(&chunk.key)
                    .await?
                    .ok_or_else(|| format!("object {} vanished after listing", chunk.key))?;
                if let Some(size) = body.size {
                    progress.set_total(size);
                }
                let mut hasher = ContentHasher::new();
                let mut data = BytesMut::with_capacity(chunk.size as usize);
                let mut stream = body.stream;
                while let Some(piece) = stream.try_next().await? {
                    hasher.update(&piece);
                    progress.add_bytes(piece.len() as u64);
                    data.extend_from_slice(&piece);
                }
                Ok::<_, BackendError>(FetchedChunk {
                    index: chunk.index,
                    key: chunk.key,
                    data: data.freeze(),
                    digest: hasher.finish(),
                    etag: body.etag.or(chunk.etag),
                })
            },
        )
    }
}

fn verify(chunk: &FetchedChunk) -> Result<()> {
    let Some(etag) = chunk.etag.as_deref() else {
        warn!(key = %chunk.key, "store reported no checksum, integrity not verified");
        return Ok(());
    };
    if is_multipart_etag(etag) {
        warn!(
            key = %chunk.key,
            etag,
            "object was assembled from multiple parts, integrity not verified"
        );
        return Ok(());
    }
    match ContentHash::from_etag(etag) {
        Some(expected) if expected != chunk.digest => Err(S3napError::IntegrityMismatch {
            key: chunk.key.clone(),
            index: chunk.index,
            expected: expected.to_hex(),
            actual: chunk.digest.to_hex(),
        }),
        Some(_) => Ok(()),
        None => {
            warn!(key = %chunk.key, etag, "checksum is not an MD5, integrity not verified");
            Ok(())
        }
    }
}
