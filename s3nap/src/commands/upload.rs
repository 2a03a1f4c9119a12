//! Upload pipeline: stream -> fixed-size chunks -> one put per chunk.
//!
//! A chunk is fully buffered before it is sent because its length and MD5
//! travel with the request.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tracing::{info, warn};

use super::{ChunkedStore, OrderedWindow};
use crate::cadapter::client::{ObjectBackend, PutMeta};
use crate::chunk::hash::ContentHash;
use crate::chunk::key::{ChunkKey, chunk_prefix, encode, validate_name};
use crate::error::{BackendError, Result, S3napError};
use crate::progress::Throughput;
use crate::transfer::{Transfer, TransferKind};

/// What the store acknowledged for one chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub key: String,
    pub index: u64,
    pub size: u64,
    pub content_hash: ContentHash,
    pub etag: Option<String>,
}

impl<B: ObjectBackend + 'static> ChunkedStore<B> {
    /// Split `source` into chunks of `chunk_size` bytes and store them as
    /// `name:000000`, `name:000001`, ... Returns one receipt per chunk, in
    /// index order. An empty source stores nothing.
    pub async fn upload<R>(
        &self,
        source: R,
        name: &str,
        chunk_size: usize,
    ) -> Result<Vec<ChunkReceipt>>
    where
        R: AsyncRead + Unpin,
    {
        validate_name(name)?;
        if chunk_size == 0 {
            return Err(S3napError::InvalidChunkSize(chunk_size));
        }
        info!(
            name,
            chunk_size,
            workers = self.pool.workers(),
            window = self.options.max_in_flight,
            "uploading"
        );
        let throughput = Throughput::start();
        let mut source = source;
        let mut window = OrderedWindow::new(self.options.max_in_flight);
        let mut receipts = Vec::new();
        let mut sent = 0u64;
        let mut index = 0u64;

        loop {
            let buf = read_chunk(&mut source, chunk_size).await?;
            if buf.is_empty() {
                break;
            }
            let at_eof = buf.len() < chunk_size;
            window.push(self.submit_put(name, index, buf)?);
            index += 1;

            while window.is_full() {
                let Some(transfer) = window.pop_front() else {
                    break;
                };
                let receipt = self.settle_put(transfer, sent, &throughput).await?;
                sent += receipt.size;
                receipts.push(receipt);
            }
            if at_eof {
                break;
            }
        }
        while let Some(transfer) = window.pop_front() {
            let receipt = self.settle_put(transfer, sent, &throughput).await?;
            sent += receipt.size;
            receipts.push(receipt);
        }

        if receipts.is_empty() {
            // An earlier upload of this name, if any, is left untouched.
            warn!(name, "source stream was empty, nothing uploaded");
        } else if self.options.prune_stale {
            self.prune_stale(name, receipts.len() as u64).await?;
        }

        let (mb, rate) = throughput.measure(sent);
        info!(
            "Uploaded {name}: {} chunks, {sent} bytes, {:.2} MB, {:.2} sec, {:.2} MB/s",
            receipts.len(),
            mb,
            throughput.elapsed().as_secs_f64(),
            rate
        );
        Ok(receipts)
    }

    fn submit_put(&self, name: &str, index: u64, buf: Vec<u8>) -> Result<Transfer<ChunkReceipt>> {
        let key = encode(name, index)?;
        let data = Bytes::from(buf);
        let meta = PutMeta {
            size: data.len() as u64,
            content_hash: ContentHash::compute(&data),
        };
        let client = self.client.clone();
        let task_key = key.clone();
        Ok(self.pool.submit(
            TransferKind::Upload,
            key,
            index,
            Some(meta.size),
            move |progress| async move {
                let receipt = client.put_object(&task_key, data, meta).await?;
                progress.add_bytes(meta.size);
                Ok::<_, BackendError>(ChunkReceipt {
                    key: task_key,
                    index,
                    size: meta.size,
                    content_hash: meta.content_hash,
                    etag: receipt.etag,
                })
            },
        ))
    }

    async fn settle_put(
        &self,
        transfer: Transfer<ChunkReceipt>,
        sent: u64,
        throughput: &Throughput,
    ) -> Result<ChunkReceipt> {
        let key = transfer.key().to_string();
        let index = transfer.chunk_index();
        let receipt = transfer
            .wait_with_progress(self.options.progress_interval, |p| {
                let (mb, rate) = throughput.measure(sent + p.bytes_transferred);
                info!(key = %key, index, state = ?p.state, "{mb:.2} MB, {rate:.2} MB/s");
            })
            .await?;
        info!(key = %receipt.key, size = receipt.size, md5 = %receipt.content_hash, "chunk stored");
        Ok(receipt)
    }

    /// Remove chunks of `name` that the upload just finished did not write:
    /// indices at or beyond `chunk_count`, and keys in a non-canonical form.
    async fn prune_stale(&self, name: &str, chunk_count: u64) -> Result<usize> {
        let prefix = chunk_prefix(name)?;
        let stale: Vec<String> = self
            .client
            .list_all(&prefix)
            .await?
            .into_iter()
            .filter_map(|record| {
                let key = ChunkKey::parse(&record.key).ok()?;
                let canonical = key.to_string() == record.key;
                (key.index() >= chunk_count || !canonical).then_some(record.key)
            })
            .collect();
        if stale.is_empty() {
            return Ok(0);
        }
        info!(name, count = stale.len(), "removing stale chunks left by a previous upload");
        self.client.delete_objects(&stale).await
    }
}

/// Read until `limit` bytes are buffered or the source is exhausted.
async fn read_chunk<R: AsyncRead + Unpin>(source: &mut R, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(limit.min(64 * 1024 * 1024));
    source.take(limit as u64).read_to_end(&mut buf).await?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ObjectClient;
    use crate::cadapter::memory::MemoryBackend;
    use crate::commands::PipelineOptions;
    use crate::transfer::TransferPool;
    use std::time::Duration;

    fn store() -> ChunkedStore<MemoryBackend> {
        ChunkedStore::new(ObjectClient::new(MemoryBackend::new()), TransferPool::current(2))
    }

    #[tokio::test]
    async fn test_thirty_bytes_in_chunks_of_ten() {
        let store = store();
        let data: Vec<u8> = (0..30u8).collect();
        let receipts = store.upload(&data[..], "db", 10).await.unwrap();
        let indices: Vec<u64> = receipts.iter().map(|r| r.index).collect();
        assert_eq!(indices, [0, 1, 2]);
        assert!(receipts.iter().all(|r| r.size == 10));
        assert_eq!(
            store.client().backend().keys(),
            ["db:000000", "db:000001", "db:000002"]
        );
        assert_eq!(
            store.client().backend().data("db:000001").unwrap(),
            Bytes::from_static(&[10, 11, 12, 13, 14, 15, 16, 17, 18, 19])
        );
    }

    #[tokio::test]
    async fn test_short_tail_chunk() {
        let store = store();
        let data = vec![7u8; 25];
        let receipts = store.upload(&data[..], "t", 10).await.unwrap();
        let sizes: Vec<u64> = receipts.iter().map(|r| r.size).collect();
        assert_eq!(sizes, [10, 10, 5]);
    }

    #[tokio::test]
    async fn test_empty_source_emits_no_chunk() {
        let store = store();
        let receipts = store.upload(&b""[..], "empty", 10).await.unwrap();
        assert!(receipts.is_empty());
        assert!(store.client().backend().keys().is_empty());
    }

    #[tokio::test]
    async fn test_rejects_bad_arguments() {
        let store = store();
        assert!(matches!(
            store.upload(&b"x"[..], "a:b", 10).await,
            Err(S3napError::InvalidName(_))
        ));
        assert!(matches!(
            store.upload(&b"x"[..], "a", 0).await,
            Err(S3napError::InvalidChunkSize(0))
        ));
    }

    #[tokio::test]
    async fn test_failed_put_aborts_upload() {
        let store = store();
        store.client().backend().fail_puts_to("f:000001");
        let data = vec![1u8; 40];
        let err = store.upload(&data[..], "f", 10).await.unwrap_err();
        match err {
            S3napError::TransferFailed { key, index, .. } => {
                assert_eq!(key, "f:000001");
                assert_eq!(index, 1);
            }
            other => panic!("unexpected {other:?}"),
        }
        // Serial mode: nothing after the failed chunk was attempted.
        assert_eq!(store.client().backend().keys(), ["f:000000"]);
    }

    #[tokio::test]
    async fn test_reupload_shorter_prunes_stale_chunks() {
        let store = store();
        store.upload(&[1u8; 50][..], "n", 10).await.unwrap();
        store.client().backend().insert_raw("n:3", Bytes::from_static(b"legacy"));
        store.upload(&[2u8; 20][..], "n", 10).await.unwrap();
        assert_eq!(store.client().backend().keys(), ["n:000000", "n:000001"]);
    }

    #[tokio::test]
    async fn test_empty_reupload_keeps_previous_chunks() {
        let store = store();
        let data: Vec<u8> = (0..30u8).collect();
        store.upload(&data[..], "db", 10).await.unwrap();

        let receipts = store.upload(&b""[..], "db", 10).await.unwrap();
        assert!(receipts.is_empty());
        assert_eq!(store.client().backend().keys().len(), 3);

        let mut out = Vec::new();
        store.download("db", &mut out).await.unwrap();
        assert_eq!(out, data);
    }

    #[tokio::test]
    async fn test_legacy_key_does_not_shadow_new_chunk() {
        let store = store().with_options(PipelineOptions {
            prune_stale: false,
            ..PipelineOptions::default()
        });
        store.client().backend().insert_raw("n:1", Bytes::from_static(b"OLD!"));
        store.upload(&b"new1new2"[..], "n", 4).await.unwrap();
        assert_eq!(
            store.client().backend().keys(),
            ["n:000000", "n:000001", "n:1"]
        );

        let mut out = Vec::new();
        store.download("n", &mut out).await.unwrap();
        assert_eq!(out, b"new1new2");
    }

    #[tokio::test]
    async fn test_failure_in_window_cancels_later_puts() {
        let backend = MemoryBackend::new();
        backend.set_latency(Duration::from_millis(100));
        backend.fail_puts_to("w:000001");
        let store = ChunkedStore::new(ObjectClient::new(backend), TransferPool::current(4))
            .with_options(PipelineOptions {
                max_in_flight: 4,
                ..PipelineOptions::default()
            });

        let err = store.upload(&[3u8; 32][..], "w", 4).await.unwrap_err();
        assert!(matches!(err, S3napError::TransferFailed { index: 1, .. }));

        // Chunk 4 was queued behind the failure and canceled; 5.. were never read.
        let keys = store.client().backend().keys();
        assert!(keys.contains(&"w:000000".to_string()));
        for index in [1, 4, 5, 6, 7] {
            assert!(!keys.contains(&format!("w:{index:06}")), "{keys:?}");
        }
        // The canceled put is not applied later either.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(!store.client().backend().keys().contains(&"w:000004".to_string()));
    }

    #[tokio::test]
    async fn test_prune_leaves_other_names_alone() {
        let store = store();
        store.upload(&[1u8; 30][..], "n2", 10).await.unwrap();
        store.upload(&[1u8; 10][..], "n", 10).await.unwrap();
        assert_eq!(store.client().backend().keys().len(), 4);
    }
}
