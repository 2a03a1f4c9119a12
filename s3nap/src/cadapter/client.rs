//! High-level client API for the object store
//!
//! `ObjectBackend` is the seam every store adapter implements; `ObjectClient`
//! is the cheap, cloneable handle the pipelines and transfer tasks share.

use std::io;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use tracing::debug;

use crate::chunk::hash::ContentHash;
use crate::error::{BackendError, Result, S3napError};

/// Body of a fetched object, yielded piece by piece.
pub type ByteChunks = Pin<Box<dyn Stream<Item = io::Result<Bytes>> + Send>>;

/// One entry of a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListPage {
    pub objects: Vec<ObjectRecord>,
    /// Continuation token; `None` when the listing is exhausted.
    pub next_token: Option<String>,
}

/// Metadata sent with every chunk so the store can check integrity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PutMeta {
    pub size: u64,
    pub content_hash: ContentHash,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PutReceipt {
    pub etag: Option<String>,
}

pub struct ObjectBody {
    pub stream: ByteChunks,
    pub size: Option<u64>,
    pub etag: Option<String>,
}

impl ObjectBody {
    /// Body backed by a single in-memory buffer.
    pub fn from_bytes(data: Bytes, etag: Option<String>) -> Self {
        let size = Some(data.len() as u64);
        Self {
            stream: Box::pin(futures::stream::iter([Ok(data)])),
            size,
            etag,
        }
    }
}

#[async_trait]
pub trait ObjectBackend: Send + Sync {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        meta: PutMeta,
    ) -> std::result::Result<PutReceipt, BackendError>;

    /// `Ok(None)` when the key does not exist.
    async fn get_object(&self, key: &str) -> std::result::Result<Option<ObjectBody>, BackendError>;

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> std::result::Result<ListPage, BackendError>;

    /// Delete every key in one batch and return how many were removed.
    async fn delete_objects(&self, keys: &[String]) -> std::result::Result<usize, BackendError>;
}

pub struct ObjectClient<B: ObjectBackend> {
    backend: Arc<B>,
}

impl<B: ObjectBackend> Clone for ObjectClient<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: ObjectBackend> ObjectClient<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        meta: PutMeta,
    ) -> std::result::Result<PutReceipt, BackendError> {
        debug!(key, size = meta.size, md5 = %meta.content_hash, "put object");
        self.backend.put_object(key, data, meta).await
    }

    pub async fn get_object(
        &self,
        key: &str,
    ) -> std::result::Result<Option<ObjectBody>, BackendError> {
        debug!(key, "get object");
        self.backend.get_object(key).await
    }

    pub async fn list_page(&self, prefix: &str, continuation: Option<&str>) -> Result<ListPage> {
        self.backend
            .list_page(prefix, continuation)
            .await
            .map_err(|e| S3napError::store("list", e))
    }

    /// Drain every page of the listing under `prefix`, in store order.
    pub async fn list_all(&self, prefix: &str) -> Result<Vec<ObjectRecord>> {
        let mut records = Vec::new();
        let mut token: Option<String> = None;
        let mut pages = 0usize;
        loop {
            let page = self.list_page(prefix, token.as_deref()).await?;
            pages += 1;
            records.extend(page.objects);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        debug!(prefix, pages, objects = records.len(), "listing drained");
        Ok(records)
    }

    pub async fn delete_objects(&self, keys: &[String]) -> Result<usize> {
        debug!(count = keys.len(), "delete objects");
        self.backend
            .delete_objects(keys)
            .await
            .map_err(|e| S3napError::store("delete", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::memory::MemoryBackend;

    #[tokio::test]
    async fn test_list_all_drains_pages() {
        let client = ObjectClient::new(MemoryBackend::with_page_size(2));
        for i in 0..5 {
            let data = Bytes::from(vec![i as u8; 3]);
            let meta = PutMeta {
                size: 3,
                content_hash: ContentHash::compute(&data),
            };
            client
                .put_object(&format!("f:{i:06}"), data, meta)
                .await
                .unwrap();
        }
        client
            .put_object(
                "other:000000",
                Bytes::from_static(b"x"),
                PutMeta {
                    size: 1,
                    content_hash: ContentHash::compute(b"x"),
                },
            )
            .await
            .unwrap();

        let all = client.list_all("").await.unwrap();
        assert_eq!(all.len(), 6);
        let only_f = client.list_all("f:").await.unwrap();
        assert_eq!(only_f.len(), 5);
        assert!(only_f.iter().all(|r| r.key.starts_with("f:")));
    }
}
