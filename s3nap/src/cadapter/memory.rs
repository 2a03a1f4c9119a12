//! In-memory object store used for local development and tests.
//!
//! Listings are returned in key order, split into pages of `page_size`
//! entries. A few knobs let tests simulate a misbehaving store.

use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};

use crate::cadapter::client::{
    ListPage, ObjectBackend, ObjectBody, ObjectRecord, PutMeta, PutReceipt,
};
use crate::chunk::hash::ContentHash;
use crate::error::BackendError;

const DEFAULT_PAGE_SIZE: usize = 1000;

#[derive(Clone)]
struct StoredObject {
    data: Bytes,
    etag: String,
    last_modified: DateTime<Utc>,
}

#[derive(Default)]
struct Faults {
    failing_puts: HashSet<String>,
    failing_gets: HashSet<String>,
    latency: Option<Duration>,
}

pub struct MemoryBackend {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    faults: Mutex<Faults>,
    page_size: usize,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_page_size(DEFAULT_PAGE_SIZE)
    }

    pub fn with_page_size(page_size: usize) -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            faults: Mutex::new(Faults::default()),
            page_size: page_size.max(1),
        }
    }

    /// Store an object without going through the chunk metadata path.
    pub fn insert_raw(&self, key: &str, data: impl Into<Bytes>) {
        let data = data.into();
        let etag = format!("\"{}\"", ContentHash::compute(&data).to_hex());
        self.lock_objects().insert(
            key.to_string(),
            StoredObject {
                data,
                etag,
                last_modified: Utc::now(),
            },
        );
    }

    /// Replace the stored bytes but keep the recorded etag, as silent
    /// corruption would.
    pub fn tamper(&self, key: &str, data: impl Into<Bytes>) -> bool {
        match self.lock_objects().get_mut(key) {
            Some(obj) => {
                obj.data = data.into();
                true
            }
            None => false,
        }
    }

    pub fn set_etag(&self, key: &str, etag: &str) -> bool {
        match self.lock_objects().get_mut(key) {
            Some(obj) => {
                obj.etag = etag.to_string();
                true
            }
            None => false,
        }
    }

    /// Every put to `key` fails from now on.
    pub fn fail_puts_to(&self, key: &str) {
        self.lock_faults().failing_puts.insert(key.to_string());
    }

    /// Every get of `key` fails from now on.
    pub fn fail_gets_to(&self, key: &str) {
        self.lock_faults().failing_gets.insert(key.to_string());
    }

    /// Delay every operation by `latency`.
    pub fn set_latency(&self, latency: Duration) {
        self.lock_faults().latency = Some(latency);
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock_objects().keys().cloned().collect()
    }

    pub fn data(&self, key: &str) -> Option<Bytes> {
        self.lock_objects().get(key).map(|o| o.data.clone())
    }

    fn lock_objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, StoredObject>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_faults(&self) -> std::sync::MutexGuard<'_, Faults> {
        self.faults.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn simulate_latency(&self) {
        let latency = self.lock_faults().latency;
        if let Some(d) = latency {
            tokio::time::sleep(d).await;
        }
    }
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        meta: PutMeta,
    ) -> Result<PutReceipt, BackendError> {
        self.simulate_latency().await;
        if self.lock_faults().failing_puts.contains(key) {
            return Err(format!("injected put failure for {key}").into());
        }
        if data.len() as u64 != meta.size {
            return Err(format!(
                "IncompleteBody: declared {} bytes, received {}",
                meta.size,
                data.len()
            )
            .into());
        }
        let actual = ContentHash::compute(&data);
        if actual != meta.content_hash {
            return Err(format!("BadDigest: Content-MD5 mismatch for {key}").into());
        }
        let etag = format!("\"{}\"", actual.to_hex());
        self.lock_objects().insert(
            key.to_string(),
            StoredObject {
                data,
                etag: etag.clone(),
                last_modified: Utc::now(),
            },
        );
        Ok(PutReceipt { etag: Some(etag) })
    }

    async fn get_object(&self, key: &str) -> Result<Option<ObjectBody>, BackendError> {
        self.simulate_latency().await;
        if self.lock_faults().failing_gets.contains(key) {
            return Err(format!("injected get failure for {key}").into());
        }
        let obj = self.lock_objects().get(key).cloned();
        Ok(obj.map(|o| ObjectBody::from_bytes(o.data, Some(o.etag))))
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, BackendError> {
        self.simulate_latency().await;
        let objects = self.lock_objects();
        let mut matching = objects
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| continuation.is_none_or(|token| k.as_str() > token));

        let mut page = ListPage::default();
        for (key, obj) in matching.by_ref().take(self.page_size) {
            page.objects.push(ObjectRecord {
                key: key.clone(),
                size: obj.data.len() as u64,
                last_modified: obj.last_modified,
                etag: Some(obj.etag.clone()),
            });
        }
        if matching.next().is_some() {
            page.next_token = page.objects.last().map(|r| r.key.clone());
        }
        Ok(page)
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<usize, BackendError> {
        self.simulate_latency().await;
        let mut objects = self.lock_objects();
        Ok(keys.iter().filter(|k| objects.remove(k.as_str()).is_some()).count())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta_for(data: &[u8]) -> PutMeta {
        PutMeta {
            size: data.len() as u64,
            content_hash: ContentHash::compute(data),
        }
    }

    #[tokio::test]
    async fn test_put_rejects_bad_digest() {
        let backend = MemoryBackend::new();
        let meta = meta_for(b"abc");
        let err = backend
            .put_object("k:000000", Bytes::from_static(b"abd"), meta)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("BadDigest"));
        assert!(backend.keys().is_empty());
    }

    #[tokio::test]
    async fn test_pages_are_key_ordered() {
        let backend = MemoryBackend::with_page_size(2);
        for key in ["c", "a", "b"] {
            backend.insert_raw(key, Bytes::from_static(b"1"));
        }
        let first = backend.list_page("", None).await.unwrap();
        let keys: Vec<_> = first.objects.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, ["a", "b"]);
        assert_eq!(first.next_token.as_deref(), Some("b"));

        let second = backend.list_page("", Some("b")).await.unwrap();
        assert_eq!(second.objects.len(), 1);
        assert_eq!(second.objects[0].key, "c");
        assert!(second.next_token.is_none());
    }

    #[tokio::test]
    async fn test_delete_counts_existing_only() {
        let backend = MemoryBackend::new();
        backend.insert_raw("a", Bytes::from_static(b"1"));
        let removed = backend
            .delete_objects(&["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
    }
}
