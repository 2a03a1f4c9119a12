//! Local directory backend, used as a mock object store (implements ObjectBackend).
//!
//! Each key is one file under `root`; `/` inside keys becomes a directory level.
//! The MD5 accepted at put time is kept under [`CHECKSUM_DIR`] and reported as
//! the etag, so bytes changed on disk afterwards fail verification like a
//! corrupted object would.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use tokio::{fs, io::AsyncWriteExt};
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

use crate::cadapter::client::{
    ListPage, ObjectBackend, ObjectBody, ObjectRecord, PutMeta, PutReceipt,
};
use crate::chunk::hash::ContentHash;
use crate::error::BackendError;

/// Directory under the root holding one `<key>` file with the hex MD5 per object.
pub const CHECKSUM_DIR: &str = ".s3nap-md5";

pub struct LocalFsBackend {
    root: PathBuf,
    page_size: usize,
}

impl LocalFsBackend {
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            page_size: 1000,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Keys must stay inside the root and out of the checksum directory.
    fn path_for(&self, key: &str) -> Result<PathBuf, BackendError> {
        let rel = Path::new(key);
        let mut components = rel.components();
        let inside = !key.is_empty()
            && rel.components().all(|c| matches!(c, Component::Normal(_)))
            && components
                .next()
                .is_some_and(|first| first.as_os_str() != CHECKSUM_DIR);
        if !inside {
            return Err(format!("InvalidKey: {key} does not map inside the store root").into());
        }
        Ok(self.root.join(rel))
    }

    fn checksum_path(&self, key: &str) -> PathBuf {
        self.root.join(CHECKSUM_DIR).join(key)
    }

    async fn recorded_etag(&self, key: &str) -> io::Result<Option<String>> {
        match fs::read_to_string(self.checksum_path(key)).await {
            Ok(hex) => Ok(Some(format!("\"{}\"", hex.trim()))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// All object keys under the root, sorted.
    fn scan(root: &Path) -> io::Result<Vec<(String, PathBuf)>> {
        let mut keys = Vec::new();
        if !root.exists() {
            return Ok(keys);
        }
        let walker = WalkDir::new(root)
            .min_depth(1)
            .follow_links(false)
            .into_iter()
            .filter_entry(|e| !(e.depth() == 1 && e.file_name() == CHECKSUM_DIR));
        for entry in walker {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(root)
                .map_err(io::Error::other)?;
            let key = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            keys.push((key, entry.path().to_path_buf()));
        }
        keys.sort();
        Ok(keys)
    }
}

async fn write_file(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(dir) = path.parent() {
        fs::create_dir_all(dir).await?;
    }
    let mut f = fs::File::create(path).await?;
    f.write_all(data).await?;
    f.flush().await
}

#[async_trait]
impl ObjectBackend for LocalFsBackend {
    async fn put_object(
        &self,
        key: &str,
        data: Bytes,
        meta: PutMeta,
    ) -> Result<PutReceipt, BackendError> {
        let path = self.path_for(key)?;
        let actual = ContentHash::compute(&data);
        if data.len() as u64 != meta.size || actual != meta.content_hash {
            return Err(format!("BadDigest: content does not match metadata for {key}").into());
        }
        write_file(&path, &data).await?;
        write_file(&self.checksum_path(key), actual.to_hex().as_bytes()).await?;
        Ok(PutReceipt {
            etag: Some(format!("\"{}\"", actual.to_hex())),
        })
    }

    async fn get_object(&self, key: &str) -> Result<Option<ObjectBody>, BackendError> {
        let path = self.path_for(key)?;
        let file = match fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Box::new(e)),
        };
        let size = file.metadata().await?.len();
        let etag = self.recorded_etag(key).await?;
        Ok(Some(ObjectBody {
            stream: Box::pin(ReaderStream::new(file)),
            size: Some(size),
            etag,
        }))
    }

    async fn list_page(
        &self,
        prefix: &str,
        continuation: Option<&str>,
    ) -> Result<ListPage, BackendError> {
        let root = self.root.clone();
        let all = tokio::task::spawn_blocking(move || Self::scan(&root)).await??;

        let mut matching = all
            .into_iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .filter(|(k, _)| continuation.is_none_or(|token| k.as_str() > token))
            .peekable();

        let mut page = ListPage::default();
        while page.objects.len() < self.page_size {
            let Some((key, path)) = matching.next() else {
                break;
            };
            let meta = fs::metadata(&path).await?;
            let etag = self.recorded_etag(&key).await?;
            page.objects.push(ObjectRecord {
                key,
                size: meta.len(),
                last_modified: DateTime::<Utc>::from(meta.modified()?),
                etag,
            });
        }
        if matching.peek().is_some() {
            page.next_token = page.objects.last().map(|r| r.key.clone());
        }
        Ok(page)
    }

    async fn delete_objects(&self, keys: &[String]) -> Result<usize, BackendError> {
        let mut removed = 0;
        for key in keys {
            match fs::remove_file(self.path_for(key)?).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Box::new(e)),
            }
            match fs::remove_file(self.checksum_path(key)).await {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Box::new(e)),
            }
        }
        Ok(removed)
    }
}
