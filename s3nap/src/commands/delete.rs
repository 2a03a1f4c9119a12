//! Prefix deletion: list every key under a prefix, then remove them in one
//! batch.

use tracing::info;

use super::ChunkedStore;
use crate::cadapter::client::ObjectBackend;
use crate::error::Result;

impl<B: ObjectBackend + 'static> ChunkedStore<B> {
    /// Delete every object whose key starts with `prefix`, in one batch.
    /// Returns the number of objects removed.
    pub async fn delete_prefix(&self, prefix: &str) -> Result<usize> {
        info!(prefix, "deleting");
        let keys: Vec<String> = self
            .client
            .list_all(prefix)
            .await?
            .into_iter()
            .map(|record| record.key)
            .collect();
        if keys.is_empty() {
            info!(prefix, "nothing to delete");
            return Ok(0);
        }
        let removed = self.client.delete_objects(&keys).await?;
        info!(prefix, listed = keys.len(), removed, "deleted");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ObjectClient;
    use crate::cadapter::memory::MemoryBackend;
    use crate::transfer::TransferPool;

    #[tokio::test]
    async fn test_delete_prefix_spans_pages() {
        let store = ChunkedStore::new(
            ObjectClient::new(MemoryBackend::with_page_size(2)),
            TransferPool::current(1),
        );
        store.upload(&[1u8; 50][..], "old", 10).await.unwrap();
        store.upload(&[1u8; 10][..], "keep", 10).await.unwrap();

        assert_eq!(store.delete_prefix("old:").await.unwrap(), 5);
        assert_eq!(store.client().backend().keys(), ["keep:000000"]);
        assert_eq!(store.delete_prefix("old:").await.unwrap(), 0);
    }
}
