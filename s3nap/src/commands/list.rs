//! Inventory of the logical files found in a bucket.

use chrono::SecondsFormat;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use super::ChunkedStore;
use crate::cadapter::client::ObjectBackend;
use crate::chunk::aggregate::{ChunkAggregator, InventoryEntry, aggregate_listing};
use crate::error::Result;

impl<B: ObjectBackend + 'static> ChunkedStore<B> {
    /// Summaries of every logical file under `prefix`, ordered by name.
    pub async fn inventory(&self, prefix: &str) -> Result<Vec<InventoryEntry>> {
        let aggregation = aggregate_listing(&self.client, prefix, ChunkAggregator::new()).await?;
        if aggregation.skipped() > 0 {
            warn!(
                skipped = aggregation.skipped(),
                "some objects do not look like chunks and were left out"
            );
        }
        info!(prefix, files = aggregation.len(), "inventory built");
        Ok(aggregation.inventory())
    }
}

/// `bucket, name, chunk count, total bytes, last modified`, tab separated.
pub fn format_entry(bucket: &str, entry: &InventoryEntry) -> String {
    let last_modified = entry
        .last_modified
        .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
        .unwrap_or_else(|| "-".to_string());
    [
        bucket.to_string(),
        entry.name.clone(),
        entry.chunk_count.to_string(),
        entry.total_size.to_string(),
        last_modified,
    ]
    .join("\t")
}

pub async fn write_inventory<W>(bucket: &str, entries: &[InventoryEntry], out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    for entry in entries {
        let mut line = format_entry(bucket, entry);
        line.push('\n');
        out.write_all(line.as_bytes()).await?;
    }
    out.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cadapter::client::ObjectClient;
    use crate::cadapter::memory::MemoryBackend;
    use crate::transfer::TransferPool;
    use bytes::Bytes;
    use chrono::{TimeZone, Utc};

    #[test]
    fn test_format_entry() {
        let entry = InventoryEntry {
            name: "host/etc".into(),
            chunk_count: 3,
            total_size: 30,
            last_modified: Some(Utc.with_ymd_and_hms(2024, 4, 10, 4, 7, 50).unwrap()),
        };
        assert_eq!(
            format_entry("backup1", &entry),
            "backup1\thost/etc\t3\t30\t2024-04-10T04:07:50Z"
        );
    }

    #[tokio::test]
    async fn test_inventory_after_upload() {
        let store = ChunkedStore::new(
            ObjectClient::new(MemoryBackend::with_page_size(2)),
            TransferPool::current(2),
        );
        store.upload(&[0u8; 30][..], "db", 10).await.unwrap();
        store.upload(&[0u8; 5][..], "etc", 10).await.unwrap();
        store.client().backend().insert_raw("README", Bytes::from_static(b"hi"));

        let entries = store.inventory("").await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "db");
        assert_eq!(entries[0].chunk_count, 3);
        assert_eq!(entries[0].total_size, 30);
        assert_eq!(entries[1].name, "etc");
        assert_eq!(entries[1].total_size, 5);

        let mut out = Vec::new();
        write_inventory("b", &entries, &mut out).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.starts_with("b\tdb\t3\t30\t"));
    }
}
