//! Regroup a flat object listing into logical files.
//!
//! The whole listing is held in memory. Chunks are ordered by their decoded
//! numeric index, which for padded keys is the same as the store's string
//! order, and stays correct for indices wider than the padding.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cadapter::client::{ObjectBackend, ObjectClient, ObjectRecord};
use crate::chunk::key::ChunkKey;
use crate::error::Result;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkObject {
    pub index: u64,
    pub key: String,
    pub size: u64,
    pub last_modified: DateTime<Utc>,
    pub etag: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalFile {
    pub name: String,
    /// Ascending by index.
    pub chunks: Vec<ChunkObject>,
}

impl LogicalFile {
    pub fn total_size(&self) -> u64 {
        self.chunks.iter().map(|c| c.size).sum()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.chunks.iter().map(|c| c.last_modified).max()
    }

    /// Indices absent from `0..=max_index`.
    pub fn missing_indices(&self) -> Vec<u64> {
        let mut missing = Vec::new();
        let mut expected = 0u64;
        for chunk in &self.chunks {
            missing.extend(expected..chunk.index);
            expected = chunk.index + 1;
        }
        missing
    }

    pub fn summary(&self) -> InventoryEntry {
        InventoryEntry {
            name: self.name.clone(),
            chunk_count: self.chunks.len(),
            total_size: self.total_size(),
            last_modified: self.last_modified(),
        }
    }
}

/// One row of the listing report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryEntry {
    pub name: String,
    pub chunk_count: usize,
    pub total_size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
pub struct ChunkAggregator {
    only: Option<String>,
    files: BTreeMap<String, BTreeMap<u64, ChunkObject>>,
    skipped: usize,
}

impl ChunkAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep only the chunks of `name`; other well-formed keys are ignored.
    pub fn for_name(name: &str) -> Self {
        Self {
            only: Some(name.to_string()),
            ..Self::default()
        }
    }

    pub fn push(&mut self, record: ObjectRecord) {
        let (canonical, (name, index)) = match ChunkKey::parse(&record.key) {
            Ok(key) => (key.to_string() == record.key, key.into_parts()),
            Err(e) => {
                warn!("ignoring object: {e}");
                self.skipped += 1;
                return;
            }
        };
        if self.only.as_deref().is_some_and(|only| only != name) {
            return;
        }
        let chunk = ChunkObject {
            index,
            key: record.key,
            size: record.size,
            last_modified: record.last_modified,
            etag: record.etag,
        };
        let chunks = self.files.entry(name).or_default();
        if let Some(existing) = chunks.get(&index) {
            // `n:1` and `n:000001` are the same chunk; the padded key is the
            // one uploads write. Otherwise the later record wins.
            if !canonical && is_canonical(&existing.key) {
                warn!(kept = %existing.key, ignored = %chunk.key, "duplicate chunk key");
                return;
            }
            if canonical != is_canonical(&existing.key) {
                warn!(kept = %chunk.key, ignored = %existing.key, "duplicate chunk key");
            }
        }
        chunks.insert(index, chunk);
    }

    pub fn finish(self) -> Aggregation {
        let files = self
            .files
            .into_iter()
            .map(|(name, chunks)| {
                let file = LogicalFile {
                    name: name.clone(),
                    chunks: chunks.into_values().collect(),
                };
                (name, file)
            })
            .collect();
        Aggregation {
            files,
            skipped: self.skipped,
        }
    }
}

impl Extend<ObjectRecord> for ChunkAggregator {
    fn extend<T: IntoIterator<Item = ObjectRecord>>(&mut self, iter: T) {
        for record in iter {
            self.push(record);
        }
    }
}

#[derive(Debug, Default)]
pub struct Aggregation {
    files: BTreeMap<String, LogicalFile>,
    skipped: usize,
}

impl Aggregation {
    pub fn get(&self, name: &str) -> Option<&LogicalFile> {
        self.files.get(name)
    }

    pub fn take(&mut self, name: &str) -> Option<LogicalFile> {
        self.files.remove(name)
    }

    /// Logical files ordered by name.
    pub fn files(&self) -> impl Iterator<Item = &LogicalFile> {
        self.files.values()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of listing entries dropped because their key did not parse.
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn inventory(&self) -> Vec<InventoryEntry> {
        self.files().map(LogicalFile::summary).collect()
    }
}

fn is_canonical(key: &str) -> bool {
    ChunkKey::parse(key).is_ok_and(|parsed| parsed.to_string() == key)
}

pub fn aggregate<I: IntoIterator<Item = ObjectRecord>>(records: I) -> Aggregation {
    let mut aggregator = ChunkAggregator::new();
    aggregator.extend(records);
    aggregator.finish()
}

/// Drain the listing under `prefix` and aggregate it.
pub async fn aggregate_listing<B: ObjectBackend>(
    client: &ObjectClient<B>,
    prefix: &str,
    aggregator: ChunkAggregator,
) -> Result<Aggregation> {
    let mut aggregator = aggregator;
    aggregator.extend(client.list_all(prefix).await?);
    Ok(aggregator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::key::encode;
    use chrono::TimeZone;

    fn record(key: &str, size: u64, minute: u32) -> ObjectRecord {
        ObjectRecord {
            key: key.to_string(),
            size,
            last_modified: Utc.with_ymd_and_hms(2024, 1, 1, 0, minute, 0).unwrap(),
            etag: None,
        }
    }

    #[test]
    fn test_orders_chunks_regardless_of_listing_order() {
        let mut records: Vec<_> = (0..25u64)
            .map(|i| record(&encode("f", i).unwrap(), 1, 0))
            .collect();
        records.reverse();
        records.swap(3, 17);
        let agg = aggregate(records);
        let file = agg.get("f").unwrap();
        let indices: Vec<u64> = file.chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..25).collect::<Vec<_>>());
    }

    #[test]
    fn test_orders_unpadded_keys_numerically() {
        let agg = aggregate(["f:10", "f:2", "f:1", "f:0"].map(|k| record(k, 1, 0)));
        let indices: Vec<u64> = agg.get("f").unwrap().chunks.iter().map(|c| c.index).collect();
        assert_eq!(indices, [0, 1, 2, 10]);
    }

    #[test]
    fn test_interleaved_names_form_two_groups() {
        let records = vec![
            record("a:000000", 10, 1),
            record("b:000000", 5, 2),
            record("a:000001", 10, 3),
            record("b:000001", 5, 4),
            record("a:000002", 7, 5),
        ];
        let agg = aggregate(records);
        assert_eq!(agg.len(), 2);
        let inv = agg.inventory();
        assert_eq!(inv[0].name, "a");
        assert_eq!(inv[0].chunk_count, 3);
        assert_eq!(inv[0].total_size, 27);
        assert_eq!(
            inv[0].last_modified,
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 5, 0).unwrap())
        );
        assert_eq!(inv[1].name, "b");
        assert_eq!(inv[1].chunk_count, 2);
        assert_eq!(inv[1].total_size, 10);
    }

    #[test]
    fn test_last_modified_is_max_not_last() {
        let agg = aggregate(vec![record("a:000000", 1, 9), record("a:000001", 1, 2)]);
        assert_eq!(
            agg.get("a").unwrap().last_modified(),
            Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 9, 0).unwrap())
        );
    }

    #[test]
    fn test_malformed_keys_are_skipped() {
        let agg = aggregate(vec![
            record("a:000000", 4, 0),
            record("no-delimiter", 4, 0),
            record("x:y:000001", 4, 0),
            record("a:000001", 4, 0),
        ]);
        assert_eq!(agg.skipped(), 2);
        assert_eq!(agg.len(), 1);
        assert_eq!(agg.get("a").unwrap().chunks.len(), 2);
    }

    #[test]
    fn test_duplicate_key_later_record_wins() {
        let agg = aggregate(vec![record("a:000000", 4, 0), record("a:000000", 9, 1)]);
        let file = agg.get("a").unwrap();
        assert_eq!(file.chunks.len(), 1);
        assert_eq!(file.chunks[0].size, 9);
    }

    #[test]
    fn test_padded_key_shadows_legacy_key_for_same_chunk() {
        // Listing order puts `n:1` after `n:000001`.
        let agg = aggregate(vec![
            record("n:000000", 4, 0),
            record("n:000001", 4, 0),
            record("n:1", 3, 0),
        ]);
        let file = agg.get("n").unwrap();
        assert_eq!(file.chunks.len(), 2);
        assert_eq!(file.chunks[1].key, "n:000001");
        assert_eq!(file.total_size(), 8);

        let agg = aggregate(vec![record("n:1", 3, 0), record("n:000001", 4, 0)]);
        assert_eq!(agg.get("n").unwrap().chunks[0].key, "n:000001");
    }

    #[test]
    fn test_for_name_filters_other_files() {
        let mut aggregator = ChunkAggregator::for_name("a");
        aggregator.extend(vec![record("a:000000", 1, 0), record("ab:000000", 1, 0)]);
        let mut agg = aggregator.finish();
        assert_eq!(agg.len(), 1);
        assert!(agg.take("a").is_some());
        assert!(agg.is_empty());
    }

    #[test]
    fn test_missing_indices() {
        let agg = aggregate(vec![
            record("a:000001", 1, 0),
            record("a:000002", 1, 0),
            record("a:000005", 1, 0),
        ]);
        assert_eq!(agg.get("a").unwrap().missing_indices(), vec![0, 3, 4]);
    }
}
