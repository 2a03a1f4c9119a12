//! Chunk naming, hashing and listing aggregation
//!
//! Submodules:
//! - `key`: `(logical name, index)` <-> object key codec
//! - `hash`: MD5 content hashes and etag comparison
//! - `aggregate`: regroup listings into ordered per-file chunk sequences
pub mod aggregate;
pub mod hash;
pub mod key;

pub use aggregate::{Aggregation, ChunkAggregator, ChunkObject, InventoryEntry, LogicalFile};
pub use hash::ContentHash;
pub use key::{ChunkKey, chunk_prefix, decode, encode};
