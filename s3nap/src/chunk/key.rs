//! Chunk key codec: `(logical name, chunk index)` <-> object key.
//!
//! Keys look like `backup/2024-01-01.tar:000042`. The index is zero padded to
//! [`INDEX_WIDTH`] digits so that, for indices below [`MAX_ORDERED_INDEX`],
//! the string order of keys (which is what the object store lists in) matches
//! the numeric chunk order.

use std::fmt;

use crate::error::{Result, S3napError};

/// Separator between logical name and chunk index.
pub const DELIMITER: char = ':';

/// Minimum number of digits used to render a chunk index.
pub const INDEX_WIDTH: usize = 6;

/// Indices up to this value keep string order equal to numeric order.
pub const MAX_ORDERED_INDEX: u64 = 999_999;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    name: String,
    index: u64,
}

impl ChunkKey {
    pub fn new(name: impl Into<String>, index: u64) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        Ok(Self { name, index })
    }

    /// Decode an object key. Fails with `MalformedKey` unless the key holds
    /// exactly one delimiter, a non-empty name and a decimal index.
    pub fn parse(key: &str) -> Result<Self> {
        let malformed = |reason| S3napError::MalformedKey {
            key: key.to_string(),
            reason,
        };
        let mut parts = key.split(DELIMITER);
        let (Some(name), Some(index), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(malformed("expected exactly one ':' delimiter"));
        };
        if name.is_empty() {
            return Err(malformed("empty logical name"));
        }
        if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed("chunk index is not a decimal number"));
        }
        let index = index
            .parse::<u64>()
            .map_err(|_| malformed("chunk index out of range"))?;
        Ok(Self {
            name: name.to_string(),
            index,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn into_parts(self) -> (String, u64) {
        (self.name, self.index)
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}{}{:0width$}",
            self.name,
            DELIMITER,
            self.index,
            width = INDEX_WIDTH
        )
    }
}

pub fn encode(name: &str, index: u64) -> Result<String> {
    Ok(ChunkKey::new(name, index)?.to_string())
}

pub fn decode(key: &str) -> Result<(String, u64)> {
    ChunkKey::parse(key).map(ChunkKey::into_parts)
}

/// Listing prefix that matches the chunks of `name` and nothing else.
pub fn chunk_prefix(name: &str) -> Result<String> {
    validate_name(name)?;
    Ok(format!("{name}{DELIMITER}"))
}

/// A name is non-empty, has no `:` and is a relative path without `.` or `..`
/// segments, so it maps to a file inside the bucket directory of the local
/// backend.
pub fn validate_name(name: &str) -> Result<()> {
    let escapes = name.starts_with('/') || name.split('/').any(|seg| seg == "." || seg == "..");
    if name.is_empty() || name.contains(DELIMITER) || escapes {
        return Err(S3napError::InvalidName(name.to_string()));
    }
    Ok(())
}
