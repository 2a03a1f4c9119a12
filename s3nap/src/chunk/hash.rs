//! MD5 content hashes and S3-style etag comparison.

use std::fmt;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as B64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContentHash([u8; 16]);

impl ContentHash {
    pub fn compute(data: &[u8]) -> Self {
        Self(md5::compute(data).0)
    }

    /// Value for the `Content-MD5` request header.
    pub fn to_base64(&self) -> String {
        B64.encode(self.0)
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse a store etag. `None` when the etag is not a plain hex MD5, e.g.
    /// for objects assembled from multiple uploaded parts.
    pub fn from_etag(etag: &str) -> Option<Self> {
        let trimmed = etag.trim().trim_matches('"');
        if is_multipart_etag(trimmed) {
            return None;
        }
        let mut out = [0u8; 16];
        hex::decode_to_slice(trimmed, &mut out).ok()?;
        Some(Self(out))
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// Incremental MD5 over bytes as they arrive.
pub struct ContentHasher(md5::Context);

impl ContentHasher {
    pub fn new() -> Self {
        Self(md5::Context::new())
    }

    pub fn update(&mut self, data: &[u8]) {
        self.0.consume(data);
    }

    pub fn finish(self) -> ContentHash {
        ContentHash(self.0.compute().0)
    }
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Multipart etags have the form `<hex>-<part count>` and are not an MD5 of
/// the object body.
pub fn is_multipart_etag(etag: &str) -> bool {
    etag.trim_matches('"').contains('-')
}
