//! Content fingerprints used as analysis cache keys.
//!
//! The key covers the file name, the byte length and the bytes themselves,
//! so two distinct files that share a name and size still get distinct
//! cache entries.

use sha2::{Digest, Sha256};

use crate::media::MediaContent;

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Stable identity of a media item.
pub fn content_fingerprint(content: &MediaContent) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.name.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.size_bytes().to_be_bytes());
    hasher.update(&content.data);
    format!("{:x}", hasher.finalize())
}
