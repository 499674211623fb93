//! Content hashing used as the cross-source dedup key.

use md5::{Digest, Md5};

/// Lowercase hex MD5 of the given bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Md5::digest(bytes))
}

/// Normalizes a hash advertised by a remote source.
///
/// Returns `None` unless the value is 32 hex digits.
pub fn normalize_hash(hash: &str) -> Option<String> {
    let hash = hash.trim().to_lowercase();
    if hash.len() == 32 && hash.chars().all(|c| c.is_ascii_hexdigit()) {
        Some(hash)
    } else {
        None
    }
}
