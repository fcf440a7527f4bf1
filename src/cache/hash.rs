//! Content hashing for cache keys.

use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of a serializable value, as 64 lowercase hex characters.
///
/// The value is serialized to JSON first, so equal values hash equally.
pub fn compute_hash<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let json = serde_json::to_string(value)?;
    Ok(hash_text(&json))
}

/// SHA-256 of a string, as 64 lowercase hex characters.
pub fn hash_text(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}
