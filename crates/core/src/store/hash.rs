//! Content-addressed key generation.

use sha2::{Digest, Sha256};

/// Hash a canonical key source into the hex index key.
pub fn cache_key(source: &str) -> String {
    hex::encode(Sha256::digest(source.as_bytes()))
}

/// Hash a response body into its blob hash.
pub fn blob_hash(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}
