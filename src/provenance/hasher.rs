//! BLAKE3 hashing of desired and observed attribute state.

use crate::core::types::AttrMap;

/// Hash a string. Returns `"blake3:{hex}"`.
pub fn hash_string(s: &str) -> String {
    format!("blake3:{}", blake3::hash(s.as_bytes()).to_hex())
}

/// Hash an attribute map. Key order matters: descriptors declare attributes
/// in a fixed order, so the same declaration always hashes the same.
pub fn hash_attrs(attrs: &AttrMap) -> String {
    let mut hasher = blake3::Hasher::new();
    for (key, value) in attrs {
        hasher.update(key.as_bytes());
        hasher.update(b"\0");
        hasher.update(value.to_string().as_bytes());
        hasher.update(b"\n");
    }
    format!("blake3:{}", hasher.finalize().to_hex())
}
