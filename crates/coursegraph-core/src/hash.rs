//! Deterministic content hashing using blake3.
//!
//! # Determinism
//!
//! - Content is serialized with `serde_json::to_vec`; object keys come out
//!   sorted because the workspace never enables `preserve_order`.
//! - Composite hashes sort their entries by `NodeId` before hashing.
//! - Every composite hash starts with a domain tag so a content hash can
//!   never collide with a fingerprint or a cache key.

use std::fmt;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

use crate::id::NodeId;
use crate::node::Content;

/// A 32-byte blake3 digest. Serialized as lowercase hex.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ContentHash(pub [u8; 32]);

impl ContentHash {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        blake3::Hash::from(self.0).to_hex().to_string()
    }

    pub fn from_hex(s: &str) -> Option<Self> {
        blake3::Hash::from_hex(s).ok().map(|h| ContentHash(*h.as_bytes()))
    }
}

impl From<blake3::Hash> for ContentHash {
    fn from(h: blake3::Hash) -> Self {
        ContentHash(*h.as_bytes())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", &self.to_hex()[..12])
    }
}

impl Serialize for ContentHash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for ContentHash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        ContentHash::from_hex(&s).ok_or_else(|| de::Error::custom("invalid content hash"))
    }
}

/// Hashes a content payload.
pub fn hash_content(content: &Content) -> ContentHash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"content:");
    hasher.update(&content.canonical_bytes());
    hasher.finalize().into()
}

/// Fingerprint of a node's upstream truth: every `(id, version, hash)` the
/// node depends on. Input order does not matter.
pub fn hash_upstream(entries: &[(NodeId, u64, ContentHash)]) -> ContentHash {
    let mut sorted = entries.to_vec();
    sorted.sort_by_key(|(id, _, _)| *id);

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"upstream:");
    for (id, version, hash) in &sorted {
        hasher.update(&id.0.to_le_bytes());
        hasher.update(&version.to_le_bytes());
        hasher.update(hash.as_bytes());
    }
    hasher.finalize().into()
}

/// Cache key for an assembled context: target, tier tag, and every included
/// `(id, hash)` pair. Input order does not matter.
pub fn hash_context_key(
    target: NodeId,
    tier: &str,
    included: &[(NodeId, ContentHash)],
) -> ContentHash {
    let mut sorted = included.to_vec();
    sorted.sort_by_key(|(id, _)| *id);

    let mut hasher = blake3::Hasher::new();
    hasher.update(b"context:");
    hasher.update(&target.0.to_le_bytes());
    hasher.update(tier.as_bytes());
    hasher.update(&[0u8]);
    for (id, hash) in &sorted {
        hasher.update(&id.0.to_le_bytes());
        hasher.update(hash.as_bytes());
    }
    hasher.finalize().into()
}
