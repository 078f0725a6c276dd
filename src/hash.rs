// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical BLAKE3 Hashing
//!
//! BLAKE3 is the only hash function used by schema version 1 of the ledger.
//! Every record hash, Merkle node, checkpoint hash and proof hash goes through
//! [`hash_bytes`] or a [`blake3::Hasher`] fed by the canonical encoder.
//!
//! Swapping the hash function is a breaking schema change: it requires a new
//! [`SCHEMA_VERSION`] and existing chains do not verify under it.

use core::fmt;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Ledger schema version. Bumped on any change to canonical encoding or hash function.
pub const SCHEMA_VERSION: u32 = 1;

/// Length of every digest in bytes (BLAKE3-256).
pub const DIGEST_LEN: usize = 32;

/// A 256-bit BLAKE3 digest.
///
/// Serialized as lowercase hex on every human/wire surface.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Digest(pub [u8; DIGEST_LEN]);

/// Sentinel `prev_hash` of the first record of every chain.
pub const GENESIS: Digest = Digest([0u8; DIGEST_LEN]);

impl Digest {
    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    pub fn is_genesis(&self) -> bool {
        *self == GENESIS
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a 64-character hex string.
    pub fn from_hex(s: &str) -> Option<Self> {
        let mut out = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut out).ok()?;
        Some(Digest(out))
    }

    /// Builds a digest from a raw slice, e.g. a database BLOB column.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; DIGEST_LEN] = bytes.try_into().ok()?;
        Some(Digest(arr))
    }
}

impl From<blake3::Hash> for Digest {
    fn from(h: blake3::Hash) -> Self {
        Digest(*h.as_bytes())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Digest {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Digest {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Digest::from_hex(&s).ok_or_else(|| serde::de::Error::custom("expected 64 hex characters"))
    }
}

/// One-shot BLAKE3 of a byte string.
pub fn hash_bytes(bytes: &[u8]) -> Digest {
    blake3::hash(bytes).into()
}

/// BLAKE3 of `left || right`, the internal Merkle node function.
pub fn hash_pair(left: &Digest, right: &Digest) -> Digest {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&left.0);
    hasher.update(&right.0);
    hasher.finalize().into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hex_roundtrip_and_rejects_garbage() {
        let d = hash_bytes(b"ledger");
        assert_eq!(Digest::from_hex(&d.to_hex()), Some(d));
        assert_eq!(Digest::from_hex("PLACEHOLDER"), None);
        assert_eq!(Digest::from_hex(&"ab".repeat(31)), None);
    }

    #[test]
    fn test_genesis_is_not_a_real_hash() {
        assert!(GENESIS.is_genesis());
        assert!(!hash_bytes(b"").is_genesis());
    }

    #[test]
    fn test_pair_is_order_sensitive() {
        let a = hash_bytes(b"a");
        let b = hash_bytes(b"b");
        assert_ne!(hash_pair(&a, &b), hash_pair(&b, &a));
    }
}
