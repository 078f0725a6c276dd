// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ledger records.
//!
//! A [`Record`] is created exactly once by an append and is never mutated or
//! deleted. Its `hash` is a pure function of every other field except `id` and
//! `signature` (see [`RecordFields`]), so changing any hashed field breaks the
//! link to every descendant.

use crate::canonical::{CanonicalWriter, RECORD_TAG};
use crate::error::MalformedRecordError;
use crate::hash::{Digest, GENESIS, SCHEMA_VERSION};
use crate::types::id::RecordId;
use serde::{Deserialize, Serialize};

/// Where the caller expects its record to land in the chain.
///
/// This is the compare-and-swap token of an append.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "expect", content = "tail")]
pub enum ChainExpectation {
    /// Link onto whatever the current tail is.
    #[default]
    Any,
    /// The chain must be empty; this record becomes its genesis.
    Genesis,
    /// The current tail hash must equal this digest.
    Tail(Digest),
}

/// A record before the ledger has linked and hashed it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRecord {
    pub anchor_id: String,
    pub kind: String,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, with = "hex_bytes_opt")]
    pub signature: Option<Vec<u8>>,
    pub producer: String,
    #[serde(default)]
    pub expect: ChainExpectation,
}

impl NewRecord {
    pub fn new(
        anchor_id: impl Into<String>,
        kind: impl Into<String>,
        producer: impl Into<String>,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            anchor_id: anchor_id.into(),
            kind: kind.into(),
            payload,
            signature: None,
            producer: producer.into(),
            expect: ChainExpectation::Any,
        }
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn expecting(mut self, expect: ChainExpectation) -> Self {
        self.expect = expect;
        self
    }

    /// Checks required fields before any store is touched.
    pub fn validate(&self) -> Result<(), MalformedRecordError> {
        if self.anchor_id.is_empty() {
            return Err(MalformedRecordError::missing("anchor_id"));
        }
        if self.kind.is_empty() {
            return Err(MalformedRecordError::missing("kind"));
        }
        if self.producer.is_empty() {
            return Err(MalformedRecordError::missing("producer"));
        }
        if self.anchor_id.len() > MAX_ANCHOR_LEN {
            return Err(MalformedRecordError::invalid("anchor_id", "exceeds 256 bytes"));
        }
        Ok(())
    }

    /// Links this record onto `tail` (or genesis when `tail` is `None`) and seals it.
    ///
    /// The caller is responsible for having checked `expect` against `tail`.
    pub fn seal(self, id: RecordId, timestamp: u64, tail: Option<(&Digest, u64)>) -> Result<Record, MalformedRecordError> {
        let (prev_hash, height) = match tail {
            Some((hash, tail_height)) => (*hash, tail_height + 1),
            None => (GENESIS, 0),
        };
        let mut record = Record {
            id,
            anchor_id: self.anchor_id,
            height,
            kind: self.kind,
            timestamp,
            prev_hash,
            hash: GENESIS,
            payload: self.payload,
            signature: self.signature,
            producer: self.producer,
            schema_version: SCHEMA_VERSION,
        };
        record.hash = canonical_record_hash(&record.fields())?;
        Ok(record)
    }
}

/// Upper bound on anchor identifiers, matching the durable schema.
pub const MAX_ANCHOR_LEN: usize = 256;

/// An immutable, hash-linked ledger entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub anchor_id: String,
    /// Position in the chain; 0 for genesis.
    pub height: u64,
    pub kind: String,
    /// Nanoseconds since the Unix epoch. Informational; `prev_hash` is authoritative for order.
    pub timestamp: u64,
    pub prev_hash: Digest,
    pub hash: Digest,
    #[serde(with = "hex_bytes")]
    pub payload: Vec<u8>,
    #[serde(default, with = "hex_bytes_opt")]
    pub signature: Option<Vec<u8>>,
    pub producer: String,
    pub schema_version: u32,
}

impl Record {
    /// Borrowed view of the hashed fields.
    pub fn fields(&self) -> RecordFields<'_> {
        RecordFields {
            schema_version: self.schema_version,
            anchor_id: &self.anchor_id,
            height: self.height,
            kind: &self.kind,
            timestamp: self.timestamp,
            prev_hash: &self.prev_hash,
            payload: &self.payload,
            producer: &self.producer,
        }
    }

    pub fn is_genesis(&self) -> bool {
        self.height == 0 && self.prev_hash.is_genesis()
    }

    /// Recomputes the hash from the record's other fields, ignoring the stored `hash`.
    pub fn recompute_hash(&self) -> Result<Digest, MalformedRecordError> {
        canonical_record_hash(&self.fields())
    }

    /// True when the stored `hash` matches a fresh recomputation.
    pub fn verify_hash(&self) -> bool {
        matches!(self.recompute_hash(), Ok(h) if h == self.hash)
    }
}

/// The fields that feed a record hash, in canonical order.
#[derive(Clone, Copy, Debug)]
pub struct RecordFields<'a> {
    pub schema_version: u32,
    pub anchor_id: &'a str,
    pub height: u64,
    pub kind: &'a str,
    pub timestamp: u64,
    pub prev_hash: &'a Digest,
    pub payload: &'a [u8],
    pub producer: &'a str,
}

/// Canonical bytes of a record (minus `id`, `hash` and `signature`).
///
/// ```text
/// tag | schema_version u32 | height u64 | prev_hash [32] | anchor_id str
///     | kind str | timestamp u64 | producer str | payload bytes
/// ```
pub fn canonicalize(fields: &RecordFields<'_>) -> Result<Vec<u8>, MalformedRecordError> {
    if fields.anchor_id.is_empty() {
        return Err(MalformedRecordError::missing("anchor_id"));
    }
    if fields.kind.is_empty() {
        return Err(MalformedRecordError::missing("kind"));
    }
    if fields.producer.is_empty() {
        return Err(MalformedRecordError::missing("producer"));
    }
    if fields.schema_version == 0 {
        return Err(MalformedRecordError::missing("schema_version"));
    }
    if fields.height == 0 && !fields.prev_hash.is_genesis() {
        return Err(MalformedRecordError::invalid("prev_hash", "must be GENESIS at height 0"));
    }
    if fields.height > 0 && fields.prev_hash.is_genesis() {
        return Err(MalformedRecordError::invalid("prev_hash", "GENESIS is only valid at height 0"));
    }

    let mut w = CanonicalWriter::new(RECORD_TAG);
    w.u32(fields.schema_version)
        .u64(fields.height)
        .digest(fields.prev_hash)
        .str(fields.anchor_id)
        .str(fields.kind)
        .u64(fields.timestamp)
        .str(fields.producer)
        .bytes(fields.payload);
    Ok(w.finish())
}

pub fn canonical_record_hash(fields: &RecordFields<'_>) -> Result<Digest, MalformedRecordError> {
    canonicalize(fields).map(|bytes| crate::hash::hash_bytes(&bytes))
}

pub(crate) mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

pub(crate) mod hex_bytes_opt {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &Option<Vec<u8>>, s: S) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(b) => s.serialize_some(&hex::encode(b)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<u8>>, D::Error> {
        let s = Option::<String>::deserialize(d)?;
        s.map(|s| hex::decode(s).map_err(serde::de::Error::custom)).transpose()
    }
}
