// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Canonical Encoding
//!
//! Deterministic byte layout for everything that is hashed.
//!
//! # Rules
//! - Fields are written in a fixed, documented order
//! - Integers are fixed-width little-endian
//! - Strings are UTF-8 with a `u32` length prefix
//! - Byte strings carry a `u64` length prefix
//! - Optional values carry a presence marker (`0` / `1`)
//! - Every structure starts with its own domain tag
//! - No floating point anywhere in a hashed path
//!
//! Same fields => same bytes, on any architecture and in any language runtime
//! that follows this layout.

use crate::error::CanonicalError;
use crate::hash::{Digest, hash_bytes};
use serde_json::Value;

pub const RECORD_TAG: &[u8] = b"sovereign-ledger/record/v1";
pub const CHECKPOINT_TAG: &[u8] = b"sovereign-ledger/checkpoint/v1";
pub const PROOF_TAG: &[u8] = b"sovereign-ledger/proof/v1";
pub const EMPTY_AUDIT_TAG: &[u8] = b"sovereign-ledger/audit/empty/v1";

/// Append-only canonical byte writer.
#[derive(Debug, Default, Clone)]
pub struct CanonicalWriter {
    buf: Vec<u8>,
}

impl CanonicalWriter {
    pub fn new(tag: &[u8]) -> Self {
        let mut w = Self { buf: Vec::with_capacity(256) };
        w.bytes(tag);
        w
    }

    pub fn u8(&mut self, v: u8) -> &mut Self {
        self.buf.push(v);
        self
    }

    pub fn u32(&mut self, v: u32) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u128(&mut self, v: u128) -> &mut Self {
        self.buf.extend_from_slice(&v.to_le_bytes());
        self
    }

    pub fn digest(&mut self, d: &Digest) -> &mut Self {
        self.buf.extend_from_slice(d.as_bytes());
        self
    }

    pub fn str(&mut self, s: &str) -> &mut Self {
        self.buf.extend_from_slice(&(s.len() as u32).to_le_bytes());
        self.buf.extend_from_slice(s.as_bytes());
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        self.buf.extend_from_slice(&(b.len() as u64).to_le_bytes());
        self.buf.extend_from_slice(b);
        self
    }

    pub fn opt_bytes(&mut self, b: Option<&[u8]>) -> &mut Self {
        match b {
            Some(b) => self.u8(1).bytes(b),
            None => self.u8(0),
        }
    }

    /// Sorted-key JSON; rejects floats.
    pub fn json(&mut self, value: &Value) -> Result<&mut Self, CanonicalError> {
        let encoded = canonical_json(value)?;
        Ok(self.bytes(&encoded))
    }

    pub fn finish(self) -> Vec<u8> {
        self.buf
    }

    pub fn hash(&self) -> Digest {
        hash_bytes(&self.buf)
    }
}

/// Encodes a JSON value with sorted object keys and no insignificant whitespace.
///
/// Floats are refused: two runtimes can print the same float differently.
pub fn canonical_json(value: &Value) -> Result<Vec<u8>, CanonicalError> {
    reject_floats(value, "$")?;
    serde_json::to_vec(&sorted(value)).map_err(|e| CanonicalError::Encoding(e.to_string()))
}

/// Rebuilds `value` with every object's keys inserted in sorted order, so the
/// output does not depend on which map type backs `serde_json::Map`.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(keys.into_iter().map(|k| (k.clone(), sorted(&map[k]))).collect())
        }
        other => other.clone(),
    }
}

fn reject_floats(value: &Value, path: &str) -> Result<(), CanonicalError> {
    match value {
        Value::Number(n) if n.is_f64() => Err(CanonicalError::FloatInHashedPath { path: path.to_string() }),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                reject_floats(item, &format!("{path}[{i}]"))?;
            }
            Ok(())
        }
        Value::Object(map) => {
            for (k, v) in map {
                reject_floats(v, &format!("{path}.{k}"))?;
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
