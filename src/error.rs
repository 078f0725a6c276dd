// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Error types.

use thiserror::Error;

/// A record could not be canonicalized because a required field is missing or invalid.
///
/// This is caller error, never a ledger integrity problem.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed record: field `{field}` {reason}")]
pub struct MalformedRecordError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl MalformedRecordError {
    pub fn missing(field: &'static str) -> Self {
        Self { field, reason: "is missing or empty" }
    }

    pub fn invalid(field: &'static str, reason: &'static str) -> Self {
        Self { field, reason }
    }
}

/// A value reachable from a hashed path cannot be encoded canonically.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CanonicalError {
    #[error("floating-point value at `{path}` is not allowed in a hashed path")]
    FloatInHashedPath { path: String },
    #[error("value cannot be encoded: {0}")]
    Encoding(String),
}

/// A proof was requested with one or more declared-required sections empty or absent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("incomplete proof: required sections missing or empty: {missing:?}")]
pub struct IncompleteProofError {
    pub missing: Vec<String>,
}

/// Payload encode/decode failure.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("payload for kind `{kind}` is not valid UTF-8")]
    InvalidUtf8 { kind: String },
    #[error("payload for kind `{kind}` is not valid JSON: {source}")]
    InvalidJson {
        kind: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("kind `{kind}` expects a {expected} payload")]
    FormatMismatch { kind: String, expected: &'static str },
    #[error("payload cannot be encoded as JSON: {0}")]
    Unencodable(#[source] serde_json::Error),
}
