// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use sovereign_ledger::error::{IncompleteProofError, MalformedRecordError};
use sovereign_ledger::{Digest, RecordId};
use std::time::Duration;
use thiserror::Error;

/// Caller errors. Rejected immediately with a specific reason, never coerced.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error(transparent)]
    MalformedRecord(#[from] MalformedRecordError),
    #[error("anchor `{anchor_id}` already has a genesis record")]
    GenesisExists { anchor_id: String },
    #[error("anchor `{anchor_id}` has no records")]
    EmptyAnchor { anchor_id: String },
    #[error("record {id} does not exist on anchor `{anchor_id}`")]
    UnknownRecord { anchor_id: String, id: RecordId },
    #[error("ontology descriptor is empty")]
    EmptyOntology,
    #[error(transparent)]
    IncompleteProof(#[from] IncompleteProofError),
    #[error("section `{section}` is not canonical: {reason}")]
    NonCanonicalSection { section: String, reason: String },
}

/// Errors at the store seam. Both backends speak this.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("tail of `{anchor_id}` changed (expected {expected:?}, found {actual:?})")]
    TailChanged {
        anchor_id: String,
        expected: Option<Digest>,
        actual: Option<Digest>,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("stored data is corrupt: {0}")]
    Corrupt(String),
    #[error("operation cancelled")]
    Cancelled,
}

impl StoreError {
    /// Failures that say something about the backend rather than the request.
    pub fn is_availability(&self) -> bool {
        matches!(self, StoreError::Unavailable(_) | StoreError::Timeout(_))
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Error classes of the ledger taxonomy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Chain break or hash mismatch. Never auto-repaired.
    Integrity,
    /// Backend unreachable on every store.
    Availability,
    /// Caller error.
    Validation,
    /// Lost a compare-and-swap on the tail; retry with the new tail.
    Conflict,
    Cancelled,
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("integrity violation on `{anchor_id}` at {break_at:?}: {reason}")]
    Integrity {
        anchor_id: String,
        break_at: Option<RecordId>,
        reason: String,
    },
    #[error("no backend available: durable: {durable}; volatile: {volatile}")]
    Availability { durable: String, volatile: String },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("tail of `{anchor_id}` changed; retry")]
    TailChanged { anchor_id: String, actual: Option<Digest> },
    #[error("operation cancelled")]
    Cancelled,
}

impl LedgerError {
    pub fn class(&self) -> ErrorClass {
        match self {
            LedgerError::Integrity { .. } => ErrorClass::Integrity,
            LedgerError::Availability { .. } => ErrorClass::Availability,
            LedgerError::Validation(_) => ErrorClass::Validation,
            LedgerError::TailChanged { .. } => ErrorClass::Conflict,
            LedgerError::Cancelled => ErrorClass::Cancelled,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Conflict | ErrorClass::Availability)
    }

    /// Lifts a store error that was not absorbed by the fallback policy.
    pub(crate) fn from_store(anchor_id: &str, e: StoreError) -> Self {
        match e {
            StoreError::Validation(v) => LedgerError::Validation(v),
            StoreError::TailChanged { anchor_id, actual, .. } => LedgerError::TailChanged { anchor_id, actual },
            StoreError::Corrupt(reason) => LedgerError::Integrity {
                anchor_id: anchor_id.to_string(),
                break_at: None,
                reason,
            },
            StoreError::Cancelled => LedgerError::Cancelled,
            e @ (StoreError::Unavailable(_) | StoreError::Timeout(_)) => LedgerError::Availability {
                durable: e.to_string(),
                volatile: "not attempted".to_string(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, LedgerError>;
