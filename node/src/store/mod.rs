// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ledger Store
//!
//! One contract, two backends:
//! - [`DurableStore`]: SQLite, pooled connections, bounded timeouts
//! - [`VolatileStore`]: in-process, lost on restart
//!
//! [`StoreFactory`] owns the active backend and the fallback/recovery policy.
//!
//! Every backend performs the tail compare-and-swap inside its own atomic
//! commit boundary, so a record is either fully visible or absent.

pub mod durable;
pub mod factory;
pub mod pool;
pub mod volatile;

pub use durable::DurableStore;
pub use factory::{ActiveStore, StoreFactory};
pub use volatile::VolatileStore;

use crate::config::BackendKind;
use crate::errors::{StoreError, ValidationError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use sovereign_ledger::checkpoint::{Checkpoint, CheckpointDraft};
use sovereign_ledger::{ChainExpectation, Record, RecordId};
use std::sync::Arc;

/// Rows fetched per page by lazy range reads.
pub const READ_PAGE_SIZE: usize = 256;

/// Lazy, finite stream of records in chain order.
pub type RecordStream = BoxStream<'static, Result<Record, StoreError>>;

/// Inclusive height window. `to = None` reads to the tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeightRange {
    pub from: u64,
    pub to: Option<u64>,
}

impl HeightRange {
    pub fn all() -> Self {
        Self { from: 0, to: None }
    }

    pub fn through(to: u64) -> Self {
        Self { from: 0, to: Some(to) }
    }

    pub fn contains(&self, height: u64) -> bool {
        height >= self.from && self.to.map_or(true, |to| height <= to)
    }
}

/// A record produced by the ledger, before the store links it.
///
/// `id` and `timestamp` are assigned by the caller so that a retried append
/// against a different backend keeps them.
#[derive(Debug, Clone)]
pub struct PendingAppend {
    pub record: sovereign_ledger::NewRecord,
    pub id: RecordId,
    pub timestamp: u64,
}

#[async_trait]
pub trait LedgerStore: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Links `pending` onto the current tail of its anchor and commits it.
    ///
    /// Fails with `TailChanged` if the expectation does not hold and with
    /// `Validation(GenesisExists)` on a second genesis.
    async fn append(&self, pending: PendingAppend) -> Result<Record, StoreError>;

    async fn tail(&self, anchor_id: &str) -> Result<Option<Record>, StoreError>;

    async fn get(&self, anchor_id: &str, id: RecordId) -> Result<Option<Record>, StoreError>;

    async fn record_at(&self, anchor_id: &str, height: u64) -> Result<Option<Record>, StoreError>;

    /// Pages through `range` lazily. The stream owns its handle on the store;
    /// dropping it early releases whatever the backend holds.
    fn read_range(self: Arc<Self>, anchor_id: String, range: HeightRange) -> RecordStream;

    /// Persists `draft` with the next sequence number.
    async fn append_checkpoint(&self, draft: CheckpointDraft) -> Result<Checkpoint, StoreError>;

    async fn latest_checkpoint(&self, anchor_id: &str) -> Result<Option<Checkpoint>, StoreError>;

    async fn anchors(&self) -> Result<Vec<String>, StoreError>;

    /// Never blocks longer than the configured health timeout.
    async fn health(&self) -> bool;
}

/// Applies the append's chain expectation to the tail a backend just read.
pub(crate) fn check_expectation(
    anchor_id: &str,
    expect: ChainExpectation,
    tail: Option<&Record>,
) -> Result<(), StoreError> {
    match (expect, tail) {
        (ChainExpectation::Any, _) | (ChainExpectation::Genesis, None) => Ok(()),
        (ChainExpectation::Genesis, Some(_)) => Err(ValidationError::GenesisExists {
            anchor_id: anchor_id.to_string(),
        }
        .into()),
        (ChainExpectation::Tail(expected), tail) => {
            let actual = tail.map(|t| t.hash);
            if actual == Some(expected) {
                Ok(())
            } else {
                Err(StoreError::TailChanged {
                    anchor_id: anchor_id.to_string(),
                    expected: Some(expected),
                    actual,
                })
            }
        }
    }
}

/// Seals `pending` onto `tail` after checking its expectation.
pub(crate) fn link(pending: PendingAppend, tail: Option<&Record>) -> Result<Record, StoreError> {
    let anchor_id = pending.record.anchor_id.clone();
    check_expectation(&anchor_id, pending.record.expect, tail)?;
    pending
        .record
        .seal(pending.id, pending.timestamp, tail.map(|t| (&t.hash, t.height)))
        .map_err(|e| StoreError::Validation(e.into()))
}
