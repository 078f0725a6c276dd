// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Checkpoints: Merkle-root snapshots over a closed record range.
//!
//! Checkpoints are cumulative (genesis through a captured tail), append-only,
//! and never revised. `checkpoint_hash` seals every other field.

use crate::canonical::{CanonicalWriter, CHECKPOINT_TAG};
use crate::hash::Digest;
use crate::merkle::MerkleBuilder;
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// Inclusive `[start_id, end_id]` range in chain order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordRange {
    pub start_id: RecordId,
    pub end_id: RecordId,
}

/// Everything a checkpoint needs except the store-assigned sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointDraft {
    pub anchor_id: String,
    pub record_range: RecordRange,
    pub record_count: u64,
    pub merkle_root: Digest,
    pub created_at: u64,
}

impl CheckpointDraft {
    pub fn seal(self, sequence: u64) -> Checkpoint {
        let mut cp = Checkpoint {
            sequence,
            anchor_id: self.anchor_id,
            record_range: self.record_range,
            record_count: self.record_count,
            merkle_root: self.merkle_root,
            created_at: self.created_at,
            checkpoint_hash: Digest::default(),
        };
        cp.checkpoint_hash = cp.compute_hash();
        cp
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub anchor_id: String,
    pub record_range: RecordRange,
    pub record_count: u64,
    pub merkle_root: Digest,
    /// Milliseconds since the Unix epoch.
    pub created_at: u64,
    pub checkpoint_hash: Digest,
}

impl Checkpoint {
    /// ```text
    /// tag | sequence u64 | anchor_id str | start_id u128 | end_id u128
    ///     | record_count u64 | merkle_root [32] | created_at u64
    /// ```
    pub fn compute_hash(&self) -> Digest {
        let mut w = CanonicalWriter::new(CHECKPOINT_TAG);
        w.u64(self.sequence)
            .str(&self.anchor_id)
            .u128(self.record_range.start_id.0)
            .u128(self.record_range.end_id.0)
            .u64(self.record_count)
            .digest(&self.merkle_root)
            .u64(self.created_at);
        w.hash()
    }

    pub fn is_sealed(&self) -> bool {
        self.compute_hash() == self.checkpoint_hash
    }
}

/// Recomputes the root from `records` (which should be exactly the checkpoint's
/// range, in chain order) and compares every checkpointed fact.
///
/// Leaves are recomputed from record content, not taken from the stored `hash`.
pub fn verify_checkpoint<'r>(checkpoint: &Checkpoint, records: impl IntoIterator<Item = &'r Record>) -> bool {
    if !checkpoint.is_sealed() {
        return false;
    }
    let mut builder = MerkleBuilder::new();
    let mut first: Option<RecordId> = None;
    let mut last: Option<RecordId> = None;
    for record in records {
        if record.anchor_id != checkpoint.anchor_id {
            return false;
        }
        match record.recompute_hash() {
            Ok(h) => builder.push(h),
            Err(_) => return false,
        }
        first.get_or_insert(record.id);
        last = Some(record.id);
    }
    first == Some(checkpoint.record_range.start_id)
        && last == Some(checkpoint.record_range.end_id)
        && builder.leaf_count() == checkpoint.record_count
        && builder.finish() == checkpoint.merkle_root
}
