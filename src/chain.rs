// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Chain Verification
//!
//! Walks an ordered record range and checks hash-chain continuity.
//!
//! # Checks (every record after the first of the walk)
//! - same `anchor_id`
//! - `height == previous.height + 1`
//! - `prev_hash == recompute(previous)`
//! - `hash == recompute(record)`
//!
//! The first record of a walk must either be the chain's genesis, or be
//! preceded by its stored predecessor, in which case the walk really starts at
//! the predecessor and the first record gets the full checks.
//!
//! Links are checked against *recomputed* hashes, so tampering with a genesis
//! record's content surfaces at its successor. The walk stops at the first
//! break and never attempts repair.

use crate::hash::Digest;
use crate::types::{Record, RecordId};
use serde::{Deserialize, Serialize};

/// Why a chain walk stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakReason {
    /// Record belongs to a different anchor.
    WrongAnchor,
    /// Range starts mid-chain without a predecessor to link to, or a
    /// genesis claim is inconsistent with height.
    NotGenesis,
    /// Heights are not contiguous.
    HeightGap,
    /// `prev_hash` does not equal the recomputed hash of the predecessor.
    PrevHashMismatch,
    /// Stored `hash` does not equal the recomputed hash of the record.
    HashMismatch,
}

impl BreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakReason::WrongAnchor => "wrong_anchor",
            BreakReason::NotGenesis => "not_genesis",
            BreakReason::HeightGap => "height_gap",
            BreakReason::PrevHashMismatch => "prev_hash_mismatch",
            BreakReason::HashMismatch => "hash_mismatch",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainBreak {
    pub at: RecordId,
    pub height: u64,
    pub reason: BreakReason,
}

/// Outcome of [`ChainWalker`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    pub ok: bool,
    pub break_at: Option<RecordId>,
    pub reason: Option<BreakReason>,
    pub records_checked: u64,
}

impl VerificationResult {
    pub fn valid(records_checked: u64) -> Self {
        Self { ok: true, break_at: None, reason: None, records_checked }
    }

    pub fn broken(b: ChainBreak, records_checked: u64) -> Self {
        Self { ok: false, break_at: Some(b.at), reason: Some(b.reason), records_checked }
    }
}

#[derive(Debug, Clone, Copy)]
struct Link {
    height: u64,
    recomputed: Option<Digest>,
}

/// Incremental chain checker; feed records in chain order.
#[derive(Debug)]
pub struct ChainWalker<'a> {
    anchor_id: &'a str,
    prev: Option<Link>,
    checked: u64,
}

impl<'a> ChainWalker<'a> {
    /// Starts a walk. `predecessor` is the stored record immediately before the
    /// range, or `None` when the range starts at genesis.
    pub fn new(anchor_id: &'a str, predecessor: Option<&Record>) -> Self {
        let prev = predecessor.map(|p| Link {
            height: p.height,
            recomputed: p.recompute_hash().ok(),
        });
        Self { anchor_id, prev, checked: 0 }
    }

    pub fn records_checked(&self) -> u64 {
        self.checked
    }

    pub fn push(&mut self, record: &Record) -> Result<(), ChainBreak> {
        let brk = |reason| ChainBreak { at: record.id, height: record.height, reason };

        if record.anchor_id != self.anchor_id {
            return Err(brk(BreakReason::WrongAnchor));
        }

        let recomputed = record.recompute_hash().ok();
        match self.prev {
            None => {
                // Start of chain: only the genesis position is checked here; the
                // record's own content is vouched for by its successor's link.
                if record.height != 0 || !record.prev_hash.is_genesis() {
                    return Err(brk(BreakReason::NotGenesis));
                }
            }
            Some(prev) => {
                if record.height != prev.height + 1 {
                    return Err(brk(BreakReason::HeightGap));
                }
                if prev.recomputed != Some(record.prev_hash) {
                    return Err(brk(BreakReason::PrevHashMismatch));
                }
                if recomputed != Some(record.hash) {
                    return Err(brk(BreakReason::HashMismatch));
                }
            }
        }

        self.prev = Some(Link { height: record.height, recomputed });
        self.checked += 1;
        Ok(())
    }
}

/// Verifies an in-memory range.
pub fn verify_records<'r>(
    anchor_id: &str,
    predecessor: Option<&Record>,
    records: impl IntoIterator<Item = &'r Record>,
) -> VerificationResult {
    let mut walker = ChainWalker::new(anchor_id, predecessor);
    for record in records {
        if let Err(b) = walker.push(record) {
            return VerificationResult::broken(b, walker.records_checked());
        }
    }
    VerificationResult::valid(walker.records_checked())
}
