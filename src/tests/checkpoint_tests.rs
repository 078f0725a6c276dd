// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::checkpoint::{verify_checkpoint, CheckpointDraft, RecordRange};
use crate::merkle::merkle_root;
use crate::tests::build_chain;
use crate::types::Record;

fn draft_over(records: &[Record]) -> CheckpointDraft {
    let leaves: Vec<_> = records.iter().map(|r| r.hash).collect();
    CheckpointDraft {
        anchor_id: records[0].anchor_id.clone(),
        record_range: RecordRange {
            start_id: records[0].id,
            end_id: records[records.len() - 1].id,
        },
        record_count: records.len() as u64,
        merkle_root: merkle_root(&leaves),
        created_at: 1_700_000_000_000,
    }
}

#[test]
fn test_checkpoint_roundtrip() {
    let chain = build_chain("A", 9);
    let cp = draft_over(&chain).seal(1);
    assert!(cp.is_sealed());
    assert!(verify_checkpoint(&cp, &chain));
}

#[test]
fn test_checkpoint_excludes_later_records() {
    let chain = build_chain("A", 9);
    let cp = draft_over(&chain[..5]).seal(1);
    assert!(verify_checkpoint(&cp, &chain[..5]));
    assert!(!verify_checkpoint(&cp, &chain));
}

#[test]
fn test_checkpoint_detects_content_tamper() {
    let mut chain = build_chain("A", 4);
    let cp = draft_over(&chain).seal(7);
    chain[2].kind = "forged".into();
    assert!(!verify_checkpoint(&cp, &chain));
}

#[test]
fn test_checkpoint_hash_seals_fields() {
    let chain = build_chain("A", 4);
    let mut cp = draft_over(&chain).seal(3);
    cp.record_count += 1;
    assert!(!cp.is_sealed());
    assert!(!verify_checkpoint(&cp, &chain));
}
