// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use common::durable_service;
use serde_json::{json, Value};
use sovereign_ledger::hash::{hash_bytes, Digest};
use sovereign_ledger::merkle::merkle_root;
use sovereign_ledger::proof::{AuditSource, StructuralSection};
use sovereign_ledger::verifier::{Classification, ReasonCode, VerifierPolicy};
use sovereign_ledger::NewRecord;
use sovereign_ledger_node::checkpoint::CheckpointManager;
use sovereign_ledger_node::config::LedgerConfig;
use sovereign_ledger_node::proof::{PeerVerifier, ProofGenerator};
use sovereign_ledger_node::IdRange;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn sections() -> BTreeMap<String, StructuralSection> {
    let mut s = BTreeMap::new();
    s.insert("ontology".into(), StructuralSection::Embedded(json!({"entities": ["agent", "operator"], "version": 3})));
    s.insert("refusal_boundaries".into(), StructuralSection::Embedded(json!(["no_self_modification"])));
    s.insert("authority_surface".into(), StructuralSection::Digest(hash_bytes(b"authority surface v2")));
    s
}

fn stored_hashes(path: &Path, anchor: &str) -> Vec<Digest> {
    let conn = rusqlite::Connection::open(path).unwrap();
    let mut stmt = conn.prepare("SELECT hash FROM ledger_records WHERE anchor_id = ?1 ORDER BY height").unwrap();
    let rows = stmt.query_map([anchor], |row| row.get::<_, Vec<u8>>(0)).unwrap();
    let hashes = rows.map(|r| Digest::from_slice(&r.unwrap()).unwrap()).collect();
    hashes
}

#[tokio::test]
async fn test_checkpoint_root_matches_stored_records() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let (svc, metrics) = durable_service(&path).await;
    let mut records = Vec::new();
    for i in 0..13u8 {
        records.push(svc.append(NewRecord::new("A", "event", "it", vec![i])).await.unwrap());
    }

    let manager = CheckpointManager::new(svc.factory().clone());
    let cp = manager.create_checkpoint("A").await.unwrap();
    assert_eq!(cp.record_count, 13);
    assert_eq!(cp.record_range.start_id, records[0].id);
    assert_eq!(cp.record_range.end_id, records[12].id);
    assert!(cp.is_sealed());
    assert_eq!(cp.merkle_root, merkle_root(&stored_hashes(&path, "A")));
    assert!(manager.verify_checkpoint(&cp).await.unwrap());
    assert_eq!(metrics.snapshot().checkpoints, 1);

    // Later appends do not disturb a sealed checkpoint.
    svc.append(NewRecord::new("A", "event", "it", vec![99])).await.unwrap();
    assert!(manager.verify_checkpoint(&cp).await.unwrap());
    let next = manager.create_checkpoint("A").await.unwrap();
    assert!(next.sequence > cp.sequence);
    assert_eq!(next.record_count, 14);

    let latest = svc.factory().latest_checkpoint("A").await.unwrap().unwrap();
    assert_eq!(latest, next);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_checkpoint_under_concurrent_appends_is_self_consistent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let (svc, _) = durable_service(&path).await;
    for i in 0..20u8 {
        svc.append(NewRecord::new("A", "event", "it", vec![i])).await.unwrap();
    }

    let writer = {
        let svc = svc.clone();
        tokio::spawn(async move {
            for i in 20..60u8 {
                svc.append(NewRecord::new("A", "event", "it", vec![i])).await.unwrap();
            }
        })
    };
    let manager = CheckpointManager::new(svc.factory().clone());
    let cp = manager.create_checkpoint("A").await.unwrap();
    writer.await.unwrap();

    assert!(cp.record_count >= 20);
    let hashes = stored_hashes(&path, "A");
    assert_eq!(hashes.len(), 60);
    assert_eq!(cp.merkle_root, merkle_root(&hashes[..cp.record_count as usize]));
    assert!(manager.verify_checkpoint(&cp).await.unwrap());
    assert!(svc.verify_chain("A", IdRange::all()).await.unwrap().ok);
}

#[tokio::test]
async fn test_proof_reuses_covering_checkpoint() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let (svc, metrics) = durable_service(&path).await;
    for i in 0..7u8 {
        svc.append(NewRecord::new("agent-7", "decision", "it", vec![i])).await.unwrap();
    }

    let generator = ProofGenerator::new(svc.factory().clone(), LedgerConfig::default().required_sections);
    let walked = generator.generate_proof("agent-7", b"ontology descriptor", sections()).await.unwrap();
    assert_eq!(walked.audit_source, AuditSource::FullWalk);
    assert_eq!(walked.audit_log_digest, merkle_root(&stored_hashes(&path, "agent-7")));
    assert_eq!(walked.ontology_hash, hash_bytes(b"ontology descriptor"));

    let cp = CheckpointManager::new(svc.factory().clone()).create_checkpoint("agent-7").await.unwrap();
    let reused = generator.generate_proof("agent-7", b"ontology descriptor", sections()).await.unwrap();
    assert_eq!(reused.audit_source, AuditSource::Checkpoint { sequence: cp.sequence });
    assert_eq!(reused.audit_log_digest, walked.audit_log_digest);
    assert_eq!(reused.audit_record_count, 7);
    assert_eq!(metrics.snapshot().proofs_generated, 2);
}

#[tokio::test]
async fn test_peer_verification_of_honest_and_forged_proofs() {
    let dir = tempdir().unwrap();
    let (svc, metrics) = durable_service(&dir.path().join("ledger.db")).await;
    for i in 0..3u8 {
        svc.append(NewRecord::new("agent-1", "decision", "it", vec![i])).await.unwrap();
    }
    let generator = ProofGenerator::new(svc.factory().clone(), LedgerConfig::default().required_sections);
    let proof = generator.generate_proof("agent-1", b"ontology", sections()).await.unwrap();
    let wire = proof.to_json_pretty().unwrap();

    let peer = PeerVerifier::new(VerifierPolicy::default(), metrics.clone());
    let honest = peer.verify_json(wire.as_bytes());
    assert_eq!(honest.classification, Classification::PassLimited);
    assert!(honest.reasons.iter().all(|r| r.code.is_limitation()));

    let doc: Value = serde_json::from_str(&wire).unwrap();

    let mut placeholder = doc.clone();
    placeholder["proof_hash"] = json!("PLACEHOLDER");
    let verdict = peer.verify_json(placeholder.to_string().as_bytes());
    assert_eq!(verdict.classification, Classification::FailLoud);
    assert!(verdict.has(ReasonCode::HashMismatch));

    let mut inflated = doc.clone();
    inflated["audit_record_count"] = json!(3000);
    assert!(peer.verify_json(inflated.to_string().as_bytes()).has(ReasonCode::HashMismatch));

    let mut stripped = doc.clone();
    stripped["structural_sections"].as_object_mut().unwrap().remove("refusal_boundaries");
    let verdict = peer.verify_json(stripped.to_string().as_bytes());
    assert!(verdict.is_fail_loud());
    assert!(verdict.has(ReasonCode::MissingSection));

    assert!(peer.verify_json(b"not json").is_fail_loud());

    let snap = metrics.snapshot();
    assert_eq!((snap.verifications_pass_limited, snap.verifications_fail_loud), (1, 4));
}

#[tokio::test]
async fn test_checkpoint_sweep_covers_every_stale_anchor() {
    let dir = tempdir().unwrap();
    let (svc, _) = durable_service(&dir.path().join("ledger.db")).await;
    for anchor in ["a", "b", "c"] {
        svc.append(NewRecord::new(anchor, "event", "it", b"x".to_vec())).await.unwrap();
    }
    let manager = Arc::new(CheckpointManager::new(svc.factory().clone()));
    manager.create_checkpoint("b").await.unwrap();

    let swept = manager.checkpoint_stale_anchors().await;
    let mut anchors: Vec<_> = swept.iter().map(|(a, res)| (a.clone(), res.is_ok())).collect();
    anchors.sort();
    assert_eq!(anchors, vec![("a".to_string(), true), ("c".to_string(), true)]);
    assert!(manager.checkpoint_stale_anchors().await.is_empty());
}
