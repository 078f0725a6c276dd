// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
mod common;

use common::durable_config;
use rusqlite::Connection;
use sovereign_ledger::{IdGenerator, NewRecord};
use sovereign_ledger_node::config::{BackendKind, LedgerConfig};
use sovereign_ledger_node::store::{DurableStore, LedgerStore, PendingAppend, StoreFactory};
use sovereign_ledger_node::telemetry::LedgerMetrics;
use sovereign_ledger_node::{IdRange, LedgerError, LedgerService, StoreError};
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tempfile::tempdir;
use tokio_util::sync::CancellationToken;

fn event(n: u32) -> NewRecord {
    NewRecord::new("A", "event", "integration", n.to_be_bytes().to_vec())
}

fn config(path: &Path, op_timeout_ms: u64) -> LedgerConfig {
    LedgerConfig { op_timeout_ms, ..durable_config(path) }
}

async fn service(cfg: &LedgerConfig) -> (Arc<LedgerService>, Arc<LedgerMetrics>) {
    let metrics = Arc::new(LedgerMetrics::new());
    let factory = StoreFactory::from_config(cfg, metrics.clone()).await.unwrap();
    assert_eq!(factory.active_kind(), BackendKind::Durable);
    (Arc::new(LedgerService::new(Arc::new(factory), cfg)), metrics)
}

/// Takes the database write lock from a second connection.
fn hold_write_lock(path: &Path) -> Connection {
    let holder = Connection::open(path).unwrap();
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();
    holder
}

#[tokio::test]
async fn test_cancelled_append_leaves_the_chain_unchanged() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let cfg = config(&path, 300);
    let (svc, metrics) = service(&cfg).await;

    for n in 0..3 {
        svc.append(event(n)).await.unwrap();
    }
    let before = svc.tail("A").await.unwrap().unwrap();

    // The append blocks on the lock until the token fires.
    let holder = hold_write_lock(&path);
    let cancel = CancellationToken::new();
    let trip = {
        let cancel = cancel.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        }
    };
    let (res, ()) = tokio::join!(svc.append_with_cancel(event(3), &cancel), trip);
    assert!(matches!(res, Err(LedgerError::Cancelled)), "{res:?}");

    // Outlast the abandoned statement's busy wait before letting go.
    tokio::time::sleep(Duration::from_millis(800)).await;
    holder.execute_batch("ROLLBACK;").unwrap();
    drop(holder);

    let factory = svc.factory();
    assert_eq!(factory.active_kind(), BackendKind::Durable);
    assert_eq!(metrics.snapshot().fallback_transitions, 0);
    assert!(factory.volatile().tail("A").await.unwrap().is_none());

    let after = svc.tail("A").await.unwrap().unwrap();
    assert_eq!(after.id, before.id);
    assert_eq!(svc.ensure_chain("A", IdRange::all()).await.unwrap(), 3);

    let next = svc.append(event(4)).await.unwrap();
    assert_eq!(next.height, 3);
    assert_eq!(next.prev_hash, before.hash);
    assert!(svc.verify_chain("A", IdRange::all()).await.unwrap().ok);
}

#[tokio::test]
async fn test_held_lock_times_out_and_the_factory_falls_back() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ledger.db");
    let cfg = config(&path, 200);
    let (svc, metrics) = service(&cfg).await;

    for n in 0..3 {
        svc.append(event(n)).await.unwrap();
    }
    let before = svc.tail("A").await.unwrap().unwrap();

    let holder = hold_write_lock(&path);

    let store = DurableStore::from_config(&cfg).unwrap();
    let ids = IdGenerator::new();
    let pending = PendingAppend { record: event(3), id: ids.next_id(), timestamp: 1_700_000_000_000_000_000 };
    let started = Instant::now();
    let err = store.append(pending).await.unwrap_err();
    assert!(matches!(err, StoreError::Timeout(d) if d == Duration::from_millis(200)), "{err:?}");
    assert!(started.elapsed() >= Duration::from_millis(200));

    // Through the factory the same stall is an in-flight failure.
    let degraded = svc.append(event(4)).await.unwrap();
    assert_eq!(degraded.height, 0);
    let factory = svc.factory();
    assert!(factory.is_degraded());
    assert_eq!(metrics.snapshot().fallback_transitions, 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    holder.execute_batch("ROLLBACK;").unwrap();
    drop(holder);

    // Neither timed-out append reached the database.
    assert_eq!(store.tail("A").await.unwrap().unwrap().id, before.id);

    assert!(factory.probe_once().await);
    assert_eq!(factory.active_kind(), BackendKind::Durable);
    let resumed = svc.append(event(5)).await.unwrap();
    assert_eq!(resumed.height, 3);
    assert_eq!(resumed.prev_hash, before.hash);
}
