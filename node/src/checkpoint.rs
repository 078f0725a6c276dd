// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Checkpoint Manager
//!
//! `create_checkpoint` captures the current tail first, then walks and hashes
//! exactly genesis..=tail. Appends landing after the capture are outside the
//! closed range, so the root does not depend on write timing.
//!
//! Cadence: every `checkpoint_every` appends on an anchor (count trigger fed by
//! the ledger service) or every `checkpoint_interval_secs`, whichever first.

use crate::errors::{LedgerError, Result, ValidationError};
use crate::store::{HeightRange, StoreFactory};
use futures::TryStreamExt;
use sovereign_ledger::chain::ChainWalker;
use sovereign_ledger::checkpoint::{self, Checkpoint, CheckpointDraft, RecordRange};
use sovereign_ledger::merkle::MerkleBuilder;
use sovereign_ledger::types::unix_millis;
use sovereign_ledger::{Digest, Record, RecordId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Result of walking and hashing a closed range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RangeDigest {
    pub first: RecordId,
    pub last: RecordId,
    pub count: u64,
    pub root: Digest,
}

/// Walks genesis..=`tail`, verifying every link and every stored hash, and
/// folds the record hashes into a Merkle root.
pub(crate) async fn digest_through(factory: &StoreFactory, tail: &Record) -> Result<RangeDigest> {
    let anchor_id = tail.anchor_id.as_str();
    let (active, mut records) = factory.read_range(anchor_id, HeightRange::through(tail.height));
    let mut walker = ChainWalker::new(anchor_id, None);
    let mut builder = MerkleBuilder::new();
    let mut first = None;
    let mut last = None;

    loop {
        let record = match records.try_next().await {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) => {
                factory.note_failure(&active, &e);
                return Err(LedgerError::from_store(anchor_id, e));
            }
        };
        walker.push(&record).map_err(|b| integrity(anchor_id, Some(b.at), b.reason.as_str()))?;
        if !record.verify_hash() {
            return Err(integrity(anchor_id, Some(record.id), "hash_mismatch"));
        }
        builder.push(record.hash);
        first.get_or_insert(record.id);
        last = Some(record.id);
    }

    match (first, last) {
        (Some(first), Some(last)) if last == tail.id && builder.leaf_count() == tail.height + 1 => Ok(RangeDigest {
            first,
            last,
            count: builder.leaf_count(),
            root: builder.finish(),
        }),
        _ => Err(integrity(anchor_id, last, "range ended before the captured tail")),
    }
}

fn integrity(anchor_id: &str, break_at: Option<RecordId>, reason: &str) -> LedgerError {
    LedgerError::Integrity {
        anchor_id: anchor_id.to_string(),
        break_at,
        reason: reason.to_string(),
    }
}

pub struct CheckpointManager {
    factory: Arc<StoreFactory>,
    trigger: Option<Arc<CheckpointTrigger>>,
}

impl CheckpointManager {
    pub fn new(factory: Arc<StoreFactory>) -> Self {
        Self { factory, trigger: None }
    }

    /// Restarts `trigger`'s count for an anchor whenever a checkpoint lands on it.
    pub fn with_trigger(mut self, trigger: Arc<CheckpointTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub async fn create_checkpoint(&self, anchor_id: &str) -> Result<Checkpoint> {
        let tail = self
            .factory
            .tail(anchor_id)
            .await?
            .ok_or_else(|| ValidationError::EmptyAnchor { anchor_id: anchor_id.to_string() })?;

        let digest = digest_through(&self.factory, &tail).await?;
        let draft = CheckpointDraft {
            anchor_id: anchor_id.to_string(),
            record_range: RecordRange { start_id: digest.first, end_id: digest.last },
            record_count: digest.count,
            merkle_root: digest.root,
            created_at: unix_millis(),
        };
        let cp = self.factory.append_checkpoint(draft).await?;
        self.factory.metrics().record_checkpoint();
        if let Some(trigger) = &self.trigger {
            trigger.reset(anchor_id);
        }
        tracing::info!(
            "Checkpoint {} on `{}`: {} records, root {}",
            cp.sequence,
            anchor_id,
            cp.record_count,
            cp.merkle_root
        );
        Ok(cp)
    }

    /// Recomputes `cp`'s root from the records currently stored in its range.
    pub async fn verify_checkpoint(&self, cp: &Checkpoint) -> Result<bool> {
        let anchor_id = cp.anchor_id.as_str();
        let Some(start) = self.factory.get(anchor_id, cp.record_range.start_id).await? else {
            return Ok(false);
        };
        let Some(end) = self.factory.get(anchor_id, cp.record_range.end_id).await? else {
            return Ok(false);
        };
        if end.height < start.height {
            return Ok(false);
        }

        let (active, stream) = self.factory.read_range(
            anchor_id,
            HeightRange { from: start.height, to: Some(end.height) },
        );
        let records: Vec<Record> = match stream.try_collect().await {
            Ok(records) => records,
            Err(e) => {
                self.factory.note_failure(&active, &e);
                return Err(LedgerError::from_store(anchor_id, e));
            }
        };
        Ok(checkpoint::verify_checkpoint(cp, &records))
    }

    /// Checkpoints every anchor whose tail moved past its latest checkpoint.
    pub async fn checkpoint_stale_anchors(&self) -> Vec<(String, Result<Checkpoint>)> {
        let anchors = match self.factory.anchors().await {
            Ok(anchors) => anchors,
            Err(e) => {
                tracing::warn!("Checkpoint sweep: cannot list anchors: {}", e);
                return Vec::new();
            }
        };

        let mut out = Vec::new();
        for anchor_id in anchors {
            let tail = match self.factory.tail(&anchor_id).await {
                Ok(Some(tail)) => tail,
                Ok(None) => continue,
                Err(e) => {
                    out.push((anchor_id, Err(e)));
                    continue;
                }
            };
            let covered = matches!(
                self.factory.latest_checkpoint(&anchor_id).await,
                Ok(Some(cp)) if cp.record_range.end_id == tail.id
            );
            if !covered {
                let res = self.create_checkpoint(&anchor_id).await;
                out.push((anchor_id, res));
            }
        }
        out
    }

    /// Runs the cadence until cancelled: count triggers arrive on `due`, the
    /// time trigger fires every `interval` (if any).
    pub async fn run_scheduler(
        self: Arc<Self>,
        mut due: mpsc::Receiver<String>,
        interval: Option<Duration>,
        cancel: CancellationToken,
    ) {
        let mut ticker = interval.map(|every| {
            let mut t = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
            t.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            t
        });

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Checkpoint scheduler stopped");
                    return;
                }
                Some(anchor_id) = due.recv() => {
                    if let Err(e) = self.create_checkpoint(&anchor_id).await {
                        log_failure(&anchor_id, &e);
                    }
                }
                _ = next_tick(&mut ticker) => {
                    for (anchor_id, res) in self.checkpoint_stale_anchors().await {
                        if let Err(e) = res {
                            log_failure(&anchor_id, &e);
                        }
                    }
                }
            }
        }
    }
}

async fn next_tick(ticker: &mut Option<tokio::time::Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

fn log_failure(anchor_id: &str, e: &LedgerError) {
    match e {
        LedgerError::Integrity { .. } => tracing::error!("Checkpoint on `{}` refused: {}", anchor_id, e),
        _ => tracing::warn!("Checkpoint on `{}` failed: {}", anchor_id, e),
    }
}

/// Count trigger. The ledger service calls [`observe`](Self::observe) after
/// every committed append. Only anchors with appends since their last
/// checkpoint hold an entry.
#[derive(Debug)]
pub struct CheckpointTrigger {
    every: u64,
    since_last: Mutex<HashMap<String, u64>>,
    tx: mpsc::Sender<String>,
}

impl CheckpointTrigger {
    /// `every = 0` disables the count trigger.
    pub fn channel(every: u64, capacity: usize) -> (Self, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { every, since_last: Mutex::new(HashMap::new()), tx }, rx)
    }

    pub fn observe(&self, anchor_id: &str) {
        if self.every == 0 {
            return;
        }
        let due = match self.since_last.lock() {
            Ok(mut counts) => {
                let n = counts.entry(anchor_id.to_string()).or_insert(0);
                *n += 1;
                let due = *n >= self.every;
                if due {
                    counts.remove(anchor_id);
                }
                due
            }
            Err(_) => false,
        };
        if due && self.tx.try_send(anchor_id.to_string()).is_err() {
            // Scheduler busy or gone; the time trigger still covers this anchor.
            tracing::debug!("Checkpoint trigger for `{}` dropped", anchor_id);
        }
    }

    pub fn reset(&self, anchor_id: &str) {
        if let Ok(mut counts) = self.since_last.lock() {
            counts.remove(anchor_id);
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.since_last.lock().map_or(0, |c| c.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LedgerConfig;
    use crate::store::{PendingAppend, VolatileStore};
    use crate::telemetry::LedgerMetrics;
    use sovereign_ledger::merkle::merkle_root;
    use sovereign_ledger::{IdGenerator, NewRecord};

    async fn factory_with(n: usize) -> (Arc<StoreFactory>, Vec<Record>) {
        let factory = Arc::new(
            StoreFactory::new(
                &LedgerConfig::default(),
                None,
                Arc::new(VolatileStore::new()),
                Arc::new(LedgerMetrics::new()),
            )
            .await,
        );
        let ids = IdGenerator::new();
        let mut out = Vec::new();
        for i in 0..n {
            let pending = PendingAppend {
                record: NewRecord::new("A", "note", "p", format!("r{i}").into_bytes()),
                id: ids.next_id(),
                timestamp: i as u64,
            };
            out.push(factory.append(pending).await.unwrap());
        }
        (factory, out)
    }

    #[tokio::test]
    async fn test_create_and_verify_checkpoint() {
        let (factory, records) = factory_with(5).await;
        let mgr = CheckpointManager::new(factory.clone());
        let cp = mgr.create_checkpoint("A").await.unwrap();

        assert_eq!(cp.sequence, 1);
        assert_eq!(cp.record_count, 5);
        assert_eq!(cp.record_range.start_id, records[0].id);
        assert_eq!(cp.record_range.end_id, records[4].id);
        let leaves: Vec<Digest> = records.iter().map(|r| r.hash).collect();
        assert_eq!(cp.merkle_root, merkle_root(&leaves));
        assert!(mgr.verify_checkpoint(&cp).await.unwrap());
        assert_eq!(factory.metrics().snapshot().checkpoints, 1);
    }

    #[tokio::test]
    async fn test_empty_anchor_is_validation_error() {
        let (factory, _) = factory_with(0).await;
        let err = CheckpointManager::new(factory).create_checkpoint("A").await.unwrap_err();
        assert!(matches!(err, LedgerError::Validation(ValidationError::EmptyAnchor { .. })));
    }

    #[tokio::test]
    async fn test_tampered_record_refuses_checkpoint_and_fails_verification() {
        let (factory, records) = factory_with(3).await;
        let mgr = CheckpointManager::new(factory.clone());
        let cp = mgr.create_checkpoint("A").await.unwrap();

        let mut forged = records[2].clone();
        forged.payload = b"forged".to_vec();
        factory.volatile().overwrite(forged);

        assert!(!mgr.verify_checkpoint(&cp).await.unwrap());
        let err = mgr.create_checkpoint("A").await.unwrap_err();
        match err {
            LedgerError::Integrity { break_at, .. } => assert_eq!(break_at, Some(records[2].id)),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_sweep_only_touches_moved_anchors() {
        let (factory, _) = factory_with(2).await;
        let mgr = CheckpointManager::new(factory.clone());
        let first = mgr.checkpoint_stale_anchors().await;
        assert_eq!(first.len(), 1);
        assert!(first[0].1.is_ok());
        assert!(mgr.checkpoint_stale_anchors().await.is_empty());
    }

    #[tokio::test]
    async fn test_trigger_fires_every_n() {
        let (trigger, mut rx) = CheckpointTrigger::channel(3, 8);
        for _ in 0..7 {
            trigger.observe("A");
        }
        trigger.observe("B");
        assert_eq!(rx.try_recv().unwrap(), "A");
        assert_eq!(rx.try_recv().unwrap(), "A");
        assert!(rx.try_recv().is_err());
        // "A" has one pending append, "B" one.
        assert_eq!(trigger.tracked(), 2);
    }

    #[tokio::test]
    async fn test_trigger_forgets_anchors_once_checkpointed() {
        let (trigger, _rx) = CheckpointTrigger::channel(2, 1024);
        for i in 0..500 {
            let anchor = format!("anchor-{i}");
            trigger.observe(&anchor);
            trigger.observe(&anchor);
        }
        assert_eq!(trigger.tracked(), 0);

        let (factory, _) = factory_with(3).await;
        let trigger = Arc::new(trigger);
        trigger.observe("A");
        assert_eq!(trigger.tracked(), 1);
        let mgr = CheckpointManager::new(factory).with_trigger(trigger.clone());
        mgr.create_checkpoint("A").await.unwrap();
        assert_eq!(trigger.tracked(), 0);
    }

    #[tokio::test]
    async fn test_scheduler_checkpoints_on_trigger_and_stops_on_cancel() {
        let (factory, _) = factory_with(4).await;
        let mgr = Arc::new(CheckpointManager::new(factory.clone()));
        let (trigger, rx) = CheckpointTrigger::channel(1, 4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(mgr.clone().run_scheduler(rx, None, cancel.clone()));

        trigger.observe("A");
        for _ in 0..100 {
            if factory.metrics().snapshot().checkpoints == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(factory.metrics().snapshot().checkpoints, 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), task).await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduler_checkpoints_on_interval_below_record_count() {
        let (factory, records) = factory_with(3).await;
        let mgr = Arc::new(CheckpointManager::new(factory.clone()));
        let (trigger, rx) = CheckpointTrigger::channel(1000, 4);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(mgr.clone().run_scheduler(rx, Some(Duration::from_secs(60)), cancel.clone()));

        trigger.observe("A");
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.metrics().snapshot().checkpoints, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        for _ in 0..100 {
            if factory.metrics().snapshot().checkpoints == 1 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(factory.metrics().snapshot().checkpoints, 1);
        let cp = factory.latest_checkpoint("A").await.unwrap().unwrap();
        assert_eq!(cp.record_count, 3);
        assert_eq!(cp.record_range.end_id, records[2].id);

        cancel.cancel();
        task.await.unwrap();
    }
}
