// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Ledger service: the single logical writer per anchor.
//!
//! Appends to one anchor pass through that anchor's async mutex, so at most
//! one compare-and-swap on its tail is in flight from this process. With
//! [`AppendDiscipline::Serialize`] later writers queue and link onto the new
//! tail; with [`AppendDiscipline::FailFast`] they get a retryable
//! `TailChanged` instead. Different anchors never contend.

use crate::checkpoint::CheckpointTrigger;
use crate::config::{AppendDiscipline, LedgerConfig};
use crate::errors::{LedgerError, Result, ValidationError};
use crate::store::{HeightRange, PendingAppend, RecordStream, StoreFactory};
use futures::TryStreamExt;
use sovereign_ledger::chain::{ChainWalker, VerificationResult};
use sovereign_ledger::types::unix_nanos;
use sovereign_ledger::{IdGenerator, NewRecord, Record, RecordId};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Inclusive id window over one anchor. `None` bounds mean genesis / tail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdRange {
    pub from: Option<RecordId>,
    pub to: Option<RecordId>,
}

impl IdRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn between(from: RecordId, to: RecordId) -> Self {
        Self { from: Some(from), to: Some(to) }
    }
}

type WriterMap = Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>;

pub struct LedgerService {
    factory: Arc<StoreFactory>,
    ids: IdGenerator,
    discipline: AppendDiscipline,
    writers: WriterMap,
    trigger: Option<Arc<CheckpointTrigger>>,
}

impl LedgerService {
    pub fn new(factory: Arc<StoreFactory>, config: &LedgerConfig) -> Self {
        Self {
            factory,
            ids: IdGenerator::new(),
            discipline: config.append_discipline,
            writers: Mutex::new(HashMap::new()),
            trigger: None,
        }
    }

    pub fn with_checkpoint_trigger(mut self, trigger: Arc<CheckpointTrigger>) -> Self {
        self.trigger = Some(trigger);
        self
    }

    pub fn factory(&self) -> &Arc<StoreFactory> {
        &self.factory
    }

    pub fn discipline(&self) -> AppendDiscipline {
        self.discipline
    }

    /// Validates, links onto the anchor's tail and commits `new`.
    pub async fn append(&self, new: NewRecord) -> Result<Record> {
        let anchor_id = new.anchor_id.clone();
        let res = self.append_inner(new).await;
        let metrics = self.factory.metrics();
        match &res {
            Ok(record) => {
                tracing::debug!("Appended {} at height {} on `{}`", record.id, record.height, anchor_id);
                if let Some(trigger) = &self.trigger {
                    trigger.observe(&anchor_id);
                }
            }
            Err(e) => {
                metrics.record_append_error();
                match e {
                    LedgerError::Availability { .. } => tracing::error!("Append on `{}` failed on every store: {}", anchor_id, e),
                    _ => tracing::debug!("Append on `{}` rejected: {}", anchor_id, e),
                }
            }
        }
        res
    }

    async fn append_inner(&self, new: NewRecord) -> Result<Record> {
        new.validate().map_err(ValidationError::from)?;
        let slot = WriterSlot {
            writers: &self.writers,
            anchor_id: new.anchor_id.clone(),
            writer: self.writer(&new.anchor_id),
        };
        let writer = Arc::clone(&slot.writer);
        // Declared after `slot`, so the turn is released before the slot is.
        let _turn = match self.discipline {
            AppendDiscipline::Serialize => writer.lock_owned().await,
            AppendDiscipline::FailFast => writer.try_lock_owned().map_err(|_| LedgerError::TailChanged {
                anchor_id: new.anchor_id.clone(),
                actual: None,
            })?,
        };

        let started = Instant::now();
        let pending = PendingAppend { record: new, id: self.ids.next_id(), timestamp: unix_nanos() };
        let record = self.factory.append(pending).await?;
        self.factory.metrics().record_append(started.elapsed());
        Ok(record)
    }

    /// [`append`](Self::append) that gives up with `Cancelled` once `cancel`
    /// fires. A store commit is atomic, so a cancelled append either landed
    /// whole or not at all.
    pub async fn append_with_cancel(&self, new: NewRecord, cancel: &CancellationToken) -> Result<Record> {
        cancellable(cancel, self.append(new)).await
    }

    pub async fn tail(&self, anchor_id: &str) -> Result<Option<Record>> {
        self.factory.tail(anchor_id).await
    }

    pub async fn get(&self, anchor_id: &str, id: RecordId) -> Result<Option<Record>> {
        self.factory.get(anchor_id, id).await
    }

    /// Lazy, restartable read of `range` in chain order.
    pub async fn read_range(&self, anchor_id: &str, range: IdRange) -> Result<RecordStream> {
        let heights = self.resolve(anchor_id, range).await?;
        let (_, stream) = self.factory.read_range(anchor_id, heights);
        Ok(stream)
    }

    /// Walks `range` and reports the first break. An empty range is valid.
    ///
    /// A range starting mid-chain is linked against its stored predecessor.
    pub async fn verify_chain(&self, anchor_id: &str, range: IdRange) -> Result<VerificationResult> {
        let heights = self.resolve(anchor_id, range).await?;
        if heights.to.is_some_and(|to| to < heights.from) {
            return Ok(VerificationResult::valid(0));
        }
        let predecessor = match heights.from.checked_sub(1) {
            Some(h) => self.factory.record_at(anchor_id, h).await?,
            None => None,
        };

        let (active, mut records) = self.factory.read_range(anchor_id, heights);
        let mut walker = ChainWalker::new(anchor_id, predecessor.as_ref());
        loop {
            match records.try_next().await {
                Ok(Some(record)) => {
                    if let Err(b) = walker.push(&record) {
                        tracing::error!(
                            "Chain break on `{}` at {} (height {}): {}",
                            anchor_id,
                            b.at,
                            b.height,
                            b.reason.as_str()
                        );
                        return Ok(VerificationResult::broken(b, walker.records_checked()));
                    }
                }
                Ok(None) => return Ok(VerificationResult::valid(walker.records_checked())),
                Err(e) => {
                    self.factory.note_failure(&active, &e);
                    return Err(LedgerError::from_store(anchor_id, e));
                }
            }
        }
    }

    pub async fn verify_chain_with_cancel(
        &self,
        anchor_id: &str,
        range: IdRange,
        cancel: &CancellationToken,
    ) -> Result<VerificationResult> {
        cancellable(cancel, self.verify_chain(anchor_id, range)).await
    }

    /// Like [`verify_chain`](Self::verify_chain), but a break is an `Integrity` error.
    pub async fn ensure_chain(&self, anchor_id: &str, range: IdRange) -> Result<u64> {
        let res = self.verify_chain(anchor_id, range).await?;
        if res.ok {
            Ok(res.records_checked)
        } else {
            Err(LedgerError::Integrity {
                anchor_id: anchor_id.to_string(),
                break_at: res.break_at,
                reason: res.reason.map_or("unknown", |r| r.as_str()).to_string(),
            })
        }
    }

    async fn resolve(&self, anchor_id: &str, range: IdRange) -> Result<HeightRange> {
        let from = match range.from {
            Some(id) => self.height_of(anchor_id, id).await?,
            None => 0,
        };
        let to = match range.to {
            Some(id) => Some(self.height_of(anchor_id, id).await?),
            None => None,
        };
        Ok(HeightRange { from, to })
    }

    async fn height_of(&self, anchor_id: &str, id: RecordId) -> Result<u64> {
        self.factory
            .get(anchor_id, id)
            .await?
            .map(|r| r.height)
            .ok_or_else(|| ValidationError::UnknownRecord { anchor_id: anchor_id.to_string(), id }.into())
    }

    fn writer(&self, anchor_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        // A poisoned map still holds valid mutexes.
        let mut writers = self.writers.lock().unwrap_or_else(|p| p.into_inner());
        Arc::clone(writers.entry(anchor_id.to_string()).or_default())
    }
}

/// Holds an anchor's writer for one append. The anchor's entry leaves the
/// map once no append holds or waits on it.
struct WriterSlot<'a> {
    writers: &'a WriterMap,
    anchor_id: String,
    writer: Arc<tokio::sync::Mutex<()>>,
}

impl Drop for WriterSlot<'_> {
    fn drop(&mut self) {
        let mut writers = self.writers.lock().unwrap_or_else(|p| p.into_inner());
        // Two references left: the map's and this slot's.
        let idle = writers
            .get(&self.anchor_id)
            .is_some_and(|w| Arc::ptr_eq(w, &self.writer) && Arc::strong_count(w) == 2);
        if idle {
            writers.remove(&self.anchor_id);
        }
    }
}

async fn cancellable<T>(cancel: &CancellationToken, op: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(LedgerError::Cancelled),
        res = op => res,
    }
}
