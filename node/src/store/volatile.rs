// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use super::{link, HeightRange, LedgerStore, PendingAppend, RecordStream, READ_PAGE_SIZE};
use crate::config::BackendKind;
use crate::errors::StoreError;
use async_trait::async_trait;
use futures::stream::{self, StreamExt, TryStreamExt};
use sovereign_ledger::checkpoint::{Checkpoint, CheckpointDraft};
use sovereign_ledger::{Record, RecordId};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};

#[derive(Debug, Default)]
struct Chain {
    records: Vec<Record>,
    by_id: HashMap<RecordId, usize>,
}

#[derive(Debug, Default)]
struct State {
    chains: BTreeMap<String, Chain>,
    checkpoints: Vec<Checkpoint>,
}

/// In-process store used as the degraded-mode fallback.
///
/// Records are held per anchor in chain order. Nothing survives a restart.
#[derive(Debug, Default)]
pub struct VolatileStore {
    state: RwLock<State>,
}

impl VolatileStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(&self, f: impl FnOnce(&State) -> T) -> Result<T, StoreError> {
        let guard = self
            .state
            .read()
            .map_err(|_| StoreError::Unavailable("volatile store lock poisoned".into()))?;
        Ok(f(&guard))
    }

    fn write<T>(&self, f: impl FnOnce(&mut State) -> Result<T, StoreError>) -> Result<T, StoreError> {
        let mut guard = self
            .state
            .write()
            .map_err(|_| StoreError::Unavailable("volatile store lock poisoned".into()))?;
        f(&mut guard)
    }

    fn page(&self, anchor_id: &str, from: u64, to: Option<u64>) -> Result<Vec<Record>, StoreError> {
        self.read(|s| {
            let Some(chain) = s.chains.get(anchor_id) else {
                return Vec::new();
            };
            let start = from.min(chain.records.len() as u64) as usize;
            chain.records[start..]
                .iter()
                .take_while(|r| to.map_or(true, |to| r.height <= to))
                .take(READ_PAGE_SIZE)
                .cloned()
                .collect()
        })
    }

    /// Replaces a stored record in place. Only for exercising integrity checks.
    #[cfg(test)]
    pub(crate) fn overwrite(&self, record: Record) {
        let mut s = self.state.write().unwrap();
        let chain = s.chains.get_mut(&record.anchor_id).unwrap();
        let idx = chain.by_id[&record.id];
        chain.records[idx] = record;
    }
}

#[async_trait]
impl LedgerStore for VolatileStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Volatile
    }

    async fn append(&self, pending: PendingAppend) -> Result<Record, StoreError> {
        self.write(|s| {
            let chain = s.chains.entry(pending.record.anchor_id.clone()).or_default();
            let record = link(pending, chain.records.last())?;
            chain.by_id.insert(record.id, chain.records.len());
            chain.records.push(record.clone());
            Ok(record)
        })
    }

    async fn tail(&self, anchor_id: &str) -> Result<Option<Record>, StoreError> {
        self.read(|s| s.chains.get(anchor_id).and_then(|c| c.records.last().cloned()))
    }

    async fn get(&self, anchor_id: &str, id: RecordId) -> Result<Option<Record>, StoreError> {
        self.read(|s| {
            s.chains
                .get(anchor_id)
                .and_then(|c| c.by_id.get(&id).map(|&i| c.records[i].clone()))
        })
    }

    async fn record_at(&self, anchor_id: &str, height: u64) -> Result<Option<Record>, StoreError> {
        self.read(|s| {
            s.chains
                .get(anchor_id)
                .and_then(|c| c.records.get(height as usize).cloned())
        })
    }

    fn read_range(self: Arc<Self>, anchor_id: String, range: HeightRange) -> RecordStream {
        // Each page takes the read lock briefly, so appends proceed between pages.
        stream::try_unfold(Some(range.from), move |next| {
            let store = Arc::clone(&self);
            let anchor_id = anchor_id.clone();
            async move {
                let Some(from) = next else {
                    return Ok::<_, StoreError>(None);
                };
                let page = store.page(&anchor_id, from, range.to)?;
                if page.is_empty() {
                    return Ok(None);
                }
                let next = (page.len() == READ_PAGE_SIZE).then(|| from + READ_PAGE_SIZE as u64);
                Ok(Some((stream::iter(page.into_iter().map(Ok)), next)))
            }
        })
        .try_flatten()
        .boxed()
    }

    async fn append_checkpoint(&self, draft: CheckpointDraft) -> Result<Checkpoint, StoreError> {
        self.write(|s| {
            let sequence = s.checkpoints.last().map_or(1, |c| c.sequence + 1);
            let checkpoint = draft.seal(sequence);
            s.checkpoints.push(checkpoint.clone());
            Ok(checkpoint)
        })
    }

    async fn latest_checkpoint(&self, anchor_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        self.read(|s| s.checkpoints.iter().rev().find(|c| c.anchor_id == anchor_id).cloned())
    }

    async fn anchors(&self) -> Result<Vec<String>, StoreError> {
        self.read(|s| s.chains.keys().cloned().collect())
    }

    async fn health(&self) -> bool {
        self.state.read().is_ok()
    }
}
