// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
#![allow(dead_code)]

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use sovereign_ledger::checkpoint::{Checkpoint, CheckpointDraft};
use sovereign_ledger::{Record, RecordId};
use sovereign_ledger_node::config::{BackendKind, LedgerConfig};
use sovereign_ledger_node::store::{HeightRange, LedgerStore, PendingAppend, RecordStream, StoreFactory, VolatileStore};
use sovereign_ledger_node::telemetry::LedgerMetrics;
use sovereign_ledger_node::{LedgerService, StoreError};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// A store in the durable role that can be switched off from the test.
pub struct FlakyStore {
    pub inner: Arc<VolatileStore>,
    down: AtomicBool,
    pub calls: AtomicU64,
}

impl FlakyStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: Arc::new(VolatileStore::new()), down: AtomicBool::new(false), calls: AtomicU64::new(0) })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Timeout(Duration::from_millis(5)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LedgerStore for FlakyStore {
    fn kind(&self) -> BackendKind {
        BackendKind::Durable
    }

    async fn append(&self, pending: PendingAppend) -> Result<Record, StoreError> {
        // Let other tasks run so the failure lands while the append is in flight.
        tokio::task::yield_now().await;
        self.check()?;
        self.inner.append(pending).await
    }

    async fn tail(&self, anchor_id: &str) -> Result<Option<Record>, StoreError> {
        self.check()?;
        self.inner.tail(anchor_id).await
    }

    async fn get(&self, anchor_id: &str, id: RecordId) -> Result<Option<Record>, StoreError> {
        self.check()?;
        self.inner.get(anchor_id, id).await
    }

    async fn record_at(&self, anchor_id: &str, height: u64) -> Result<Option<Record>, StoreError> {
        self.check()?;
        self.inner.record_at(anchor_id, height).await
    }

    fn read_range(self: Arc<Self>, anchor_id: String, range: HeightRange) -> RecordStream {
        match self.check() {
            Ok(()) => Arc::clone(&self.inner).read_range(anchor_id, range),
            Err(e) => stream::once(async move { Err(e) }).boxed(),
        }
    }

    async fn append_checkpoint(&self, draft: CheckpointDraft) -> Result<Checkpoint, StoreError> {
        self.check()?;
        self.inner.append_checkpoint(draft).await
    }

    async fn latest_checkpoint(&self, anchor_id: &str) -> Result<Option<Checkpoint>, StoreError> {
        self.check()?;
        self.inner.latest_checkpoint(anchor_id).await
    }

    async fn anchors(&self) -> Result<Vec<String>, StoreError> {
        self.check()?;
        self.inner.anchors().await
    }

    async fn health(&self) -> bool {
        self.check().is_ok()
    }
}

pub fn durable_config(path: &Path) -> LedgerConfig {
    LedgerConfig {
        backend: BackendKind::Durable,
        durable_url: Some(format!("sqlite://{}", path.display())),
        ..LedgerConfig::default()
    }
}

pub async fn durable_service(path: &Path) -> (Arc<LedgerService>, Arc<LedgerMetrics>) {
    let cfg = durable_config(path);
    let metrics = Arc::new(LedgerMetrics::new());
    let factory = StoreFactory::from_config(&cfg, metrics.clone()).await.unwrap();
    assert_eq!(factory.active_kind(), BackendKind::Durable);
    (Arc::new(LedgerService::new(Arc::new(factory), &cfg)), metrics)
}

pub async fn flaky_service(cfg: &LedgerConfig) -> (Arc<LedgerService>, Arc<FlakyStore>, Arc<LedgerMetrics>) {
    let flaky = FlakyStore::new();
    let metrics = Arc::new(LedgerMetrics::new());
    let factory = StoreFactory::new(
        cfg,
        Some(flaky.clone() as Arc<dyn LedgerStore>),
        Arc::new(VolatileStore::new()),
        metrics.clone(),
    )
    .await;
    (Arc::new(LedgerService::new(Arc::new(factory), cfg)), flaky, metrics)
}
