// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Store Factory
//!
//! Owns the active-store reference and is the only thing that swaps it.
//!
//! # Policy
//! - durable append fails for availability reasons: switch to volatile at once,
//!   retry the append there
//! - durable health/read failures: switch once `fallback_failure_threshold`
//!   consecutive failures have been seen
//! - while degraded: everything is served from volatile; a prober re-checks
//!   durable health and switches back when it answers
//! - on recovery, records written while degraded stay in volatile and are
//!   **not** replayed into durable
//!
//! Readers load the reference lock-free (`ArcSwap`); transitions are
//! compare-and-swap, so concurrent failures count as one transition.

use super::{DurableStore, HeightRange, LedgerStore, PendingAppend, RecordStream, VolatileStore};
use crate::config::{BackendKind, LedgerConfig};
use crate::errors::{LedgerError, StoreError};
use crate::telemetry::LedgerMetrics;
use arc_swap::ArcSwap;
use sovereign_ledger::checkpoint::{Checkpoint, CheckpointDraft};
use sovereign_ledger::{Record, RecordId};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// The backend currently serving requests.
pub struct ActiveStore {
    pub kind: BackendKind,
    pub store: Arc<dyn LedgerStore>,
}

impl std::fmt::Debug for ActiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActiveStore").field("kind", &self.kind).finish()
    }
}

pub struct StoreFactory {
    active: ArcSwap<ActiveStore>,
    durable: Option<Arc<dyn LedgerStore>>,
    volatile: Arc<VolatileStore>,
    consecutive_failures: AtomicU32,
    failure_threshold: u32,
    health_timeout: Duration,
    metrics: Arc<LedgerMetrics>,
}

impl StoreFactory {
    /// Builds the configured backend. A durable backend that does not answer
    /// its first health check starts the factory degraded instead of failing.
    pub async fn from_config(config: &LedgerConfig, metrics: Arc<LedgerMetrics>) -> Result<Self, StoreError> {
        let durable: Option<Arc<dyn LedgerStore>> = match config.backend {
            BackendKind::Durable => Some(Arc::new(DurableStore::from_config(config)?)),
            BackendKind::Volatile => None,
        };
        Ok(Self::new(config, durable, Arc::new(VolatileStore::new()), metrics).await)
    }

    /// `durable` is any store playing the durable role; `None` runs volatile-only.
    pub async fn new(
        config: &LedgerConfig,
        durable: Option<Arc<dyn LedgerStore>>,
        volatile: Arc<VolatileStore>,
        metrics: Arc<LedgerMetrics>,
    ) -> Self {
        let volatile_active = || ActiveStore {
            kind: BackendKind::Volatile,
            store: volatile.clone() as Arc<dyn LedgerStore>,
        };

        let initial = match &durable {
            Some(store) => {
                let healthy = tokio::time::timeout(config.health_timeout(), store.health())
                    .await
                    .unwrap_or(false);
                if healthy {
                    tracing::info!("Ledger store: durable");
                    ActiveStore { kind: BackendKind::Durable, store: Arc::clone(store) }
                } else {
                    tracing::error!("Durable store unreachable at startup; starting degraded on the volatile store");
                    metrics.record_fallback();
                    volatile_active()
                }
            }
            None => {
                tracing::info!("Ledger store: volatile (records do not survive restart)");
                volatile_active()
            }
        };
        metrics.set_durable_active(initial.kind == BackendKind::Durable);

        Self {
            active: ArcSwap::from_pointee(initial),
            durable,
            volatile,
            consecutive_failures: AtomicU32::new(0),
            failure_threshold: config.fallback_failure_threshold,
            health_timeout: config.health_timeout(),
            metrics,
        }
    }

    pub fn active(&self) -> Arc<ActiveStore> {
        self.active.load_full()
    }

    pub fn active_kind(&self) -> BackendKind {
        self.active.load().kind
    }

    /// True while a configured durable backend is not the active one.
    pub fn is_degraded(&self) -> bool {
        self.durable.is_some() && self.active_kind() == BackendKind::Volatile
    }

    pub fn volatile(&self) -> &Arc<VolatileStore> {
        &self.volatile
    }

    pub fn metrics(&self) -> &Arc<LedgerMetrics> {
        &self.metrics
    }

    /// Appends on the active store. A durable availability failure switches to
    /// volatile and retries there; only a failure on both reaches the caller.
    pub async fn append(&self, pending: PendingAppend) -> Result<Record, LedgerError> {
        let anchor_id = pending.record.anchor_id.clone();
        let active = self.active();
        let retry = (active.kind == BackendKind::Durable).then(|| pending.clone());

        match active.store.append(pending).await {
            Ok(record) => {
                self.note_success(&active);
                Ok(record)
            }
            Err(e) if e.is_availability() && active.kind == BackendKind::Durable => {
                tracing::warn!(anchor_id = %anchor_id, error = %e, "Durable append failed; falling back");
                self.fall_back(&active, &e);
                let Some(pending) = retry else {
                    return Err(LedgerError::from_store(&anchor_id, e));
                };
                self.volatile.append(pending).await.map_err(|ve| {
                    if ve.is_availability() {
                        LedgerError::Availability { durable: e.to_string(), volatile: ve.to_string() }
                    } else {
                        LedgerError::from_store(&anchor_id, ve)
                    }
                })
            }
            Err(e) => Err(LedgerError::from_store(&anchor_id, e)),
        }
    }

    pub async fn tail(&self, anchor_id: &str) -> Result<Option<Record>, LedgerError> {
        let active = self.active();
        match active.store.tail(anchor_id).await {
            Ok(v) => self.ok(&active, v),
            Err(e) if self.note_failure(&active, &e) => self.volatile.tail(anchor_id).await.map_err(|e| lift(anchor_id, e)),
            Err(e) => Err(lift(anchor_id, e)),
        }
    }

    pub async fn get(&self, anchor_id: &str, id: RecordId) -> Result<Option<Record>, LedgerError> {
        let active = self.active();
        match active.store.get(anchor_id, id).await {
            Ok(v) => self.ok(&active, v),
            Err(e) if self.note_failure(&active, &e) => self.volatile.get(anchor_id, id).await.map_err(|e| lift(anchor_id, e)),
            Err(e) => Err(lift(anchor_id, e)),
        }
    }

    pub async fn record_at(&self, anchor_id: &str, height: u64) -> Result<Option<Record>, LedgerError> {
        let active = self.active();
        match active.store.record_at(anchor_id, height).await {
            Ok(v) => self.ok(&active, v),
            Err(e) if self.note_failure(&active, &e) => {
                self.volatile.record_at(anchor_id, height).await.map_err(|e| lift(anchor_id, e))
            }
            Err(e) => Err(lift(anchor_id, e)),
        }
    }

    /// Lazy range read on the store active right now. The stream stays bound
    /// to that store even if the factory switches while it is consumed.
    pub fn read_range(&self, anchor_id: &str, range: HeightRange) -> (Arc<ActiveStore>, RecordStream) {
        let active = self.active();
        let stream = Arc::clone(&active.store).read_range(anchor_id.to_string(), range);
        (active, stream)
    }

    pub async fn append_checkpoint(&self, draft: CheckpointDraft) -> Result<Checkpoint, LedgerError> {
        let anchor_id = draft.anchor_id.clone();
        let active = self.active();
        match active.store.append_checkpoint(draft.clone()).await {
            Ok(v) => self.ok(&active, v),
            Err(e) if self.note_failure(&active, &e) => {
                self.volatile.append_checkpoint(draft).await.map_err(|e| lift(&anchor_id, e))
            }
            Err(e) => Err(lift(&anchor_id, e)),
        }
    }

    pub async fn latest_checkpoint(&self, anchor_id: &str) -> Result<Option<Checkpoint>, LedgerError> {
        let active = self.active();
        match active.store.latest_checkpoint(anchor_id).await {
            Ok(v) => self.ok(&active, v),
            Err(e) if self.note_failure(&active, &e) => {
                self.volatile.latest_checkpoint(anchor_id).await.map_err(|e| lift(anchor_id, e))
            }
            Err(e) => Err(lift(anchor_id, e)),
        }
    }

    pub async fn anchors(&self) -> Result<Vec<String>, LedgerError> {
        let active = self.active();
        match active.store.anchors().await {
            Ok(v) => self.ok(&active, v),
            Err(e) if self.note_failure(&active, &e) => self.volatile.anchors().await.map_err(|e| lift("", e)),
            Err(e) => Err(lift("", e)),
        }
    }

    /// Health of the active store, bounded by the health timeout.
    pub async fn health(&self) -> bool {
        let active = self.active();
        tokio::time::timeout(self.health_timeout, active.store.health())
            .await
            .unwrap_or(false)
    }

    /// Counts an availability failure against `from`. Returns true when this
    /// call switched the factory to volatile (the caller may retry there).
    pub fn note_failure(&self, from: &Arc<ActiveStore>, err: &StoreError) -> bool {
        if from.kind != BackendKind::Durable || !err.is_availability() {
            return false;
        }
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!(failures, threshold = self.failure_threshold, error = %err, "Durable store failure");
        if failures >= self.failure_threshold {
            self.fall_back(from, err);
            return true;
        }
        false
    }

    /// One probe of the durable backend.
    ///
    /// While active, failures count toward the threshold. While degraded, a
    /// healthy answer switches new traffic back to durable.
    pub async fn probe_once(&self) -> bool {
        let Some(durable) = &self.durable else {
            return false;
        };
        let healthy = tokio::time::timeout(self.health_timeout, durable.health())
            .await
            .unwrap_or(false);

        let active = self.active();
        match (active.kind, healthy) {
            (BackendKind::Durable, true) => self.note_success(&active),
            (BackendKind::Durable, false) => {
                self.note_failure(&active, &StoreError::Unavailable("health probe failed".into()));
            }
            (BackendKind::Volatile, true) => self.recover(&active, durable),
            (BackendKind::Volatile, false) => {}
        }
        healthy
    }

    /// Probes every `interval` until cancelled.
    pub async fn run_health_prober(self: Arc<Self>, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Health prober stopped");
                    return;
                }
                _ = ticker.tick() => {
                    self.probe_once().await;
                }
            }
        }
    }

    fn ok<T>(&self, active: &Arc<ActiveStore>, v: T) -> Result<T, LedgerError> {
        self.note_success(active);
        Ok(v)
    }

    fn note_success(&self, active: &Arc<ActiveStore>) {
        if active.kind == BackendKind::Durable {
            self.consecutive_failures.store(0, Ordering::Release);
        }
    }

    fn fall_back(&self, from: &Arc<ActiveStore>, reason: &StoreError) {
        if from.kind != BackendKind::Durable {
            return;
        }
        let next = Arc::new(ActiveStore {
            kind: BackendKind::Volatile,
            store: self.volatile.clone() as Arc<dyn LedgerStore>,
        });
        let prev = self.active.compare_and_swap(from, next);
        if Arc::ptr_eq(&*prev, from) {
            self.consecutive_failures.store(0, Ordering::Release);
            self.metrics.record_fallback();
            tracing::error!(
                error = %reason,
                "Durable store unavailable; serving from the volatile store (writes are not durable)"
            );
        }
    }

    fn recover(&self, from: &Arc<ActiveStore>, durable: &Arc<dyn LedgerStore>) {
        let next = Arc::new(ActiveStore { kind: BackendKind::Durable, store: Arc::clone(durable) });
        let prev = self.active.compare_and_swap(from, next);
        if Arc::ptr_eq(&*prev, from) {
            self.consecutive_failures.store(0, Ordering::Release);
            self.metrics.record_recovery();
            tracing::warn!("Durable store recovered; records written while degraded are not replayed");
        }
    }
}

fn lift(anchor_id: &str, e: StoreError) -> LedgerError {
    LedgerError::from_store(anchor_id, e)
}
