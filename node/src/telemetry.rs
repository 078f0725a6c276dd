// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use sovereign_ledger::verifier::Classification;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

static PROM_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

pub const APPENDS_TOTAL: &str = "ledger_appends_total";
pub const APPEND_ERRORS_TOTAL: &str = "ledger_append_errors_total";
pub const APPEND_DURATION_SECONDS: &str = "ledger_append_duration_seconds";
pub const FALLBACK_TRANSITIONS_TOTAL: &str = "ledger_fallback_transitions_total";
pub const RECOVERIES_TOTAL: &str = "ledger_recoveries_total";
pub const ACTIVE_BACKEND_DURABLE: &str = "ledger_active_backend_durable";
pub const CHECKPOINTS_CREATED_TOTAL: &str = "ledger_checkpoints_created_total";
pub const PROOFS_GENERATED_TOTAL: &str = "ledger_proofs_generated_total";
pub const PROOF_VERIFICATIONS_TOTAL: &str = "ledger_proof_verifications_total";

/// Initialize telemetry (logs + metrics)
pub fn init_telemetry() {
    // 1. Initialize Tracing (Logs)
    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "sovereign_ledger_node=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .try_init();

    // 2. Initialize Metrics (Prometheus)
    match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => {
            if PROM_HANDLE.set(handle).is_err() {
                tracing::warn!("Prometheus handle already set. Telemetry re-initialized?");
            }
        }
        Err(e) => tracing::warn!("Prometheus recorder not installed: {}", e),
    }

    metrics::describe_counter!(APPENDS_TOTAL, "Records appended across all anchors");
    metrics::describe_counter!(APPEND_ERRORS_TOTAL, "Appends that returned an error to the caller");
    metrics::describe_histogram!(APPEND_DURATION_SECONDS, "Append latency including store I/O");
    metrics::describe_counter!(FALLBACK_TRANSITIONS_TOTAL, "Switches from the durable to the volatile store");
    metrics::describe_counter!(RECOVERIES_TOTAL, "Switches back to the durable store (no replay of degraded writes)");
    metrics::describe_gauge!(ACTIVE_BACKEND_DURABLE, "1 while the durable store is active, 0 while degraded");
    metrics::describe_counter!(CHECKPOINTS_CREATED_TOTAL, "Merkle checkpoints created");
    metrics::describe_counter!(PROOFS_GENERATED_TOTAL, "Sovereignty proofs generated");
    metrics::describe_counter!(PROOF_VERIFICATIONS_TOTAL, "Proof verifications by classification");
}

/// Get the Prometheus handle to render metrics
pub fn render_metrics() -> String {
    if let Some(handle) = PROM_HANDLE.get() {
        handle.render()
    } else {
        "# metrics not initialized".to_string()
    }
}

/// In-process mirror of every emitted metric.
///
/// Each `record_*` call forwards to the `metrics` facade (a no-op until a
/// recorder is installed) and bumps a local atomic that callers can read.
#[derive(Debug, Default)]
pub struct LedgerMetrics {
    appends: AtomicU64,
    append_errors: AtomicU64,
    fallback_transitions: AtomicU64,
    recoveries: AtomicU64,
    checkpoints: AtomicU64,
    proofs_generated: AtomicU64,
    verifications_fail_loud: AtomicU64,
    verifications_pass_limited: AtomicU64,
    durable_active: AtomicBool,
}

/// Point-in-time copy of [`LedgerMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub appends: u64,
    pub append_errors: u64,
    pub fallback_transitions: u64,
    pub recoveries: u64,
    pub checkpoints: u64,
    pub proofs_generated: u64,
    pub verifications_fail_loud: u64,
    pub verifications_pass_limited: u64,
    pub durable_active: bool,
}

impl LedgerMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_append(&self, elapsed: Duration) {
        self.appends.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(APPENDS_TOTAL, 1);
        metrics::histogram!(APPEND_DURATION_SECONDS, elapsed.as_secs_f64());
    }

    pub fn record_append_error(&self) {
        self.append_errors.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(APPEND_ERRORS_TOTAL, 1);
    }

    pub fn record_fallback(&self) {
        self.fallback_transitions.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(FALLBACK_TRANSITIONS_TOTAL, 1);
        self.set_durable_active(false);
    }

    pub fn record_recovery(&self) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(RECOVERIES_TOTAL, 1);
        self.set_durable_active(true);
    }

    pub fn set_durable_active(&self, active: bool) {
        self.durable_active.store(active, Ordering::Relaxed);
        metrics::gauge!(ACTIVE_BACKEND_DURABLE, if active { 1.0 } else { 0.0 });
    }

    pub fn record_checkpoint(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(CHECKPOINTS_CREATED_TOTAL, 1);
    }

    pub fn record_proof_generated(&self) {
        self.proofs_generated.fetch_add(1, Ordering::Relaxed);
        metrics::counter!(PROOFS_GENERATED_TOTAL, 1);
    }

    pub fn record_verification(&self, classification: Classification) {
        match classification {
            Classification::FailLoud => self.verifications_fail_loud.fetch_add(1, Ordering::Relaxed),
            Classification::PassLimited => self.verifications_pass_limited.fetch_add(1, Ordering::Relaxed),
        };
        metrics::counter!(PROOF_VERIFICATIONS_TOTAL, 1, "classification" => classification.as_str());
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            appends: self.appends.load(Ordering::Relaxed),
            append_errors: self.append_errors.load(Ordering::Relaxed),
            fallback_transitions: self.fallback_transitions.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),
            proofs_generated: self.proofs_generated.load(Ordering::Relaxed),
            verifications_fail_loud: self.verifications_fail_loud.load(Ordering::Relaxed),
            verifications_pass_limited: self.verifications_pass_limited.load(Ordering::Relaxed),
            durable_active: self.durable_active.load(Ordering::Relaxed),
        }
    }
}
