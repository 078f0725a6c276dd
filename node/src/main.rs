// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use sovereign_ledger_node::checkpoint::{CheckpointManager, CheckpointTrigger};
use sovereign_ledger_node::config::LedgerConfig;
use sovereign_ledger_node::ledger::LedgerService;
use sovereign_ledger_node::store::StoreFactory;
use sovereign_ledger_node::telemetry::{self, LedgerMetrics};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() {
    telemetry::init_telemetry();

    let cfg = match std::env::var("LEDGER_CONFIG") {
        Ok(path) => LedgerConfig::from_json_file(&path),
        Err(_) => LedgerConfig::from_env(),
    };
    let cfg = match cfg {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(2);
        }
    };
    tracing::info!("Starting ledger with config: {:?}", cfg);

    let metrics = Arc::new(LedgerMetrics::new());
    let factory = match StoreFactory::from_config(&cfg, metrics.clone()).await {
        Ok(factory) => Arc::new(factory),
        Err(e) => {
            tracing::error!("Failed to build store: {}", e);
            std::process::exit(1);
        }
    };

    let cancel = CancellationToken::new();
    let (trigger, due) = CheckpointTrigger::channel(cfg.checkpoint_every, 64);
    let trigger = Arc::new(trigger);
    let ledger = Arc::new(LedgerService::new(factory.clone(), &cfg).with_checkpoint_trigger(trigger.clone()));
    let checkpoints = Arc::new(CheckpointManager::new(factory.clone()).with_trigger(trigger));

    let prober = tokio::spawn(factory.clone().run_health_prober(cfg.health_probe_interval(), cancel.clone()));
    let scheduler = tokio::spawn(checkpoints.run_scheduler(due, cfg.checkpoint_interval(), cancel.clone()));

    tracing::info!(
        "Ledger ready on the {} store ({:?} appends)",
        factory.active_kind().as_str(),
        ledger.discipline()
    );

    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Cannot listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutting down");
    cancel.cancel();
    let _ = tokio::join!(prober, scheduler);

    let snap = metrics.snapshot();
    tracing::info!(
        "Final counters: appends={} errors={} fallbacks={} recoveries={} checkpoints={}",
        snap.appends,
        snap.append_errors,
        snap.fallback_transitions,
        snap.recoveries,
        snap.checkpoints
    );
    tracing::debug!("Metrics at shutdown:\n{}", telemetry::render_metrics());
}
