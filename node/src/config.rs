// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use serde::{Deserialize, Serialize};
use sovereign_ledger::proof::default_required_sections;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Durable,
    Volatile,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Durable => "durable",
            BackendKind::Volatile => "volatile",
        }
    }
}

/// How concurrent `Any` appends to one anchor are handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppendDiscipline {
    /// Queue behind the current writer and link onto its result.
    Serialize,
    /// Return a retryable `TailChanged` if another writer holds the anchor.
    FailFast,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Config parse error: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    pub backend: BackendKind,
    /// SQLite file path, optionally prefixed with `sqlite://`.
    pub durable_url: Option<String>,
    pub pool_size: usize,
    pub op_timeout_ms: u64,
    pub health_timeout_ms: u64,
    /// Count trigger for checkpoints (records appended since the last one).
    pub checkpoint_every: u64,
    /// Time trigger for checkpoints.
    pub checkpoint_interval_secs: u64,
    /// Consecutive health/read failures before switching to the volatile store.
    pub fallback_failure_threshold: u32,
    pub health_probe_interval_secs: u64,
    pub append_discipline: AppendDiscipline,
    pub producer: String,
    pub required_sections: Vec<String>,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Volatile,
            durable_url: None,
            pool_size: 4,
            op_timeout_ms: 2_000,
            health_timeout_ms: 500,
            checkpoint_every: 1_000,
            checkpoint_interval_secs: 300,
            fallback_failure_threshold: 3,
            health_probe_interval_secs: 10,
            append_discipline: AppendDiscipline::Serialize,
            producer: "sovereign-ledger".to_string(),
            required_sections: default_required_sections(),
        }
    }
}

impl LedgerConfig {
    /// Defaults overridden by `LEDGER_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Reads a JSON document; missing keys keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        let cfg: LedgerConfig = serde_json::from_slice(&bytes)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub(crate) fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = LedgerConfig::default();

        if let Some(v) = get("LEDGER_BACKEND") {
            cfg.backend = match v.to_ascii_lowercase().as_str() {
                "durable" => BackendKind::Durable,
                "volatile" => BackendKind::Volatile,
                other => return Err(invalid("LEDGER_BACKEND", format!("unknown backend `{other}`"))),
            };
        }
        if let Some(v) = get("LEDGER_DURABLE_URL") {
            cfg.durable_url = Some(v);
        }
        if let Some(v) = get("LEDGER_APPEND_DISCIPLINE") {
            cfg.append_discipline = match v.to_ascii_lowercase().as_str() {
                "serialize" => AppendDiscipline::Serialize,
                "fail_fast" => AppendDiscipline::FailFast,
                other => return Err(invalid("LEDGER_APPEND_DISCIPLINE", format!("unknown discipline `{other}`"))),
            };
        }
        if let Some(v) = get("LEDGER_PRODUCER") {
            cfg.producer = v;
        }
        if let Some(v) = get("LEDGER_REQUIRED_SECTIONS") {
            cfg.required_sections = v.split(',').map(str::trim).filter(|s| !s.is_empty()).map(String::from).collect();
        }
        parse_into(&get, "LEDGER_POOL_SIZE", &mut cfg.pool_size)?;
        parse_into(&get, "LEDGER_OP_TIMEOUT_MS", &mut cfg.op_timeout_ms)?;
        parse_into(&get, "LEDGER_HEALTH_TIMEOUT_MS", &mut cfg.health_timeout_ms)?;
        parse_into(&get, "LEDGER_CHECKPOINT_EVERY", &mut cfg.checkpoint_every)?;
        parse_into(&get, "LEDGER_CHECKPOINT_INTERVAL_SECS", &mut cfg.checkpoint_interval_secs)?;
        parse_into(&get, "LEDGER_FALLBACK_FAILURE_THRESHOLD", &mut cfg.fallback_failure_threshold)?;
        parse_into(&get, "LEDGER_HEALTH_PROBE_INTERVAL_SECS", &mut cfg.health_probe_interval_secs)?;

        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pool_size == 0 {
            return Err(invalid("pool_size", "must be at least 1".into()));
        }
        if self.op_timeout_ms == 0 || self.health_timeout_ms == 0 {
            return Err(invalid("op_timeout_ms", "timeouts must be non-zero".into()));
        }
        if self.fallback_failure_threshold == 0 {
            return Err(invalid("fallback_failure_threshold", "must be at least 1".into()));
        }
        if self.health_probe_interval_secs == 0 {
            return Err(invalid("health_probe_interval_secs", "must be non-zero".into()));
        }
        if self.backend == BackendKind::Durable && self.durable_path().is_none() {
            return Err(invalid("durable_url", "required when backend = durable".into()));
        }
        if self.producer.is_empty() {
            return Err(invalid("producer", "must not be empty".into()));
        }
        Ok(())
    }

    pub fn durable_path(&self) -> Option<PathBuf> {
        let url = self.durable_url.as_deref()?.trim();
        let path = url.strip_prefix("sqlite://").unwrap_or(url);
        (!path.is_empty()).then(|| PathBuf::from(path))
    }

    pub fn op_timeout(&self) -> Duration {
        Duration::from_millis(self.op_timeout_ms)
    }

    pub fn health_timeout(&self) -> Duration {
        Duration::from_millis(self.health_timeout_ms)
    }

    pub fn checkpoint_interval(&self) -> Option<Duration> {
        (self.checkpoint_interval_secs > 0).then(|| Duration::from_secs(self.checkpoint_interval_secs))
    }

    pub fn health_probe_interval(&self) -> Duration {
        Duration::from_secs(self.health_probe_interval_secs)
    }
}

fn invalid(key: &'static str, reason: String) -> ConfigError {
    ConfigError::Invalid { key, reason }
}

fn parse_into<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    slot: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = get(key) {
        *slot = raw.trim().parse().map_err(|_| invalid(key, format!("cannot parse `{raw}`")))?;
    }
    Ok(())
}
