// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! sovereign-ledger-node: the async ledger service.
//!
//! Storage (durable SQLite with a volatile fallback), the per-anchor writer,
//! checkpoints on a cadence, and proof generation/verification.

pub mod config;
pub mod errors;
pub mod telemetry;
pub mod store;
pub mod ledger;
pub mod checkpoint;
pub mod proof;

pub use config::{AppendDiscipline, BackendKind, LedgerConfig};
pub use errors::{ErrorClass, LedgerError, StoreError, ValidationError};
pub use ledger::{IdRange, LedgerService};
pub use store::{LedgerStore, StoreFactory};
