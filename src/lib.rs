// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.

//! sovereign-ledger: canonical hashing, hash-chained records, Merkle checkpoints
//! and sovereignty proofs. Pure and synchronous; storage lives in the node crate.

pub mod error;
pub mod hash;
pub mod canonical;
pub mod types;
pub mod merkle;
pub mod chain;
pub mod checkpoint;
pub mod proof;
pub mod verifier;
pub mod codec;

pub use hash::{Digest, GENESIS, SCHEMA_VERSION};
pub use types::{ChainExpectation, IdGenerator, NewRecord, Record, RecordId};

#[cfg(test)]
pub mod tests;
