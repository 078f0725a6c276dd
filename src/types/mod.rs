// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod id;
pub mod record;

pub use id::{unix_millis, unix_nanos, IdGenerator, RecordId};
pub use record::{ChainExpectation, NewRecord, Record, RecordFields};
