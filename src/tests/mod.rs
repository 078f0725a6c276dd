pub mod checkpoint_tests;
pub mod determinism_tests;

use crate::types::{IdGenerator, NewRecord, Record};

/// Builds an `n`-record chain on `anchor`, linking each record onto the previous.
pub fn build_chain(anchor: &str, n: usize) -> Vec<Record> {
    let ids = IdGenerator::new();
    let mut out: Vec<Record> = Vec::with_capacity(n);
    for i in 0..n {
        let tail = out.last().map(|r| (&r.hash, r.height));
        let new = NewRecord::new(anchor, "note", "test-producer", format!("payload-{i}").into_bytes());
        let record = new.seal(ids.next_id(), 1_700_000_000_000_000_000 + i as u64, tail).unwrap();
        out.push(record);
    }
    out
}
