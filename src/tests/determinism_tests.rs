// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use crate::chain::verify_records;
use crate::hash::{GENESIS, SCHEMA_VERSION};
use crate::types::record::canonicalize;
use crate::types::{IdGenerator, NewRecord, Record, RecordId};
use std::vec::Vec;

/// A simple deterministic RNG for tests.
struct Pcg32 {
    state: u64,
    inc: u64,
}

impl Pcg32 {
    fn new(seed: u64) -> Self {
        Self { state: seed, inc: 1 }
    }

    fn next_u32(&mut self) -> u32 {
        let oldstate = self.state;
        self.state = oldstate.wrapping_mul(6364136223846793005).wrapping_add(self.inc);
        let xorshifted = (((oldstate >> 18) ^ oldstate) >> 27) as u32;
        let rot = (oldstate >> 59) as u32;
        xorshifted.rotate_right(rot)
    }
}

fn random_chain(seed: u64, len: usize) -> Vec<Record> {
    let mut rng = Pcg32::new(seed);
    let mut out: Vec<Record> = Vec::new();
    for i in 0..len {
        let size = (rng.next_u32() % 64) as usize;
        let payload: Vec<u8> = (0..size).map(|_| rng.next_u32() as u8).collect();
        let tail = out.last().map(|r| (&r.hash, r.height));
        // ids and timestamps derived from the seed, not the clock
        let record = NewRecord::new("seeded", "blob", "sim", payload)
            .seal(RecordId(i as u128 + 1), 1_000 + i as u64, tail)
            .unwrap();
        out.push(record);
    }
    out
}

#[test]
fn test_same_inputs_same_chain() {
    let a = random_chain(42, 50);
    let b = random_chain(42, 50);
    assert_eq!(a, b);
    assert_ne!(a.last().unwrap().hash, random_chain(43, 50).last().unwrap().hash);
}

#[test]
fn test_record_layout_is_fixed() {
    let r = NewRecord::new("A", "k", "p", vec![0xAA, 0xBB])
        .seal(RecordId(9), 0x0102, None)
        .unwrap();

    let mut expected = Vec::new();
    expected.extend_from_slice(&(26u64).to_le_bytes());
    expected.extend_from_slice(b"sovereign-ledger/record/v1");
    expected.extend_from_slice(&SCHEMA_VERSION.to_le_bytes());
    expected.extend_from_slice(&0u64.to_le_bytes()); // height
    expected.extend_from_slice(GENESIS.as_bytes());
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(b"A");
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(b"k");
    expected.extend_from_slice(&0x0102u64.to_le_bytes());
    expected.extend_from_slice(&1u32.to_le_bytes());
    expected.extend_from_slice(b"p");
    expected.extend_from_slice(&2u64.to_le_bytes());
    expected.extend_from_slice(&[0xAA, 0xBB]);

    assert_eq!(canonicalize(&r.fields()).unwrap(), expected);
}

#[test]
fn test_id_and_signature_are_not_hashed() {
    let base = NewRecord::new("A", "k", "p", vec![1]);
    let r1 = base.clone().seal(RecordId(1), 5, None).unwrap();
    let r2 = base.with_signature(vec![9; 64]).seal(RecordId(2), 5, None).unwrap();
    assert_eq!(r1.hash, r2.hash);
}

#[test]
fn test_every_hashed_field_changes_the_hash() {
    let r = random_chain(7, 3).pop().unwrap();
    let original = r.hash;

    let mut m = r.clone();
    m.kind.push('x');
    assert_ne!(m.recompute_hash().unwrap(), original);

    let mut m = r.clone();
    m.timestamp += 1;
    assert_ne!(m.recompute_hash().unwrap(), original);

    let mut m = r.clone();
    m.producer = "other".into();
    assert_ne!(m.recompute_hash().unwrap(), original);

    let mut m = r.clone();
    m.anchor_id = "elsewhere".into();
    assert_ne!(m.recompute_hash().unwrap(), original);

    let mut m = r.clone();
    m.height += 1;
    assert_ne!(m.recompute_hash().unwrap(), original);
}

#[test]
fn test_missing_required_field_is_malformed() {
    let r = NewRecord::new("A", "", "p", vec![]);
    assert_eq!(r.validate().unwrap_err().field, "kind");
    let err = r.seal(IdGenerator::new().next_id(), 0, None).unwrap_err();
    assert_eq!(err.field, "kind");
}

#[test]
fn test_seeded_tamper_positions() {
    let mut rng = Pcg32::new(1234);
    for _ in 0..20 {
        let mut chain = random_chain(99, 30);
        let pos = 1 + (rng.next_u32() as usize % 29);
        chain[pos].payload.push(0x00);
        let res = verify_records("seeded", None, &chain);
        assert_eq!(res.break_at, Some(chain[pos].id));
    }
}
