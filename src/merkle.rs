// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Merkle Tree over record hashes.
//!
//! - Leaves are record hashes, in chain order, used as-is
//! - Internal node = BLAKE3(left || right)
//! - An odd node at any level is promoted unchanged (no duplicate padding)
//!
//! Duplicating the last leaf would make `[a, b, c]` and `[a, b, c, c]` share a
//! root; promotion keeps the root a function of the exact leaf count.

use crate::canonical::EMPTY_AUDIT_TAG;
use crate::hash::{Digest, hash_bytes, hash_pair};
use serde::{Deserialize, Serialize};

/// Root of the empty tree. Distinct from every real root, so "zero records" is detectable.
pub fn empty_root() -> Digest {
    hash_bytes(EMPTY_AUDIT_TAG)
}

/// Computes the Merkle root of `leaves`.
pub fn merkle_root(leaves: &[Digest]) -> Digest {
    if leaves.is_empty() {
        return empty_root();
    }
    let mut level = leaves.to_vec();
    while level.len() > 1 {
        level = next_level(&level);
    }
    level[0]
}

fn next_level(level: &[Digest]) -> Vec<Digest> {
    level
        .chunks(2)
        .map(|pair| match pair {
            [l, r] => hash_pair(l, r),
            [odd] => *odd,
            _ => unreachable!("chunks(2) yields one or two items"),
        })
        .collect()
}

/// Incremental root builder for streamed leaves.
///
/// Keeps at most one pending node per level (O(log n) memory), and produces the
/// same root as [`merkle_root`] on the collected leaves.
#[derive(Debug, Default, Clone)]
pub struct MerkleBuilder {
    // stack[i] holds a complete subtree of 2^i leaves waiting for a right sibling.
    stack: Vec<Option<Digest>>,
    leaves: u64,
}

impl MerkleBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, leaf: Digest) {
        self.leaves += 1;
        let mut carry = leaf;
        for slot in self.stack.iter_mut() {
            match slot.take() {
                Some(left) => carry = hash_pair(&left, &carry),
                None => {
                    *slot = Some(carry);
                    return;
                }
            }
        }
        self.stack.push(Some(carry));
    }

    pub fn leaf_count(&self) -> u64 {
        self.leaves
    }

    pub fn finish(self) -> Digest {
        if self.leaves == 0 {
            return empty_root();
        }
        // Pending subtrees, smallest first. Combining them right-to-left reproduces
        // level-by-level promotion of the odd node.
        let mut acc: Option<Digest> = None;
        for node in self.stack.into_iter().flatten() {
            acc = Some(match acc {
                None => node,
                Some(right) => hash_pair(&node, &right),
            });
        }
        acc.unwrap_or_else(empty_root)
    }
}

/// Which side the sibling sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofStep {
    pub sibling: Digest,
    pub side: Side,
}

/// Inclusion proof of one record hash in a checkpointed range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    pub index: u64,
    pub leaf: Digest,
    pub path: Vec<ProofStep>,
    pub root: Digest,
}

/// Builds the inclusion proof for `leaves[index]`.
pub fn inclusion_proof(leaves: &[Digest], index: usize) -> Option<InclusionProof> {
    if index >= leaves.len() {
        return None;
    }
    let mut level = leaves.to_vec();
    let mut pos = index;
    let mut path = Vec::new();
    while level.len() > 1 {
        if pos % 2 == 0 {
            if pos + 1 < level.len() {
                path.push(ProofStep { sibling: level[pos + 1], side: Side::Right });
            }
            // promoted: no step at this level
        } else {
            path.push(ProofStep { sibling: level[pos - 1], side: Side::Left });
        }
        level = next_level(&level);
        pos /= 2;
    }
    Some(InclusionProof {
        index: index as u64,
        leaf: leaves[index],
        path,
        root: level[0],
    })
}

pub fn verify_inclusion(proof: &InclusionProof) -> bool {
    let mut acc = proof.leaf;
    for step in &proof.path {
        acc = match step.side {
            Side::Left => hash_pair(&step.sibling, &acc),
            Side::Right => hash_pair(&acc, &step.sibling),
        };
    }
    acc == proof.root
}
