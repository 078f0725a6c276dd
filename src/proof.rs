// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Sovereignty Proofs
//!
//! A self-contained, disposable document describing one instance's structural
//! state: a digest of its audit log, the hash of its declared ontology, and the
//! declared structural sections. Proofs are exchanged and verified, never stored
//! as ledger truth.
//!
//! `proof_hash` is computed last, over the canonical encoding of every other
//! field, so independent verifiers on any platform compute the same value.

use crate::canonical::{CanonicalWriter, PROOF_TAG};
use crate::error::{CanonicalError, IncompleteProofError};
use crate::hash::{Digest, SCHEMA_VERSION};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use thiserror::Error;

/// Section names every proof must declare unless a policy says otherwise.
pub const DEFAULT_REQUIRED_SECTIONS: [&str; 3] = ["ontology", "refusal_boundaries", "authority_surface"];

pub fn default_required_sections() -> Vec<String> {
    DEFAULT_REQUIRED_SECTIONS.iter().map(|s| s.to_string()).collect()
}

/// One declared section: either a digest of an external document or the document itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuralSection {
    Digest(Digest),
    Embedded(Value),
}

impl StructuralSection {
    /// Empty sections are a validation failure, never an implicit pass.
    pub fn is_empty(&self) -> bool {
        match self {
            StructuralSection::Digest(d) => d.is_genesis(),
            StructuralSection::Embedded(v) => match v {
                Value::Null => true,
                Value::String(s) => s.trim().is_empty(),
                Value::Array(a) => a.is_empty(),
                Value::Object(o) => o.is_empty(),
                Value::Bool(_) | Value::Number(_) => false,
            },
        }
    }
}

/// How `audit_log_digest` was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum AuditSource {
    /// Reused the root of a checkpoint that covers the whole chain.
    Checkpoint { sequence: u64 },
    /// Walked and hashed every record.
    FullWalk,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SovereigntyProof {
    pub schema_version: u32,
    pub anchor_id: String,
    pub audit_log_digest: Digest,
    pub audit_record_count: u64,
    pub audit_source: AuditSource,
    pub ontology_hash: Digest,
    #[serde(default)]
    pub structural_sections: BTreeMap<String, StructuralSection>,
    /// Milliseconds since the Unix epoch.
    pub generated_at: u64,
    pub proof_hash: Digest,
}

/// Inputs to [`SovereigntyProof::assemble`].
#[derive(Debug, Clone)]
pub struct ProofParts {
    pub anchor_id: String,
    pub audit_log_digest: Digest,
    pub audit_record_count: u64,
    pub audit_source: AuditSource,
    pub ontology_hash: Digest,
    pub structural_sections: BTreeMap<String, StructuralSection>,
    pub generated_at: u64,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProofError {
    #[error(transparent)]
    Incomplete(#[from] IncompleteProofError),
    #[error("section `{section}` cannot be canonicalized: {source}")]
    Canonical {
        section: String,
        #[source]
        source: CanonicalError,
    },
}

impl SovereigntyProof {
    /// Builds a sealed proof, refusing to emit one with a required section missing or empty.
    pub fn assemble(parts: ProofParts, required: &[String]) -> Result<Self, ProofError> {
        let missing = missing_sections(&parts.structural_sections, required);
        if !missing.is_empty() {
            return Err(IncompleteProofError { missing }.into());
        }

        let mut proof = SovereigntyProof {
            schema_version: SCHEMA_VERSION,
            anchor_id: parts.anchor_id,
            audit_log_digest: parts.audit_log_digest,
            audit_record_count: parts.audit_record_count,
            audit_source: parts.audit_source,
            ontology_hash: parts.ontology_hash,
            structural_sections: parts.structural_sections,
            generated_at: parts.generated_at,
            proof_hash: Digest::default(),
        };
        proof.proof_hash = proof.compute_hash()?;
        Ok(proof)
    }

    /// Canonical hash over every field except `proof_hash`.
    ///
    /// ```text
    /// tag | schema_version u32 | anchor_id str | audit_log_digest [32]
    ///     | audit_record_count u64 | audit_source (0 | 1 seq u64)
    ///     | ontology_hash [32] | n_sections u32
    ///     | per section, by name: name str | (0 digest | 1 json bytes)
    ///     | generated_at u64
    /// ```
    pub fn compute_hash(&self) -> Result<Digest, ProofError> {
        let mut w = CanonicalWriter::new(PROOF_TAG);
        w.u32(self.schema_version)
            .str(&self.anchor_id)
            .digest(&self.audit_log_digest)
            .u64(self.audit_record_count);
        match self.audit_source {
            AuditSource::FullWalk => w.u8(0),
            AuditSource::Checkpoint { sequence } => w.u8(1).u64(sequence),
        };
        w.digest(&self.ontology_hash)
            .u32(self.structural_sections.len() as u32);
        for (name, section) in &self.structural_sections {
            w.str(name);
            match section {
                StructuralSection::Digest(d) => {
                    w.u8(0).digest(d);
                }
                StructuralSection::Embedded(v) => {
                    w.u8(1).json(v).map_err(|source| ProofError::Canonical {
                        section: name.clone(),
                        source,
                    })?;
                }
            }
        }
        w.u64(self.generated_at);
        Ok(w.hash())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

/// Required names that are absent or empty, in policy order.
pub fn missing_sections(sections: &BTreeMap<String, StructuralSection>, required: &[String]) -> Vec<String> {
    required
        .iter()
        .filter(|name| sections.get(*name).map_or(true, StructuralSection::is_empty))
        .cloned()
        .collect()
}
