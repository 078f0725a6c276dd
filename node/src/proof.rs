// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Proof generation and peer verification on a running ledger.

use crate::checkpoint::digest_through;
use crate::errors::{LedgerError, Result, ValidationError};
use crate::store::StoreFactory;
use crate::telemetry::LedgerMetrics;
use sovereign_ledger::error::IncompleteProofError;
use sovereign_ledger::hash::hash_bytes;
use sovereign_ledger::proof::{
    missing_sections, AuditSource, ProofError, ProofParts, SovereigntyProof, StructuralSection,
};
use sovereign_ledger::types::unix_millis;
use sovereign_ledger::verifier::{self, ProofVerdict, VerifierPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

pub struct ProofGenerator {
    factory: Arc<StoreFactory>,
    required_sections: Vec<String>,
}

impl ProofGenerator {
    pub fn new(factory: Arc<StoreFactory>, required_sections: Vec<String>) -> Self {
        Self { factory, required_sections }
    }

    pub fn required_sections(&self) -> &[String] {
        &self.required_sections
    }

    /// Builds a sealed proof over `anchor_id`.
    ///
    /// `audit_log_digest` is the latest checkpoint's root when that checkpoint
    /// ends at the current tail; otherwise every record is walked, verified and
    /// hashed (slow on long chains). Sections are embedded exactly as given.
    pub async fn generate_proof(
        &self,
        anchor_id: &str,
        ontology_descriptor: &[u8],
        declared_sections: BTreeMap<String, StructuralSection>,
    ) -> Result<SovereigntyProof> {
        let missing = missing_sections(&declared_sections, &self.required_sections);
        if !missing.is_empty() {
            return Err(ValidationError::IncompleteProof(IncompleteProofError { missing }).into());
        }
        if ontology_descriptor.is_empty() {
            return Err(ValidationError::EmptyOntology.into());
        }

        let tail = self
            .factory
            .tail(anchor_id)
            .await?
            .ok_or_else(|| ValidationError::EmptyAnchor { anchor_id: anchor_id.to_string() })?;

        let latest = self.factory.latest_checkpoint(anchor_id).await?;
        let (audit_log_digest, audit_record_count, audit_source) = match latest {
            Some(cp) if cp.record_range.end_id == tail.id && cp.record_count == tail.height + 1 => {
                (cp.merkle_root, cp.record_count, AuditSource::Checkpoint { sequence: cp.sequence })
            }
            _ => {
                tracing::debug!("No checkpoint covers `{}` up to its tail; walking the full chain", anchor_id);
                let walked = digest_through(&self.factory, &tail).await?;
                (walked.root, walked.count, AuditSource::FullWalk)
            }
        };

        let parts = ProofParts {
            anchor_id: anchor_id.to_string(),
            audit_log_digest,
            audit_record_count,
            audit_source,
            ontology_hash: hash_bytes(ontology_descriptor),
            structural_sections: declared_sections,
            generated_at: unix_millis(),
        };
        let proof = SovereigntyProof::assemble(parts, &self.required_sections).map_err(proof_error)?;

        self.factory.metrics().record_proof_generated();
        tracing::info!(
            "Proof for `{}` over {} records ({:?}): {}",
            anchor_id,
            proof.audit_record_count,
            proof.audit_source,
            proof.proof_hash
        );
        Ok(proof)
    }
}

fn proof_error(e: ProofError) -> LedgerError {
    match e {
        ProofError::Incomplete(inner) => ValidationError::IncompleteProof(inner).into(),
        ProofError::Canonical { section, source } => ValidationError::NonCanonicalSection {
            section,
            reason: source.to_string(),
        }
        .into(),
    }
}

/// Classifies peer proofs and counts the outcomes.
pub struct PeerVerifier {
    policy: VerifierPolicy,
    metrics: Arc<LedgerMetrics>,
}

impl PeerVerifier {
    pub fn new(policy: VerifierPolicy, metrics: Arc<LedgerMetrics>) -> Self {
        Self { policy, metrics }
    }

    pub fn policy(&self) -> &VerifierPolicy {
        &self.policy
    }

    pub fn verify(&self, proof: &SovereigntyProof) -> ProofVerdict {
        self.record(verifier::verify_proof(proof, &self.policy))
    }

    pub fn verify_json(&self, bytes: &[u8]) -> ProofVerdict {
        self.record(verifier::verify_proof_json(bytes, &self.policy))
    }

    fn record(&self, verdict: ProofVerdict) -> ProofVerdict {
        self.metrics.record_verification(verdict.classification);
        if verdict.is_fail_loud() {
            let codes: Vec<&str> = verdict.reasons.iter().map(|r| r.code.as_str()).collect();
            tracing::warn!("Peer proof FAIL_LOUD: {:?}", codes);
        } else {
            tracing::debug!("Peer proof PASS_LIMITED");
        }
        verdict
    }
}
