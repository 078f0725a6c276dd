// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
//! Proof Verification
//!
//! Classifies a peer's [`SovereigntyProof`] without any trusted authority.
//!
//! # Checks, in order
//! 1. Structural completeness (every required section present and non-empty)
//! 2. Self-consistency (`proof_hash` recomputed over all other fields)
//! 3. Audit-log non-triviality (a proof must attest to at least one record)
//! 4. Bounded limitations (always reported when nothing above failed)
//!
//! # Outcomes
//! - `FAIL_LOUD`: a concrete violation was detected
//! - `PASS_LIMITED`: nothing detected, but this check cannot see whether the
//!   proof is the peer's live state, nor behaviour that was never logged
//!
//! There is no unqualified pass. The verifier never panics and never returns
//! an error: malformed input is itself a classified `FAIL_LOUD`.

use crate::hash::{Digest, SCHEMA_VERSION};
use crate::merkle::empty_root;
use crate::proof::{missing_sections, ProofError, SovereigntyProof, default_required_sections};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Classification {
    #[serde(rename = "FAIL_LOUD")]
    FailLoud,
    #[serde(rename = "PASS_LIMITED")]
    PassLimited,
}

impl Classification {
    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::FailLoud => "FAIL_LOUD",
            Classification::PassLimited => "PASS_LIMITED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReasonCode {
    // detected
    MalformedDocument,
    UnsupportedSchema,
    MissingSection,
    HashMismatch,
    EmptyAuditLog,
    // bounded
    StaleSnapshotUndetectable,
    UnloggedBehaviorUndetectable,
}

impl ReasonCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReasonCode::MalformedDocument => "malformed_document",
            ReasonCode::UnsupportedSchema => "unsupported_schema",
            ReasonCode::MissingSection => "missing_section",
            ReasonCode::HashMismatch => "hash_mismatch",
            ReasonCode::EmptyAuditLog => "empty_audit_log",
            ReasonCode::StaleSnapshotUndetectable => "stale_snapshot_undetectable",
            ReasonCode::UnloggedBehaviorUndetectable => "unlogged_behavior_undetectable",
        }
    }

    pub fn is_limitation(&self) -> bool {
        matches!(self, ReasonCode::StaleSnapshotUndetectable | ReasonCode::UnloggedBehaviorUndetectable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reason {
    pub code: ReasonCode,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofVerdict {
    pub classification: Classification,
    pub reasons: Vec<Reason>,
}

impl ProofVerdict {
    pub fn has(&self, code: ReasonCode) -> bool {
        self.reasons.iter().any(|r| r.code == code)
    }

    pub fn is_fail_loud(&self) -> bool {
        self.classification == Classification::FailLoud
    }
}

/// What the verifying side demands of a peer's proof.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifierPolicy {
    pub required_sections: Vec<String>,
    pub supported_schema_versions: Vec<u32>,
}

impl Default for VerifierPolicy {
    fn default() -> Self {
        Self {
            required_sections: default_required_sections(),
            supported_schema_versions: vec![SCHEMA_VERSION],
        }
    }
}

/// Verifies a parsed proof, trusting nothing in it (including `proof_hash`).
pub fn verify_proof(proof: &SovereigntyProof, policy: &VerifierPolicy) -> ProofVerdict {
    let claimed = proof.proof_hash.to_hex();
    evaluate(proof, Some(&claimed), policy)
}

/// Verifies a proof straight from its wire bytes.
///
/// `proof_hash` is taken as an uninterpreted string, so a forged placeholder
/// such as `"PLACEHOLDER"` reports `hash_mismatch` rather than a parse failure.
pub fn verify_proof_json(bytes: &[u8], policy: &VerifierPolicy) -> ProofVerdict {
    let mut value: Value = match serde_json::from_slice(bytes) {
        Ok(v) => v,
        Err(e) => return fail(vec![reason(ReasonCode::MalformedDocument, format!("not JSON: {e}"))]),
    };
    let Some(obj) = value.as_object_mut() else {
        return fail(vec![reason(ReasonCode::MalformedDocument, "top level is not an object")]);
    };

    let claimed = obj.remove("proof_hash").and_then(|v| v.as_str().map(str::to_owned));
    obj.insert("proof_hash".into(), Value::String(Digest::default().to_hex()));

    match serde_json::from_value::<SovereigntyProof>(value) {
        Ok(proof) => evaluate(&proof, claimed.as_deref(), policy),
        Err(e) => fail(vec![reason(ReasonCode::MalformedDocument, format!("invalid proof document: {e}"))]),
    }
}

fn evaluate(proof: &SovereigntyProof, claimed_hash: Option<&str>, policy: &VerifierPolicy) -> ProofVerdict {
    let mut failures = Vec::new();

    if !policy.supported_schema_versions.contains(&proof.schema_version) {
        failures.push(reason(
            ReasonCode::UnsupportedSchema,
            format!("schema_version {} not in {:?}", proof.schema_version, policy.supported_schema_versions),
        ));
    }

    // 1. structural completeness
    for name in missing_sections(&proof.structural_sections, &policy.required_sections) {
        failures.push(reason(ReasonCode::MissingSection, format!("section `{name}` is missing or empty")));
    }

    // 2. self-consistency
    match proof.compute_hash() {
        Ok(recomputed) => {
            let matches = claimed_hash
                .and_then(Digest::from_hex)
                .is_some_and(|claimed| claimed == recomputed);
            if !matches {
                failures.push(reason(
                    ReasonCode::HashMismatch,
                    format!("proof_hash {:?} does not match recomputed {}", claimed_hash.unwrap_or("<absent>"), recomputed),
                ));
            }
        }
        Err(ProofError::Canonical { section, source }) => {
            failures.push(reason(ReasonCode::MalformedDocument, format!("section `{section}`: {source}")));
        }
        Err(ProofError::Incomplete(e)) => {
            failures.push(reason(ReasonCode::MissingSection, e.to_string()));
        }
    }

    // 3. non-triviality
    if proof.audit_record_count == 0 || proof.audit_log_digest == empty_root() || proof.audit_log_digest.is_genesis() {
        failures.push(reason(ReasonCode::EmptyAuditLog, "audit log digest attests to zero records"));
    }

    if !failures.is_empty() {
        return fail(failures);
    }

    // 4. bounded limitations
    ProofVerdict {
        classification: Classification::PassLimited,
        reasons: vec![
            reason(
                ReasonCode::StaleSnapshotUndetectable,
                format!(
                    "proof generated at {} ms covers {} records; whether it is the peer's current state cannot be determined",
                    proof.generated_at, proof.audit_record_count
                ),
            ),
            reason(
                ReasonCode::UnloggedBehaviorUndetectable,
                "behaviour that was never appended to the peer's ledger is invisible to this check",
            ),
        ],
    }
}

fn reason(code: ReasonCode, detail: impl Into<String>) -> Reason {
    Reason { code, detail: detail.into() }
}

fn fail(reasons: Vec<Reason>) -> ProofVerdict {
    ProofVerdict { classification: Classification::FailLoud, reasons }
}
