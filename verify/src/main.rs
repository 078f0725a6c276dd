// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use sovereign_ledger::proof::default_required_sections;
use sovereign_ledger::verifier::{verify_proof_json, Classification, ProofVerdict, VerifierPolicy};
use sovereign_ledger::SCHEMA_VERSION;
use std::fs;
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser, Debug)]
#[command(author, version, about = "Classify a peer's sovereignty proof", long_about = None)]
struct Args {
    /// Path to the proof document (JSON)
    proof: PathBuf,

    /// Section the proof must declare; repeat for several. Defaults to the standard set.
    #[arg(long = "require", value_name = "SECTION")]
    require: Vec<String>,

    /// Print the verdict as JSON instead of text
    #[arg(long)]
    json: bool,
}

impl Args {
    fn policy(&self) -> VerifierPolicy {
        let required_sections = if self.require.is_empty() { default_required_sections() } else { self.require.clone() };
        VerifierPolicy { required_sections, supported_schema_versions: vec![SCHEMA_VERSION] }
    }
}

#[derive(Serialize)]
struct Report<'a> {
    proof: String,
    #[serde(flatten)]
    verdict: &'a ProofVerdict,
}

fn render_text(verdict: &ProofVerdict) -> String {
    let mut out = String::from(verdict.classification.as_str());
    for r in &verdict.reasons {
        out.push_str(&format!("\n  {}: {}", r.code.as_str(), r.detail));
    }
    out
}

fn exit_code(verdict: &ProofVerdict) -> ExitCode {
    match verdict.classification {
        Classification::PassLimited => ExitCode::SUCCESS,
        Classification::FailLoud => ExitCode::from(1),
    }
}

fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let bytes = fs::read(&args.proof).with_context(|| format!("Failed to read proof file {}", args.proof.display()))?;
    let verdict = verify_proof_json(&bytes, &args.policy());

    if args.json {
        let report = Report { proof: args.proof.display().to_string(), verdict: &verdict };
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", render_text(&verdict));
    }
    Ok(exit_code(&verdict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sovereign_ledger::hash::hash_bytes;
    use sovereign_ledger::proof::{AuditSource, ProofParts, SovereigntyProof, StructuralSection};
    use sovereign_ledger::verifier::ReasonCode;
    use std::collections::BTreeMap;

    fn proof() -> SovereigntyProof {
        let mut sections = BTreeMap::new();
        sections.insert("ontology".to_string(), StructuralSection::Embedded(json!({"entities": ["a"]})));
        sections.insert("refusal_boundaries".to_string(), StructuralSection::Embedded(json!(["x"])));
        sections.insert("authority_surface".to_string(), StructuralSection::Digest(hash_bytes(b"auth")));
        let parts = ProofParts {
            anchor_id: "peer".into(),
            audit_log_digest: hash_bytes(b"root"),
            audit_record_count: 5,
            audit_source: AuditSource::FullWalk,
            ontology_hash: hash_bytes(b"ontology"),
            structural_sections: sections,
            generated_at: 1_700_000_000_000,
        };
        SovereigntyProof::assemble(parts, &default_required_sections()).unwrap()
    }

    #[test]
    fn test_args_default_and_repeated_requirements() {
        let args = Args::try_parse_from(["sovereign-verify", "p.json"]).unwrap();
        assert!(!args.json);
        assert_eq!(args.policy().required_sections, default_required_sections());

        let args = Args::try_parse_from(["sovereign-verify", "p.json", "--require", "ontology", "--require", "extra", "--json"])
            .unwrap();
        assert!(args.json);
        assert_eq!(args.policy().required_sections, vec!["ontology".to_string(), "extra".to_string()]);

        assert!(Args::try_parse_from(["sovereign-verify"]).is_err());
    }

    #[test]
    fn test_custom_requirement_fails_a_proof_without_it() {
        let bytes = proof().to_json_pretty().unwrap();
        let args = Args::try_parse_from(["sovereign-verify", "p.json", "--require", "data_handling"]).unwrap();
        let verdict = verify_proof_json(bytes.as_bytes(), &args.policy());
        assert_eq!(verdict.classification, Classification::FailLoud);
        assert!(verdict.has(ReasonCode::MissingSection));
        assert_eq!(exit_code(&verdict), ExitCode::from(1));
    }

    #[test]
    fn test_text_rendering_lists_every_reason() {
        let verdict = verify_proof_json(proof().to_json_pretty().unwrap().as_bytes(), &VerifierPolicy::default());
        let text = render_text(&verdict);
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("PASS_LIMITED"));
        assert!(lines.next().unwrap().starts_with("  stale_snapshot_undetectable: "));
        assert!(lines.next().unwrap().starts_with("  unlogged_behavior_undetectable: "));
        assert_eq!(lines.next(), None);
        assert_eq!(exit_code(&verdict), ExitCode::SUCCESS);
    }

    #[test]
    fn test_json_report_carries_classification() {
        let verdict = verify_proof_json(b"[]", &VerifierPolicy::default());
        let report = Report { proof: "p.json".into(), verdict: &verdict };
        let value = serde_json::to_value(&report).unwrap();
        assert_eq!(value["classification"], "FAIL_LOUD");
        assert_eq!(value["reasons"][0]["code"], "malformed_document");
        assert_eq!(value["proof"], "p.json");
    }
}
