//! Narrowing attestation batches by statement contents.
//!
//! Attestations whose statements cannot be parsed or do not match are
//! skipped with a narrated line, never a hard error; a batch is allowed to
//! mix attestations for different subjects and predicates.

use crate::api::Attestation;
use crate::bundle;
use crate::handler::Handler;
use crate::verify::AttestationProcessingResult;

/// The package URL a release attestation asserts for `repo` at `tag`.
pub fn release_purl(repo: &str, tag: &str) -> String {
    format!("pkg:github/{}@{}", repo, tag)
}

fn statements_matching<F>(
    attestations: &[Attestation],
    handler: &Handler,
    mut keep: F,
) -> Vec<Attestation>
where
    F: FnMut(&bundle::Statement) -> bool,
{
    let mut kept = Vec::new();
    for attestation in attestations {
        match bundle::parse_statement(attestation) {
            Ok(statement) => {
                if keep(&statement) {
                    kept.push(attestation.clone());
                }
            }
            Err(e) => {
                handler.verbose_println(
                    &handler
                        .color_scheme
                        .red(&format!("✗ Failed to parse statement, skipping: {}", e)),
                );
            }
        }
    }
    kept
}

/// Attestations whose statement carries the given predicate type.
pub fn filter_by_predicate_type(
    attestations: &[Attestation],
    predicate_type: &str,
    handler: &Handler,
) -> Vec<Attestation> {
    statements_matching(attestations, handler, |s| s.predicate_type == predicate_type)
}

/// Verified results whose statement carries the given predicate type.
pub fn filter_results_by_predicate_type(
    results: Vec<AttestationProcessingResult>,
    predicate_type: &str,
) -> Vec<AttestationProcessingResult> {
    results
        .into_iter()
        .filter(|r| r.verification_result.statement.predicate_type == predicate_type)
        .collect()
}

/// Attestations asserting the release package URL for `repo` at `tag`.
pub fn filter_by_purl(
    attestations: &[Attestation],
    repo: &str,
    tag: &str,
    handler: &Handler,
) -> Vec<Attestation> {
    let purl = release_purl(repo, tag);
    statements_matching(attestations, handler, |s| {
        s.predicate_field("purl") == Some(purl.as_str())
    })
}

/// Attestations whose release predicate names `tag`.
pub fn filter_by_tag(
    attestations: &[Attestation],
    tag: &str,
    handler: &Handler,
) -> Vec<Attestation> {
    statements_matching(attestations, handler, |s| {
        s.predicate_field("tag") == Some(tag)
    })
}

/// Attestations where some subject carries the given sha256 file digest.
/// Release statements list several subjects (the release ref plus each
/// asset), so every subject is consulted.
pub fn filter_by_file_digest(
    attestations: &[Attestation],
    digest: &str,
    handler: &Handler,
) -> Vec<Attestation> {
    statements_matching(attestations, handler, |s| {
        s.subject
            .iter()
            .any(|subject| subject.digest.get("sha256").map(|d| d.as_str()) == Some(digest))
    })
}
