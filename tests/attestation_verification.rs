use attestation_verification::api::Attestation;
use attestation_verification::bundle::extract_issuer_org;
use attestation_verification::filter;
use attestation_verification::policy::RELEASE_SAN;
use attestation_verification::trust::load_custom_roots;
use attestation_verification::verify::{
    BundleVerifier, Requirements, TrustedRootVerifier, VerifierSet,
};
use attestation_verification::{
    verify_attestations, AttestationError, DigestedArtifact, EnforcementCriteria, Handler,
    LiveSigstoreVerifier,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

fn fixture(name: &str) -> PathBuf {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data")).join(name)
}

fn load_attestation(name: &str) -> Attestation {
    let json = std::fs::read_to_string(fixture(name)).unwrap();
    Attestation {
        bundle: serde_json::from_str(&json).unwrap(),
        bundle_url: None,
    }
}

fn release_criteria() -> EnforcementCriteria {
    EnforcementCriteria {
        predicate_type: "https://in-toto.io/attestation/release/v0.1".to_string(),
        san: RELEASE_SAN.to_string(),
        ..Default::default()
    }
}

fn release_artifact() -> DigestedArtifact {
    DigestedArtifact::for_release("v2.0.0", "7cb9119a4e14e9ad2a4cb92bb8d1s6e51b8cf2c8", "sha1")
}

/// Custom verifier set trusting only GitHub's issuer, with no proof-count
/// requirements so offline fixtures verify on signature and identity alone.
fn github_only_verifier(handler: Handler) -> LiveSigstoreVerifier {
    let root = load_custom_roots(&fixture("custom_roots.jsonl"))
        .unwrap()
        .remove(1);
    let mut verifiers: HashMap<String, Box<dyn BundleVerifier>> = HashMap::new();
    verifiers.insert(
        "GitHub, Inc.".to_string(),
        Box::new(TrustedRootVerifier::new(root, Requirements::default())),
    );
    LiveSigstoreVerifier::with_set(VerifierSet::Custom(verifiers), handler)
}

#[test]
fn issuer_organizations_extract_from_bundles() {
    let github = load_attestation("bundle_github_leaf.json");
    assert_eq!(extract_issuer_org(&github.bundle).unwrap(), "GitHub, Inc.");

    let sigstore = load_attestation("bundle_sigstore_leaf.json");
    assert_eq!(extract_issuer_org(&sigstore.bundle).unwrap(), "sigstore.dev");

    let multi = load_attestation("bundle_multi_org.json");
    match extract_issuer_org(&multi.bundle) {
        Err(AttestationError::Verification(msg)) => {
            assert!(msg.contains("only have one organization"))
        }
        other => panic!("expected multi-org error, got {:?}", other),
    }
}

#[test]
fn release_attestation_verifies_against_custom_root() {
    let (handler, _) = Handler::buffered();
    let verifier = github_only_verifier(handler);

    let attestations = vec![load_attestation("bundle_github_leaf.json")];
    let results = verify_attestations(
        &release_artifact(),
        &attestations,
        &verifier,
        &release_criteria(),
    )
    .unwrap();

    assert_eq!(results.len(), 1);
    let statement = &results[0].verification_result.statement;
    assert_eq!(
        statement.predicate_field("purl"),
        Some("pkg:github/malancas/attest-demo@v2.0.0")
    );

    let kept =
        filter::filter_results_by_predicate_type(results, "https://in-toto.io/attestation/release/v0.1");
    assert_eq!(kept.len(), 1);
}

#[test]
fn unknown_issuers_are_skipped_in_a_batch() {
    let (handler, buf) = Handler::buffered();
    let verifier = github_only_verifier(handler);

    // The sigstore-issued bundle has no custom verifier and is skipped; the
    // GitHub-issued bundle still verifies
    let attestations = vec![
        load_attestation("bundle_sigstore_leaf.json"),
        load_attestation("bundle_github_leaf.json"),
    ];
    let results = verify_attestations(
        &release_artifact(),
        &attestations,
        &verifier,
        &release_criteria(),
    )
    .unwrap();
    assert_eq!(results.len(), 1);

    let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
    assert!(out.contains("no custom verifier found for issuer \"sigstore.dev\""));
}

#[test]
fn batch_of_only_unknown_issuers_fails_with_last_error() {
    let (handler, _) = Handler::buffered();
    let verifier = github_only_verifier(handler);

    let attestations = vec![load_attestation("bundle_sigstore_leaf.json")];
    match verify_attestations(
        &release_artifact(),
        &attestations,
        &verifier,
        &release_criteria(),
    ) {
        Err(AttestationError::UnknownIssuer(org)) => assert_eq!(org, "sigstore.dev"),
        other => panic!("expected unknown issuer, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn empty_batch_is_a_sentinel_error() {
    let (handler, _) = Handler::buffered();
    let verifier = github_only_verifier(handler);
    match verify_attestations(&release_artifact(), &[], &verifier, &release_criteria()) {
        Err(AttestationError::NoAttestations) => {}
        other => panic!("expected no-attestations error, got {:?}", other.map(|_| ())),
    }
}

#[test]
fn mismatched_owner_criteria_reject_the_certificate() {
    let (handler, _) = Handler::buffered();
    let verifier = github_only_verifier(handler);

    // The fixture leaf carries no source repository extensions, so any
    // non-empty expectation fails identity verification
    let criteria = EnforcementCriteria::for_release(
        "https://in-toto.io/attestation/release/v0.1",
        "someone-else",
        "",
        "",
    );
    let attestations = vec![load_attestation("bundle_github_leaf.json")];
    let result = verify_attestations(&release_artifact(), &attestations, &verifier, &criteria);
    match result {
        Err(AttestationError::Verification(msg)) => {
            assert!(msg.contains("source repository owner URI"))
        }
        other => panic!("expected identity error, got {:?}", other.map(|_| ())),
    }
}
