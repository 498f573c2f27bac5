use thiserror::Error;

pub mod api;
pub mod artifact;
pub mod bundle;
pub mod filter;
pub mod handler;
pub mod policy;
pub mod trust;
pub mod verify;

// Re-export commonly used types
pub use api::{Attestation, AttestationClient, AttestationFetcher, FetchParams};
pub use artifact::DigestedArtifact;
pub use handler::{ColorScheme, Handler};
pub use policy::{EnforcementCriteria, Policy};
pub use trust::TrustedRoot;
pub use verify::{
    AttestationProcessingResult, LiveSigstoreVerifier, SigstoreConfig, SigstoreVerifier,
    VerificationResult,
};

#[derive(Debug, Error)]
pub enum AttestationError {
    #[error("API error: {0}")]
    Api(String),

    #[error("no attestations found for subject")]
    NoAttestationsFound,

    #[error("no attestations to verify")]
    NoAttestations,

    #[error("no attestations were verified")]
    NoAttestationsVerified,

    #[error("unsupported bundle version: {0}")]
    UnsupportedBundleVersion(String),

    #[error("leaf certificate issuer is not recognized")]
    UnrecognizedIssuer,

    #[error("no custom verifier found for issuer \"{0}\"")]
    UnknownIssuer(String),

    #[error(
        "detected public good instance but requested verification without public good instance"
    )]
    PublicGoodDisabled,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("TUF error: {0}")]
    Tuf(String),

    #[error("Verification failed: {0}")]
    Verification(String),

    #[error("Invalid digest format: {0}")]
    InvalidDigest(String),

    #[error("invalid SAN pattern: {0}")]
    InvalidSanPattern(#[from] regex::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, AttestationError>;

/// Verify a batch of attestations against an artifact and enforcement criteria.
///
/// Builds the Sigstore policy from the criteria and digested artifact, then
/// runs the verifier over the batch. Status lines narrating per-attestation
/// failures are written through the verifier's handler; the returned error is
/// for control flow.
pub fn verify_attestations(
    art: &DigestedArtifact,
    attestations: &[Attestation],
    verifier: &dyn SigstoreVerifier,
    criteria: &EnforcementCriteria,
) -> Result<Vec<AttestationProcessingResult>> {
    let policy = Policy::build(criteria, art)?;
    verifier.verify(attestations, &policy)
}
