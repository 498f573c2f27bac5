//! Verifier construction and batch verification.
//!
//! Each Sigstore instance (public good, GitHub, or a custom root) gets its own
//! verifier with instance-appropriate requirements. Bundles are routed to a
//! verifier by the organization of their leaf certificate's issuer.

mod crypto;

pub use crypto::TrustedRootVerifier;

use crate::api::Attestation;
use crate::bundle::{self, Statement};
use crate::handler::Handler;
use crate::policy::{CertificateSummary, Policy};
use crate::trust::{self, TrustedRoot};
use crate::{AttestationError, Result};
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;

/// Issuer organization of the Sigstore public-good instance's Fulcio CA.
pub const PUBLIC_GOOD_ISSUER_ORG: &str = "sigstore.dev";

/// Issuer organization of GitHub's private Sigstore instance CA.
pub const GITHUB_ISSUER_ORG: &str = "GitHub, Inc.";

/// Verifier construction options. Built once by the caller and not mutated
/// afterwards.
#[derive(Debug, Clone, Default)]
pub struct SigstoreConfig {
    /// Path to a JSONL file of custom trusted roots; when set, only custom
    /// verifiers are built and the built-in instances are not trusted
    pub trusted_root: Option<PathBuf>,
    /// Refuse to trust the public-good instance
    pub no_public_good: bool,
    /// Tenancy trust domain; empty for github.com
    pub trust_domain: String,
    /// Directory for cached TUF metadata
    pub tuf_metadata_dir: Option<PathBuf>,
}

/// How many of each proof kind a bundle must carry to pass.
///
/// Each instance profile demands different evidence: the public good instance
/// logs certificates and signatures publicly, GitHub's instance signs
/// timestamps instead, and custom instances demand log entries only when
/// their root declares a log.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Requirements {
    pub signed_certificate_timestamps: usize,
    pub transparency_log_entries: usize,
    pub observer_timestamps: usize,
    pub signed_timestamps: usize,
}

impl Requirements {
    pub fn public_good() -> Self {
        Self {
            signed_certificate_timestamps: 1,
            transparency_log_entries: 1,
            observer_timestamps: 1,
            signed_timestamps: 0,
        }
    }

    pub fn github() -> Self {
        Self {
            signed_timestamps: 1,
            ..Self::default()
        }
    }

    pub fn custom(root: &TrustedRoot) -> Self {
        Self {
            transparency_log_entries: if root.has_tlogs() { 1 } else { 0 },
            observer_timestamps: 1,
            ..Self::default()
        }
    }
}

/// Everything established about one attestation by a successful verification.
#[derive(Debug, Clone, Serialize)]
pub struct VerificationResult {
    pub statement: Statement,
    pub certificate: CertificateSummary,
    pub transparency_log_entries: usize,
    pub signed_certificate_timestamps: usize,
    pub observer_timestamps: usize,
    pub signed_timestamps: usize,
}

/// An attestation paired with its verification outcome.
#[derive(Debug, Clone, Serialize)]
pub struct AttestationProcessingResult {
    pub attestation: Attestation,
    pub verification_result: VerificationResult,
}

/// Verification of a single bundle against a policy. Implemented per Sigstore
/// instance; object-safe so verifier sets can mix instances.
pub trait BundleVerifier: Send + Sync {
    fn verify(&self, attestation: &Attestation, policy: &Policy) -> Result<VerificationResult>;
}

/// The verifiers a configuration trusts. Built-in and custom roots are
/// mutually exclusive: supplying custom roots withdraws trust from the
/// built-in instances entirely.
pub enum VerifierSet {
    BuiltIn {
        /// `None` when the public-good instance is disabled
        public_good: Option<Box<dyn BundleVerifier>>,
        github: Box<dyn BundleVerifier>,
    },
    Custom(HashMap<String, Box<dyn BundleVerifier>>),
}

impl VerifierSet {
    /// Route an issuer organization to its verifier.
    pub fn select(&self, issuer_org: &str) -> Result<&dyn BundleVerifier> {
        match self {
            VerifierSet::BuiltIn {
                public_good,
                github,
            } => match issuer_org {
                PUBLIC_GOOD_ISSUER_ORG => public_good
                    .as_deref()
                    .ok_or(AttestationError::PublicGoodDisabled),
                GITHUB_ISSUER_ORG => Ok(github.as_ref()),
                _ => Err(AttestationError::UnrecognizedIssuer),
            },
            VerifierSet::Custom(verifiers) => verifiers
                .get(issuer_org)
                .map(|v| v.as_ref())
                .ok_or_else(|| AttestationError::UnknownIssuer(issuer_org.to_string())),
        }
    }
}

/// Build the custom verifier map from a JSONL trusted-root file.
///
/// Every certificate authority of every root contributes one verifier, keyed
/// by the CA's issuer organization; on a duplicate organization the first
/// wins. The built-in issuer organizations keep their built-in requirement
/// profiles even when supplied through a custom root; any other issuer gets
/// the custom profile derived from its root. A root for the public-good
/// issuer combined with `no_public_good` is a contradiction and fails
/// construction.
pub fn build_custom_verifiers(
    path: &std::path::Path,
    no_public_good: bool,
) -> Result<HashMap<String, TrustedRootVerifier>> {
    let roots = trust::load_custom_roots(path)?;
    let mut verifiers: HashMap<String, TrustedRootVerifier> = HashMap::new();

    for root in roots {
        for org in root.ca_organizations()? {
            if org == PUBLIC_GOOD_ISSUER_ORG && no_public_good {
                return Err(AttestationError::PublicGoodDisabled);
            }
            if verifiers.contains_key(&org) {
                log::debug!("duplicate custom trusted root for issuer {:?}, keeping first", org);
                continue;
            }
            let requirements = match org.as_str() {
                PUBLIC_GOOD_ISSUER_ORG => Requirements::public_good(),
                GITHUB_ISSUER_ORG => Requirements::github(),
                _ => Requirements::custom(&root),
            };
            verifiers.insert(org, TrustedRootVerifier::new(root.clone(), requirements));
        }
    }

    Ok(verifiers)
}

/// Batch verification seam. Mocked in tests of callers.
pub trait SigstoreVerifier: Send + Sync {
    fn verify(
        &self,
        attestations: &[Attestation],
        policy: &Policy,
    ) -> Result<Vec<AttestationProcessingResult>>;
}

/// Production verifier holding the trusted verifier set and narrating
/// progress through a handler.
pub struct LiveSigstoreVerifier {
    handler: Handler,
    set: VerifierSet,
}

impl LiveSigstoreVerifier {
    /// Build the verifier set for a configuration. Built-in roots are
    /// resolved over TUF; a custom root file bypasses TUF entirely.
    pub async fn new(config: &SigstoreConfig, handler: Handler) -> Result<Self> {
        let set = match &config.trusted_root {
            Some(path) => {
                let verifiers = build_custom_verifiers(path, config.no_public_good)?
                    .into_iter()
                    .map(|(org, v)| (org, Box::new(v) as Box<dyn BundleVerifier>))
                    .collect();
                VerifierSet::Custom(verifiers)
            }
            None => {
                let metadata_dir = config.tuf_metadata_dir.as_deref();
                let public_good: Option<Box<dyn BundleVerifier>> = if config.no_public_good {
                    None
                } else {
                    let root = trust::tuf::resolve_public_good(metadata_dir).await?;
                    Some(Box::new(TrustedRootVerifier::new(
                        root,
                        Requirements::public_good(),
                    )))
                };
                let github_root =
                    trust::tuf::resolve_github(&config.trust_domain, metadata_dir).await?;
                VerifierSet::BuiltIn {
                    public_good,
                    github: Box::new(TrustedRootVerifier::new(
                        github_root,
                        Requirements::github(),
                    )),
                }
            }
        };
        Ok(Self { handler, set })
    }

    /// Wrap an already-built verifier set.
    pub fn with_set(set: VerifierSet, handler: Handler) -> Self {
        Self { handler, set }
    }
}

impl SigstoreVerifier for LiveSigstoreVerifier {
    /// Verify each attestation independently, routing by issuer. Failures are
    /// narrated and skipped; only when nothing verifies does the batch fail,
    /// with the last per-attestation error.
    fn verify(
        &self,
        attestations: &[Attestation],
        policy: &Policy,
    ) -> Result<Vec<AttestationProcessingResult>> {
        if attestations.is_empty() {
            return Err(AttestationError::NoAttestations);
        }

        let total = attestations.len();
        let mut results = Vec::new();
        let mut last_error = None;

        for (i, attestation) in attestations.iter().enumerate() {
            self.handler
                .verbose_println(&format!("Verifying attestation {}/{}", i + 1, total));

            let outcome = bundle::extract_issuer_org(&attestation.bundle).and_then(|org| {
                self.handler.verbose_println(&format!(
                    "Attempting verification against issuer \"{}\"",
                    org
                ));
                self.set
                    .select(&org)
                    .and_then(|verifier| verifier.verify(attestation, policy))
            });

            match outcome {
                Ok(result) => {
                    self.handler.verbose_println(
                        &self
                            .handler
                            .color_scheme
                            .green(&format!("✓ Attestation {}/{} verified", i + 1, total)),
                    );
                    results.push(AttestationProcessingResult {
                        attestation: attestation.clone(),
                        verification_result: result,
                    });
                }
                Err(e) => {
                    self.handler.verbose_println(&self.handler.color_scheme.red(
                        &format!("✗ Attestation {}/{} failed: {}", i + 1, total, e),
                    ));
                    last_error = Some(e);
                }
            }
        }

        if results.is_empty() {
            return Err(last_error.unwrap_or(AttestationError::NoAttestationsVerified));
        }
        Ok(results)
    }
}
