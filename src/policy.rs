use crate::artifact::DigestedArtifact;
use crate::bundle::Statement;
use crate::{AttestationError, Result};
use regex::Regex;
use serde::Serialize;
use x509_parser::prelude::*;

/// Fulcio certificate extension OIDs (dotted form).
pub const OID_ISSUER_V2: &str = "1.3.6.1.4.1.57264.1.8";
pub const OID_RUNNER_ENVIRONMENT: &str = "1.3.6.1.4.1.57264.1.11";
pub const OID_SOURCE_REPOSITORY_URI: &str = "1.3.6.1.4.1.57264.1.12";
pub const OID_SOURCE_REPOSITORY_OWNER_URI: &str = "1.3.6.1.4.1.57264.1.16";
const OID_SUBJECT_ALT_NAME: &str = "2.5.29.17";

/// Default SAN asserted by GitHub release attestations.
pub const RELEASE_SAN: &str = "https://dotcom.releases.github.com";

fn expand_to_github_url(tenant: &str, owner_or_repo: &str) -> String {
    if tenant.is_empty() {
        format!("https://github.com/{}", owner_or_repo)
    } else {
        format!("https://{}.ghe.com/{}", tenant, owner_or_repo)
    }
}

/// Expected certificate extension values; empty strings are not enforced.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CertificateCriteria {
    pub source_repository_uri: String,
    pub source_repository_owner_uri: String,
    pub runner_environment: String,
}

/// The policy specification: predicate type, SAN match, and certificate
/// extension expectations. Built once from caller options, never mutated.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EnforcementCriteria {
    pub predicate_type: String,
    /// Exact SAN match; ignored when empty
    pub san: String,
    /// SAN regex match; ignored when empty
    pub san_regex: String,
    pub certificate: CertificateCriteria,
}

impl EnforcementCriteria {
    /// Criteria for verifying a release attestation of `owner` (and
    /// optionally `owner/repo`), tenancy-aware.
    pub fn for_release(predicate_type: &str, owner: &str, repo: &str, tenant: &str) -> Self {
        let mut c = EnforcementCriteria {
            predicate_type: predicate_type.to_string(),
            san: RELEASE_SAN.to_string(),
            ..Default::default()
        };
        if !repo.is_empty() {
            c.certificate.source_repository_uri = expand_to_github_url(tenant, repo);
        }
        c.certificate.source_repository_owner_uri = expand_to_github_url(tenant, owner);
        c
    }
}

/// SAN matcher: exact string, regex, or both (either may match).
#[derive(Debug, Clone)]
pub struct SanMatcher {
    exact: String,
    regex: Option<Regex>,
}

impl SanMatcher {
    pub fn new(san: &str, san_regex: &str) -> Result<Self> {
        let regex = if san_regex.is_empty() {
            None
        } else {
            Some(Regex::new(san_regex)?)
        };
        Ok(Self {
            exact: san.to_string(),
            regex,
        })
    }

    pub fn matches(&self, candidate: &str) -> bool {
        if !self.exact.is_empty() && candidate == self.exact {
            return true;
        }
        if let Some(re) = &self.regex {
            return re.is_match(candidate);
        }
        // No pattern configured at all: accept anything
        self.exact.is_empty()
    }
}

/// Identity fields read out of a leaf signing certificate.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CertificateSummary {
    pub subject_alternative_names: Vec<String>,
    pub issuer_organization: String,
    pub oidc_issuer: String,
    pub source_repository_uri: String,
    pub source_repository_owner_uri: String,
    pub runner_environment: String,
}

impl CertificateSummary {
    pub fn from_certificate(cert: &X509Certificate<'_>) -> Self {
        let mut summary = CertificateSummary {
            issuer_organization: cert
                .issuer()
                .iter_organization()
                .next()
                .and_then(|o| o.as_str().ok())
                .unwrap_or_default()
                .to_string(),
            ..Default::default()
        };

        for ext in cert.extensions() {
            let oid = ext.oid.to_string();
            if oid == OID_SUBJECT_ALT_NAME {
                if let ParsedExtension::SubjectAlternativeName(san) = ext.parsed_extension() {
                    for name in &san.general_names {
                        if let GeneralName::URI(uri) = name {
                            summary.subject_alternative_names.push(uri.to_string());
                        }
                    }
                }
            } else if oid == OID_ISSUER_V2 {
                summary.oidc_issuer = der_string(ext.value);
            } else if oid == OID_RUNNER_ENVIRONMENT {
                summary.runner_environment = der_string(ext.value);
            } else if oid == OID_SOURCE_REPOSITORY_URI {
                summary.source_repository_uri = der_string(ext.value);
            } else if oid == OID_SOURCE_REPOSITORY_OWNER_URI {
                summary.source_repository_owner_uri = der_string(ext.value);
            }
        }

        summary
    }
}

/// Fulcio v2 extensions hold a DER UTF8String; v1 extensions held raw bytes.
/// Accept both.
fn der_string(bytes: &[u8]) -> String {
    if bytes.len() >= 2 && bytes[0] == 0x0c {
        let (len, start) = if bytes[1] < 0x80 {
            (bytes[1] as usize, 2)
        } else if bytes[1] == 0x81 && bytes.len() >= 3 {
            (bytes[2] as usize, 3)
        } else {
            (0, bytes.len())
        };
        if start + len <= bytes.len() {
            if let Ok(s) = std::str::from_utf8(&bytes[start..start + len]) {
                return s.to_string();
            }
        }
    }
    String::from_utf8_lossy(bytes).to_string()
}

/// Certificate identity predicate: SAN match plus extension equality checks.
/// Issuer matching is deliberately accept-any here; issuer trust is enforced
/// by verifier routing.
#[derive(Debug, Clone)]
pub struct CertificateIdentity {
    san: SanMatcher,
    criteria: CertificateCriteria,
}

impl CertificateIdentity {
    pub fn verify(&self, summary: &CertificateSummary) -> Result<()> {
        if !summary
            .subject_alternative_names
            .iter()
            .any(|san| self.san.matches(san))
        {
            return Err(AttestationError::Verification(format!(
                "certificate SAN {:?} did not match expected identity",
                summary.subject_alternative_names
            )));
        }

        let checks = [
            (
                &self.criteria.source_repository_uri,
                &summary.source_repository_uri,
                "source repository URI",
            ),
            (
                &self.criteria.source_repository_owner_uri,
                &summary.source_repository_owner_uri,
                "source repository owner URI",
            ),
            (
                &self.criteria.runner_environment,
                &summary.runner_environment,
                "runner environment",
            ),
        ];
        for (expected, actual, what) in checks {
            if !expected.is_empty() && expected != actual {
                return Err(AttestationError::Verification(format!(
                    "certificate {} \"{}\" does not match expected \"{}\"",
                    what, actual, expected
                )));
            }
        }
        Ok(())
    }
}

/// A built Sigstore policy: subject digest match plus certificate identity.
/// Construction is pure; it fails only on a malformed SAN pattern.
#[derive(Debug, Clone)]
pub struct Policy {
    pub algorithm: String,
    pub digest: String,
    identity: CertificateIdentity,
}

impl Policy {
    pub fn build(criteria: &EnforcementCriteria, artifact: &DigestedArtifact) -> Result<Self> {
        let san = SanMatcher::new(&criteria.san, &criteria.san_regex)?;
        Ok(Policy {
            algorithm: artifact.algorithm.clone(),
            digest: artifact.digest.clone(),
            identity: CertificateIdentity {
                san,
                criteria: criteria.certificate.clone(),
            },
        })
    }

    /// The statement must name the artifact: some subject's digest map, under
    /// the artifact's algorithm, must equal the artifact digest.
    pub fn verify_subject_digest(&self, statement: &Statement) -> Result<()> {
        for subject in &statement.subject {
            if let Some(digest) = subject.digest.get(&self.algorithm) {
                if *digest == self.digest {
                    return Ok(());
                }
            }
        }
        Err(AttestationError::Verification(format!(
            "subject digest mismatch: no subject carries {}:{}",
            self.algorithm, self.digest
        )))
    }

    pub fn verify_certificate_identity(&self, summary: &CertificateSummary) -> Result<()> {
        self.identity.verify(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn release_criteria_expand_github_urls() {
        let c = EnforcementCriteria::for_release(
            "https://in-toto.io/attestation/release/v0.1",
            "foo",
            "foo/bar",
            "",
        );
        assert_eq!(
            c.certificate.source_repository_owner_uri,
            "https://github.com/foo"
        );
        assert_eq!(
            c.certificate.source_repository_uri,
            "https://github.com/foo/bar"
        );
        assert_eq!(c.san, RELEASE_SAN);
    }

    #[test]
    fn release_criteria_expand_tenant_urls() {
        let c = EnforcementCriteria::for_release("t", "foo", "foo/bar", "baz");
        assert_eq!(
            c.certificate.source_repository_owner_uri,
            "https://baz.ghe.com/foo"
        );
        assert_eq!(
            c.certificate.source_repository_uri,
            "https://baz.ghe.com/foo/bar"
        );
    }

    #[test]
    fn owner_only_criteria_skip_repo_uri() {
        let c = EnforcementCriteria::for_release("t", "foo", "", "");
        assert!(c.certificate.source_repository_uri.is_empty());
        assert_eq!(
            c.certificate.source_repository_owner_uri,
            "https://github.com/foo"
        );
    }

    #[test]
    fn san_matcher_exact_and_regex() {
        let m = SanMatcher::new("https://example.com/x", "").unwrap();
        assert!(m.matches("https://example.com/x"));
        assert!(!m.matches("https://example.com/y"));

        let m = SanMatcher::new("", "^https://example\\.com/.*$").unwrap();
        assert!(m.matches("https://example.com/y"));
        assert!(!m.matches("https://other.com/y"));

        // Unconfigured matcher accepts anything
        let m = SanMatcher::new("", "").unwrap();
        assert!(m.matches("whatever"));
    }

    #[test]
    fn invalid_san_regex_fails_policy_build() {
        let mut criteria = EnforcementCriteria::for_release("t", "foo", "", "");
        criteria.san_regex = "(unclosed".to_string();
        let artifact = DigestedArtifact::for_release("v1", "abc", "sha1");
        match Policy::build(&criteria, &artifact) {
            Err(AttestationError::InvalidSanPattern(_)) => {}
            other => panic!("expected regex error, got {:?}", other.map(|_| ())),
        }
    }

    fn statement_with_digests(digests: &[(&str, &str)]) -> Statement {
        serde_json::from_value(serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": digests
                .iter()
                .map(|(alg, d)| serde_json::json!({"name": "s", "digest": {*alg: *d}}))
                .collect::<Vec<_>>(),
            "predicateType": "t",
            "predicate": {}
        }))
        .unwrap()
    }

    #[test]
    fn subject_digest_policy_matches_by_algorithm() {
        let criteria = EnforcementCriteria::default();
        let artifact = DigestedArtifact::for_release("v1", "abc", "sha1");
        let policy = Policy::build(&criteria, &artifact).unwrap();

        let ok = statement_with_digests(&[("sha256", "zzz"), ("sha1", "abc")]);
        policy.verify_subject_digest(&ok).unwrap();

        // Same digest under a different algorithm must not match
        let wrong_alg = statement_with_digests(&[("sha256", "abc")]);
        assert!(policy.verify_subject_digest(&wrong_alg).is_err());
    }

    #[test]
    fn certificate_identity_enforces_extensions() {
        let mut criteria = EnforcementCriteria::for_release("t", "foo", "foo/bar", "");
        criteria.san = "https://dotcom.releases.github.com".to_string();
        let artifact = DigestedArtifact::for_release("v1", "abc", "sha1");
        let policy = Policy::build(&criteria, &artifact).unwrap();

        let mut summary = CertificateSummary {
            subject_alternative_names: vec!["https://dotcom.releases.github.com".to_string()],
            source_repository_uri: "https://github.com/foo/bar".to_string(),
            source_repository_owner_uri: "https://github.com/foo".to_string(),
            ..Default::default()
        };
        policy.verify_certificate_identity(&summary).unwrap();

        summary.source_repository_uri = "https://github.com/evil/bar".to_string();
        assert!(policy.verify_certificate_identity(&summary).is_err());

        summary.source_repository_uri = "https://github.com/foo/bar".to_string();
        summary.subject_alternative_names = vec!["https://elsewhere".to_string()];
        assert!(policy.verify_certificate_identity(&summary).is_err());
    }

    #[test]
    fn der_strings_decode_both_encodings() {
        let mut der = vec![0x0c, 5];
        der.extend_from_slice(b"hello");
        assert_eq!(der_string(&der), "hello");
        assert_eq!(der_string(b"raw-bytes"), "raw-bytes");
    }
}
