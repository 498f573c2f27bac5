use crate::api::{Attestation, DsseEnvelope, SigstoreBundle};
use crate::{AttestationError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use x509_parser::prelude::*;

/// Minimum bundle schema version carrying a full verification material
/// section; issuer extraction is undefined below it.
pub const MIN_BUNDLE_VERSION: (u32, u32) = (0, 2);

/// Parse the bundle version out of either media type form:
/// `application/vnd.dev.sigstore.bundle+json;version=0.2` or
/// `application/vnd.dev.sigstore.bundle.v0.3+json`.
pub fn bundle_version(media_type: &str) -> Option<(u32, u32)> {
    let raw = if let Some((_, v)) = media_type.split_once(";version=") {
        v
    } else {
        media_type
            .strip_prefix("application/vnd.dev.sigstore.bundle.v")?
            .strip_suffix("+json")?
    };
    let (major, minor) = raw.split_once('.')?;
    Some((major.parse().ok()?, minor.parse().ok()?))
}

/// Whether the bundle's schema version is at least `min`.
pub fn min_version(bundle: &SigstoreBundle, min: (u32, u32)) -> bool {
    match bundle_version(&bundle.media_type) {
        Some(v) => v >= min,
        None => false,
    }
}

/// DER bytes of the bundle's leaf signing certificate.
pub fn leaf_certificate_der(bundle: &SigstoreBundle) -> Result<Vec<u8>> {
    let vm = bundle
        .verification_material
        .as_ref()
        .ok_or_else(|| AttestationError::Verification("bundle has no verification material".into()))?;

    let encoded = if let Some(cert) = &vm.certificate {
        &cert.raw_bytes
    } else if let Some(chain) = &vm.x509_certificate_chain {
        &chain
            .certificates
            .first()
            .ok_or_else(|| AttestationError::Verification("certificate chain is empty".into()))?
            .raw_bytes
    } else {
        return Err(AttestationError::Verification("leaf cert not found".into()));
    };

    BASE64
        .decode(encoded)
        .map_err(|e| AttestationError::Verification(format!("Failed to decode certificate: {}", e)))
}

/// Organization of the leaf certificate's issuer, used to route the bundle to
/// a verifier. The bundle must meet the minimum schema version and the issuer
/// must carry exactly one organization; zero or more than one is ambiguous
/// trust.
pub fn extract_issuer_org(bundle: &SigstoreBundle) -> Result<String> {
    if !min_version(bundle, MIN_BUNDLE_VERSION) {
        return Err(AttestationError::UnsupportedBundleVersion(
            bundle.media_type.clone(),
        ));
    }

    let der = leaf_certificate_der(bundle)?;
    let (_, cert) = X509Certificate::from_der(&der).map_err(|e| {
        AttestationError::Verification(format!("Failed to parse certificate: {}", e))
    })?;

    let orgs: Vec<String> = cert
        .issuer()
        .iter_organization()
        .filter_map(|o| o.as_str().ok())
        .map(|s| s.to_string())
        .collect();

    if orgs.len() != 1 {
        return Err(AttestationError::Verification(
            "expected the leaf certificate issuer to only have one organization".into(),
        ));
    }
    Ok(orgs.into_iter().next().unwrap())
}

/// An in-toto statement as carried in the DSSE envelope payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Statement {
    #[serde(rename = "_type", default)]
    pub type_: String,
    #[serde(default)]
    pub subject: Vec<Subject>,
    #[serde(rename = "predicateType", default)]
    pub predicate_type: String,
    #[serde(default)]
    pub predicate: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subject {
    #[serde(default)]
    pub name: String,
    /// Digests keyed by algorithm, e.g. `sha256`
    #[serde(default)]
    pub digest: HashMap<String, String>,
}

impl Statement {
    /// A string field of the predicate, e.g. `tag` or `purl`.
    pub fn predicate_field(&self, key: &str) -> Option<&str> {
        self.predicate.get(key).and_then(|v| v.as_str())
    }
}

/// Decode the base64 DSSE payload.
pub fn decode_payload(envelope: &DsseEnvelope) -> Result<Vec<u8>> {
    BASE64
        .decode(&envelope.payload)
        .map_err(|e| AttestationError::Verification(format!("Failed to decode payload: {}", e)))
}

/// Parse the in-toto statement out of an attestation's DSSE envelope.
pub fn parse_statement(attestation: &Attestation) -> Result<Statement> {
    let envelope = attestation
        .bundle
        .dsse_envelope
        .as_ref()
        .ok_or_else(|| AttestationError::Verification("No DSSE envelope found in bundle".into()))?;
    let payload = decode_payload(envelope)?;
    let statement: Statement = serde_json::from_slice(&payload)?;
    Ok(statement)
}

/// Create the DSSE Pre-Authentication Encoding:
/// `DSSEv1 SP LEN(type) SP type SP LEN(payload) SP payload`
pub fn pae(payload_type: &str, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(b"DSSEv1");
    out.push(b' ');
    out.extend_from_slice(payload_type.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload_type.as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload.len().to_string().as_bytes());
    out.push(b' ');
    out.extend_from_slice(payload);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pae_matches_dsse_spec_vector() {
        let got = pae("application/example", b"hello world");
        assert_eq!(got, b"DSSEv1 19 application/example 11 hello world");
    }

    #[test]
    fn versions_parse_from_both_media_type_forms() {
        assert_eq!(
            bundle_version("application/vnd.dev.sigstore.bundle+json;version=0.1"),
            Some((0, 1))
        );
        assert_eq!(
            bundle_version("application/vnd.dev.sigstore.bundle+json;version=0.2"),
            Some((0, 2))
        );
        assert_eq!(
            bundle_version("application/vnd.dev.sigstore.bundle.v0.3+json"),
            Some((0, 3))
        );
        assert_eq!(bundle_version("application/json"), None);
    }

    fn bundle_with_media_type(media_type: &str) -> SigstoreBundle {
        SigstoreBundle {
            media_type: media_type.to_string(),
            verification_material: None,
            dsse_envelope: None,
        }
    }

    #[test]
    fn old_bundles_fail_the_version_gate() {
        let old = bundle_with_media_type("application/vnd.dev.sigstore.bundle+json;version=0.1");
        assert!(!min_version(&old, MIN_BUNDLE_VERSION));
        match extract_issuer_org(&old) {
            Err(AttestationError::UnsupportedBundleVersion(mt)) => {
                assert!(mt.contains("version=0.1"))
            }
            other => panic!("expected version error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn statement_parses_subjects_and_predicate() {
        let payload = serde_json::json!({
            "_type": "https://in-toto.io/Statement/v1",
            "subject": [
                {"name": "a", "digest": {"sha256": "aa"}},
                {"name": "b", "digest": {"sha1": "bb"}}
            ],
            "predicateType": "https://in-toto.io/attestation/release/v0.1",
            "predicate": {"tag": "v1.0.0", "purl": "pkg:github/foo/bar@v1.0.0"}
        });
        let statement: Statement = serde_json::from_value(payload).unwrap();
        assert_eq!(statement.subject.len(), 2);
        assert_eq!(statement.subject[0].digest["sha256"], "aa");
        assert_eq!(statement.predicate_field("tag"), Some("v1.0.0"));
        assert_eq!(statement.predicate_field("missing"), None);
    }
}
