//! Sigstore trusted root material: the instance keys and certificate
//! authorities verification is anchored to.
//!
//! Roots come from three places: the Sigstore public-good TUF repository, the
//! GitHub TUF repository, or a caller-supplied JSONL file of custom roots
//! (one JSON trusted root per line).

pub mod tuf;

use crate::{AttestationError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use x509_parser::prelude::*;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrustedRoot {
    #[serde(default)]
    pub media_type: String,
    #[serde(default)]
    pub tlogs: Vec<TransparencyLog>,
    #[serde(default)]
    pub certificate_authorities: Vec<CertificateAuthority>,
    #[serde(default)]
    pub ctlogs: Vec<TransparencyLog>,
    #[serde(default)]
    pub timestamp_authorities: Vec<CertificateAuthority>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransparencyLog {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub hash_algorithm: String,
    pub public_key: Option<PublicKey>,
    pub log_id: Option<LogId>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicKey {
    /// Base64-encoded SPKI DER
    pub raw_bytes: Option<String>,
    #[serde(default)]
    pub key_details: String,
    pub valid_for: Option<TimeRange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogId {
    /// Base64-encoded sha256 of the log's public key
    pub key_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateAuthority {
    pub uri: Option<String>,
    pub cert_chain: Option<CertificateChain>,
    pub valid_for: Option<TimeRange>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateChain {
    #[serde(default)]
    pub certificates: Vec<EncodedCertificate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedCertificate {
    /// Base64-encoded DER
    pub raw_bytes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TrustedRoot {
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Whether this instance operates a transparency log. Custom instances
    /// without tlogs skip tlog entry requirements entirely.
    pub fn has_tlogs(&self) -> bool {
        !self.tlogs.is_empty()
    }

    /// DER bytes of every certificate in every CA chain.
    pub fn fulcio_cert_ders(&self) -> Result<Vec<Vec<u8>>> {
        let mut certs = Vec::new();
        for ca in &self.certificate_authorities {
            if let Some(chain) = &ca.cert_chain {
                for cert in &chain.certificates {
                    certs.push(decode_cert(&cert.raw_bytes)?);
                }
            }
        }
        Ok(certs)
    }

    /// DER of the lowest (leaf-most) certificate per CA chain. This is the
    /// certificate that directly issues signing certificates, so its subject
    /// is the issuer name to match leaves against.
    pub fn lowest_ca_cert_ders(&self) -> Result<Vec<Vec<u8>>> {
        let mut certs = Vec::new();
        for ca in &self.certificate_authorities {
            let Some(chain) = &ca.cert_chain else {
                continue;
            };
            if let Some(cert) = chain.certificates.first() {
                certs.push(decode_cert(&cert.raw_bytes)?);
            }
        }
        Ok(certs)
    }

    /// Issuer organization of each CA's lowest certificate, used to key
    /// custom verifiers by issuer. A root may declare several CAs with
    /// different organizations; a CA without an organization cannot be
    /// routed to and is skipped.
    pub fn ca_organizations(&self) -> Result<Vec<String>> {
        let mut orgs = Vec::new();
        for der in self.lowest_ca_cert_ders()? {
            let (_, cert) = X509Certificate::from_der(&der).map_err(|e| {
                AttestationError::Verification(format!("Failed to parse CA certificate: {}", e))
            })?;
            let org = cert
                .issuer()
                .iter_organization()
                .next()
                .and_then(|o| o.as_str().ok())
                .map(|s| s.to_string());
            match org {
                Some(org) => orgs.push(org),
                None => {
                    log::debug!("skipping certificate authority whose issuer has no organization")
                }
            }
        }
        Ok(orgs)
    }

    /// Rekor public keys (SPKI DER) keyed by base64 log key id.
    pub fn rekor_keys(&self) -> Result<HashMap<String, Vec<u8>>> {
        let mut keys = HashMap::new();
        for tlog in &self.tlogs {
            let (Some(log_id), Some(public_key)) = (&tlog.log_id, &tlog.public_key) else {
                continue;
            };
            if let Some(raw) = &public_key.raw_bytes {
                let spki = BASE64.decode(raw).map_err(|e| {
                    AttestationError::Verification(format!("Failed to decode tlog key: {}", e))
                })?;
                keys.insert(log_id.key_id.clone(), spki);
            }
        }
        Ok(keys)
    }

    /// Whether a timestamp falls inside some timestamp authority's validity
    /// window. Vacuously true when no TSAs are declared.
    pub fn is_timestamp_within_tsa_validity(&self, timestamp: DateTime<Utc>) -> bool {
        if self.timestamp_authorities.is_empty() {
            return true;
        }
        self.timestamp_authorities.iter().any(|tsa| {
            let Some(valid_for) = &tsa.valid_for else {
                return true;
            };
            let after_start = valid_for.start.map_or(true, |s| timestamp >= s);
            let before_end = valid_for.end.map_or(true, |e| timestamp <= e);
            after_start && before_end
        })
    }
}

fn decode_cert(raw: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(raw)
        .map_err(|e| AttestationError::Verification(format!("Failed to decode certificate: {}", e)))
}

/// Load custom trusted roots from a JSONL file, one trusted root per line.
/// Any malformed line fails the whole load; a root file is trust
/// configuration and must not be partially applied.
pub fn load_custom_roots(path: &Path) -> Result<Vec<TrustedRoot>> {
    let contents = std::fs::read_to_string(path)?;
    let mut roots = Vec::new();
    for (idx, line) in contents.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        let root: TrustedRoot = serde_json::from_str(line).map_err(|e| {
            AttestationError::Config(format!(
                "invalid trusted root on line {} of {}: {}",
                idx + 1,
                path.display(),
                e
            ))
        })?;
        roots.push(root);
    }
    if roots.is_empty() {
        return Err(AttestationError::Config(format!(
            "no trusted roots found in {}",
            path.display()
        )));
    }
    Ok(roots)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture(name: &str) -> std::path::PathBuf {
        Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/data")).join(name)
    }

    #[test]
    fn custom_roots_load_from_jsonl() {
        let roots = load_custom_roots(&fixture("custom_roots.jsonl")).unwrap();
        assert_eq!(roots.len(), 2);

        // First line declares a tlog; second does not
        assert!(roots[0].has_tlogs());
        assert!(!roots[1].has_tlogs());

        assert_eq!(roots[0].ca_organizations().unwrap(), vec!["sigstore.dev"]);
        assert_eq!(roots[1].ca_organizations().unwrap(), vec!["GitHub, Inc."]);
    }

    #[test]
    fn every_certificate_authority_contributes_an_organization() {
        let roots = load_custom_roots(&fixture("custom_root_multi_ca.jsonl")).unwrap();
        assert_eq!(
            roots[0].ca_organizations().unwrap(),
            vec!["sigstore.dev", "GitHub, Inc."]
        );
    }

    #[test]
    fn malformed_jsonl_line_is_fatal() {
        let err = load_custom_roots(&fixture("custom_roots_malformed.jsonl")).unwrap_err();
        match err {
            AttestationError::Config(msg) => assert!(msg.contains("line 2")),
            other => panic!("expected config error, got {:?}", other),
        }
    }

    #[test]
    fn ca_without_organization_is_skipped() {
        let roots = load_custom_roots(&fixture("custom_root_no_org.jsonl")).unwrap();
        assert!(roots[0].ca_organizations().unwrap().is_empty());
    }

    #[test]
    fn rekor_keys_are_keyed_by_log_id() {
        let roots = load_custom_roots(&fixture("custom_roots.jsonl")).unwrap();
        let keys = roots[0].rekor_keys().unwrap();
        assert_eq!(keys.len(), 1);
        let spki = keys
            .get("jD7lOlbGi10ul9PBajAoFey/Nh9rGlygoQU+j2v3a0A=")
            .unwrap();
        // SPKI DER for a P-256 key
        assert_eq!(spki.len(), 91);
    }

    #[test]
    fn tsa_validity_is_vacuous_without_authorities() {
        let root = TrustedRoot::default();
        assert!(root.is_timestamp_within_tsa_validity(Utc::now()));
    }

    #[test]
    fn tsa_validity_respects_time_range() {
        let root = TrustedRoot {
            timestamp_authorities: vec![CertificateAuthority {
                valid_for: Some(TimeRange {
                    start: Some(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()),
                    end: Some(Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap()),
                }),
                ..Default::default()
            }],
            ..Default::default()
        };
        let inside = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        let outside = Utc.with_ymd_and_hms(2026, 6, 1, 0, 0, 0).unwrap();
        assert!(root.is_timestamp_within_tsa_validity(inside));
        assert!(!root.is_timestamp_within_tsa_validity(outside));
    }
}
