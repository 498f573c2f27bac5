//! Cryptographic verification of a single bundle against one trusted root.

use crate::api::{Attestation, DsseEnvelope, SigstoreBundle};
use crate::bundle;
use crate::policy::{CertificateSummary, Policy};
use crate::trust::TrustedRoot;
use crate::verify::{BundleVerifier, Requirements, VerificationResult};
use crate::{AttestationError, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, NaiveDateTime, Utc};
use ed25519_dalek::{Signature as Ed25519Signature, VerifyingKey as Ed25519VerifyingKey};
use log::debug;
use p256::ecdsa::{
    signature::Verifier as P256Verifier, Signature as P256Signature,
    VerifyingKey as P256VerifyingKey,
};
use p256::pkcs8::DecodePublicKey;
use p384::ecdsa::{Signature as P384Signature, VerifyingKey as P384VerifyingKey};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use x509_parser::prelude::*;

const OID_SCT_LIST: &str = "1.3.6.1.4.1.11129.2.4.2";

/// Verifies bundles signed under one Sigstore instance's trusted root.
pub struct TrustedRootVerifier {
    root: TrustedRoot,
    requirements: Requirements,
}

impl TrustedRootVerifier {
    pub fn new(root: TrustedRoot, requirements: Requirements) -> Self {
        Self { root, requirements }
    }

    pub fn requirements(&self) -> Requirements {
        self.requirements
    }

    /// The leaf must have been issued by one of the root's CAs: its issuer
    /// name must byte-match an issuing certificate's subject.
    fn verify_issuing_ca(&self, leaf: &X509Certificate<'_>) -> Result<()> {
        for ca_der in self.root.lowest_ca_cert_ders()? {
            let (_, ca) = X509Certificate::from_der(&ca_der).map_err(|e| {
                AttestationError::Verification(format!("Failed to parse CA certificate: {}", e))
            })?;
            if leaf.issuer().as_raw() == ca.subject().as_raw() {
                return Ok(());
            }
        }
        Err(AttestationError::Verification(
            "leaf certificate was not issued by a trusted certificate authority".into(),
        ))
    }

    fn check_requirements(&self, counts: &ProofCounts) -> Result<()> {
        let checks = [
            (
                counts.signed_certificate_timestamps,
                self.requirements.signed_certificate_timestamps,
                "signed certificate timestamps",
            ),
            (
                counts.transparency_log_entries,
                self.requirements.transparency_log_entries,
                "transparency log entries",
            ),
            (
                counts.observer_timestamps,
                self.requirements.observer_timestamps,
                "observer timestamps",
            ),
            (
                counts.signed_timestamps,
                self.requirements.signed_timestamps,
                "signed timestamps",
            ),
        ];
        for (have, want, what) in checks {
            if have < want {
                return Err(AttestationError::Verification(format!(
                    "bundle carries {} {} but {} required",
                    have, what, want
                )));
            }
        }
        Ok(())
    }

    fn collect_proofs(
        &self,
        bundle: &SigstoreBundle,
        leaf: &X509Certificate<'_>,
    ) -> Result<ProofCounts> {
        let mut counts = ProofCounts::default();

        if leaf
            .extensions()
            .iter()
            .any(|ext| ext.oid.to_string() == OID_SCT_LIST)
        {
            counts.signed_certificate_timestamps = 1;
        }

        let Some(vm) = &bundle.verification_material else {
            return Ok(counts);
        };

        let rekor_keys = self.root.rekor_keys()?;
        for entry in &vm.tlog_entries {
            if qualify_tlog_entry(entry, &rekor_keys)? {
                counts.transparency_log_entries += 1;
                if entry.get("integratedTime").is_some() {
                    counts.observer_timestamps += 1;
                }
            }
        }

        if let Some(ts_data) = &vm.timestamp_verification_data {
            for ts in &ts_data.rfc3161_timestamps {
                let blob = BASE64.decode(&ts.signed_timestamp).map_err(|e| {
                    AttestationError::Verification(format!("Failed to decode timestamp: {}", e))
                })?;
                match extract_generalized_time(&blob) {
                    Some(time) if self.root.is_timestamp_within_tsa_validity(time) => {
                        counts.signed_timestamps += 1;
                        counts.observer_timestamps += 1;
                    }
                    Some(time) => {
                        debug!("timestamp {} outside TSA validity, not counted", time);
                    }
                    None => {
                        debug!("no generalized time found in RFC 3161 blob, not counted");
                    }
                }
            }
        }

        Ok(counts)
    }
}

#[derive(Debug, Default)]
struct ProofCounts {
    signed_certificate_timestamps: usize,
    transparency_log_entries: usize,
    observer_timestamps: usize,
    signed_timestamps: usize,
}

impl BundleVerifier for TrustedRootVerifier {
    fn verify(&self, attestation: &Attestation, policy: &Policy) -> Result<VerificationResult> {
        let sigstore_bundle = &attestation.bundle;
        let envelope = sigstore_bundle
            .dsse_envelope
            .as_ref()
            .ok_or_else(|| AttestationError::Verification("No DSSE envelope found in bundle".into()))?;

        let statement = bundle::parse_statement(attestation)?;
        policy.verify_subject_digest(&statement)?;

        let leaf_der = bundle::leaf_certificate_der(sigstore_bundle)?;
        let (_, leaf) = X509Certificate::from_der(&leaf_der).map_err(|e| {
            AttestationError::Verification(format!("Failed to parse certificate: {}", e))
        })?;

        let summary = CertificateSummary::from_certificate(&leaf);
        policy.verify_certificate_identity(&summary)?;
        self.verify_issuing_ca(&leaf)?;
        verify_envelope_signature(&leaf, envelope)?;

        let counts = self.collect_proofs(sigstore_bundle, &leaf)?;
        self.check_requirements(&counts)?;

        Ok(VerificationResult {
            statement,
            certificate: summary,
            transparency_log_entries: counts.transparency_log_entries,
            signed_certificate_timestamps: counts.signed_certificate_timestamps,
            observer_timestamps: counts.observer_timestamps,
            signed_timestamps: counts.signed_timestamps,
        })
    }
}

/// Verify the DSSE signature over the envelope's pre-authentication encoding
/// with the leaf certificate's public key. At least one signature must verify.
fn verify_envelope_signature(leaf: &X509Certificate<'_>, envelope: &DsseEnvelope) -> Result<()> {
    if envelope.signatures.is_empty() {
        return Err(AttestationError::Verification(
            "DSSE envelope has no signatures".into(),
        ));
    }

    let payload = bundle::decode_payload(envelope)?;
    let pae = bundle::pae(&envelope.payload_type, &payload);

    let mut last_error = None;
    for signature in &envelope.signatures {
        let sig_bytes = BASE64.decode(&signature.sig).map_err(|e| {
            AttestationError::Verification(format!("Failed to decode signature: {}", e))
        })?;
        match verify_raw_signature(leaf.public_key(), &sig_bytes, &pae) {
            Ok(()) => return Ok(()),
            Err(e) => last_error = Some(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        AttestationError::Verification("DSSE signature verification failed".into())
    }))
}

fn verify_raw_signature(
    public_key: &SubjectPublicKeyInfo,
    signature: &[u8],
    message: &[u8],
) -> Result<()> {
    match public_key.algorithm.algorithm.to_string().as_str() {
        // EC public key (P-256 or P-384)
        "1.2.840.10045.2.1" => verify_ecdsa_signature(public_key, signature, message),
        // Ed25519
        "1.3.101.112" => verify_ed25519_signature(public_key, signature, message),
        // RSA is not issued by any supported instance
        "1.2.840.113549.1.1.1" => Err(AttestationError::Verification(
            "RSA signing certificates are not supported".into(),
        )),
        other => Err(AttestationError::Verification(format!(
            "Unsupported signature algorithm: {}",
            other
        ))),
    }
}

fn verify_ecdsa_signature(
    public_key_info: &SubjectPublicKeyInfo,
    signature: &[u8],
    message: &[u8],
) -> Result<()> {
    let public_key_bytes: &[u8] = public_key_info.subject_public_key.data.as_ref();

    let curve_oid = match &public_key_info.algorithm.parameters {
        Some(params) => params
            .as_oid()
            .map_err(|e| {
                AttestationError::Verification(format!("Failed to parse curve OID: {}", e))
            })?
            .to_string(),
        // P-256 is what Fulcio issues; assume it when parameters are absent
        None => "1.2.840.10045.3.1.7".to_string(),
    };

    match curve_oid.as_str() {
        // P-256 / secp256r1
        "1.2.840.10045.3.1.7" => {
            let verifying_key = P256VerifyingKey::from_sec1_bytes(public_key_bytes).map_err(|e| {
                AttestationError::Verification(format!("Failed to parse P-256 public key: {}", e))
            })?;
            let signature = P256Signature::from_der(signature)
                .or_else(|_| P256Signature::from_bytes(signature.into()))
                .map_err(|e| {
                    AttestationError::Verification(format!("Failed to parse P-256 signature: {}", e))
                })?;
            verifying_key.verify(message, &signature).map_err(|e| {
                AttestationError::Verification(format!("P-256 signature verification failed: {}", e))
            })
        }
        // P-384 / secp384r1
        "1.3.132.0.34" => {
            let verifying_key = P384VerifyingKey::from_sec1_bytes(public_key_bytes).map_err(|e| {
                AttestationError::Verification(format!("Failed to parse P-384 public key: {}", e))
            })?;
            let signature = P384Signature::from_der(signature)
                .or_else(|_| P384Signature::from_bytes(signature.into()))
                .map_err(|e| {
                    AttestationError::Verification(format!("Failed to parse P-384 signature: {}", e))
                })?;
            use p384::ecdsa::signature::Verifier;
            verifying_key.verify(message, &signature).map_err(|e| {
                AttestationError::Verification(format!("P-384 signature verification failed: {}", e))
            })
        }
        other => Err(AttestationError::Verification(format!(
            "Unsupported EC curve: {}",
            other
        ))),
    }
}

fn verify_ed25519_signature(
    public_key_info: &SubjectPublicKeyInfo,
    signature: &[u8],
    message: &[u8],
) -> Result<()> {
    let public_key_bytes: &[u8] = public_key_info.subject_public_key.data.as_ref();
    let key_bytes: [u8; 32] = public_key_bytes.try_into().map_err(|_| {
        AttestationError::Verification(format!(
            "Invalid Ed25519 public key length: {} (expected 32)",
            public_key_bytes.len()
        ))
    })?;
    let verifying_key = Ed25519VerifyingKey::from_bytes(&key_bytes).map_err(|e| {
        AttestationError::Verification(format!("Failed to parse Ed25519 public key: {}", e))
    })?;

    let sig_bytes: [u8; 64] = signature.try_into().map_err(|_| {
        AttestationError::Verification(format!(
            "Invalid Ed25519 signature length: {} (expected 64)",
            signature.len()
        ))
    })?;
    let signature = Ed25519Signature::from_bytes(&sig_bytes);

    use ed25519_dalek::Verifier;
    verifying_key.verify(message, &signature).map_err(|e| {
        AttestationError::Verification(format!("Ed25519 signature verification failed: {}", e))
    })
}

/// Whether a transparency log entry counts toward the requirements: its log
/// must be known to the trusted root, and any inclusion proof or promise it
/// carries must verify.
fn qualify_tlog_entry(
    entry: &serde_json::Value,
    rekor_keys: &HashMap<String, Vec<u8>>,
) -> Result<bool> {
    let Some(key_id) = entry
        .get("logId")
        .and_then(|l| l.get("keyId"))
        .and_then(|k| k.as_str())
    else {
        debug!("tlog entry has no log id, not counted");
        return Ok(false);
    };
    let Some(rekor_key) = rekor_keys.get(key_id) else {
        debug!("tlog entry from unknown log {}, not counted", key_id);
        return Ok(false);
    };

    let canonicalized_body = entry
        .get("canonicalizedBody")
        .and_then(|v| v.as_str())
        .unwrap_or_default();

    if let Some(proof) = entry.get("inclusionProof") {
        let log_index = json_i64(proof.get("logIndex"))
            .or_else(|| json_i64(entry.get("logIndex")))
            .ok_or_else(|| {
                AttestationError::Verification("No log index in inclusion proof".into())
            })?;
        let tree_size = json_i64(proof.get("treeSize")).ok_or_else(|| {
            AttestationError::Verification("No tree size in inclusion proof".into())
        })?;
        let root_hash = proof
            .get("rootHash")
            .and_then(|v| v.as_str())
            .ok_or_else(|| {
                AttestationError::Verification("No root hash in inclusion proof".into())
            })?;
        let hashes = proof
            .get("hashes")
            .and_then(|v| v.as_array())
            .ok_or_else(|| AttestationError::Verification("No hashes in inclusion proof".into()))?;

        if let Err(e) =
            verify_merkle_inclusion_proof(canonicalized_body, log_index, tree_size, root_hash, hashes)
        {
            debug!("inclusion proof failed, entry not counted: {}", e);
            return Ok(false);
        }
    }

    if let Some(promise) = entry.get("inclusionPromise") {
        let set = promise
            .get("signedEntryTimestamp")
            .and_then(|v| v.as_str())
            .ok_or_else(|| AttestationError::Verification("No signed entry timestamp".into()))?;
        let integrated_time = json_i64(entry.get("integratedTime")).ok_or_else(|| {
            AttestationError::Verification("No integrated time in tlog entry".into())
        })?;
        if let Err(e) =
            verify_signed_entry_timestamp(set, canonicalized_body, integrated_time, rekor_key)
        {
            debug!("signed entry timestamp failed, entry not counted: {}", e);
            return Ok(false);
        }
    }

    Ok(true)
}

/// Bundle JSON carries 64-bit values as strings.
fn json_i64(v: Option<&serde_json::Value>) -> Option<i64> {
    let v = v?;
    v.as_i64()
        .or_else(|| v.as_str().and_then(|s| s.parse().ok()))
}

/// RFC 6962 Merkle tree inclusion proof.
fn verify_merkle_inclusion_proof(
    entry_data: &str,
    leaf_index: i64,
    tree_size: i64,
    root_hash: &str,
    proof_hashes: &[serde_json::Value],
) -> Result<()> {
    let entry_bytes = BASE64.decode(entry_data).map_err(|e| {
        AttestationError::Verification(format!("Failed to decode entry data: {}", e))
    })?;
    let expected_root = BASE64
        .decode(root_hash)
        .map_err(|e| AttestationError::Verification(format!("Failed to decode root hash: {}", e)))?;

    let mut proof_nodes: Vec<Vec<u8>> = Vec::new();
    for hash in proof_hashes {
        if let Some(hash_str) = hash.as_str() {
            let hash_bytes = BASE64.decode(hash_str).map_err(|e| {
                AttestationError::Verification(format!("Failed to decode proof hash: {}", e))
            })?;
            proof_nodes.push(hash_bytes);
        }
    }

    // Leaf node prefix 0x00
    let mut leaf_hasher = Sha256::new();
    leaf_hasher.update([0x00]);
    leaf_hasher.update(&entry_bytes);
    let mut current_hash = leaf_hasher.finalize().to_vec();

    let mut index = leaf_index;
    let mut size = tree_size;

    for proof_node in &proof_nodes {
        // Interior node prefix 0x01; sibling side depends on position
        let mut hasher = Sha256::new();
        hasher.update([0x01]);
        if index % 2 == 1 || index == size - 1 {
            hasher.update(proof_node);
            hasher.update(&current_hash);
        } else {
            hasher.update(&current_hash);
            hasher.update(proof_node);
        }
        current_hash = hasher.finalize().to_vec();

        index /= 2;
        size = (size + 1) / 2;
    }

    if current_hash != expected_root {
        return Err(AttestationError::Verification(
            "Merkle inclusion proof verification failed: root hash mismatch".into(),
        ));
    }
    Ok(())
}

/// Signed entry timestamp: the log's signature over the entry body and its
/// integration time.
fn verify_signed_entry_timestamp(
    signed_timestamp_b64: &str,
    canonicalized_body: &str,
    integrated_time: i64,
    rekor_key_spki: &[u8],
) -> Result<()> {
    let signature_bytes = BASE64
        .decode(signed_timestamp_b64)
        .map_err(|e| AttestationError::Verification(format!("Failed to decode SET: {}", e)))?;
    let body_bytes = BASE64
        .decode(canonicalized_body)
        .map_err(|e| AttestationError::Verification(format!("Failed to decode body: {}", e)))?;

    let mut message = Vec::new();
    message.extend_from_slice(&body_bytes);
    message.extend_from_slice(&integrated_time.to_le_bytes());
    let message_hash = Sha256::digest(&message);

    let verifying_key = P256VerifyingKey::from_public_key_der(rekor_key_spki).map_err(|e| {
        AttestationError::Verification(format!("Failed to parse Rekor public key: {}", e))
    })?;
    let sig = P256Signature::from_der(&signature_bytes)
        .or_else(|_| P256Signature::from_bytes(signature_bytes.as_slice().into()))
        .map_err(|e| AttestationError::Verification(format!("Failed to parse SET: {}", e)))?;

    verifying_key.verify(&message_hash, &sig).map_err(|e| {
        AttestationError::Verification(format!("SET verification failed: {}", e))
    })
}

/// Pull the first GeneralizedTime out of an RFC 3161 timestamp blob. Good
/// enough to place the timestamp against TSA validity windows without a full
/// ASN.1 walk.
fn extract_generalized_time(der: &[u8]) -> Option<DateTime<Utc>> {
    let pos = der.windows(2).position(|w| w[0] == 0x18 && w[1] == 0x0f)?;
    let time_bytes = der.get(pos + 2..pos + 17)?;
    let time_str = std::str::from_utf8(time_bytes).ok()?;
    let naive = NaiveDateTime::parse_from_str(time_str, "%Y%m%d%H%M%SZ").ok()?;
    Some(naive.and_utc())
}
