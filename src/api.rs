use crate::{AttestationError, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, USER_AGENT};
use serde::{Deserialize, Serialize};

const GITHUB_API_URL: &str = "https://api.github.com";
const USER_AGENT_VALUE: &str = "attestation-verification/0.1.0";

/// Parameters for fetching attestations by subject digest.
#[derive(Debug, Clone, Serialize)]
pub struct FetchParams {
    /// Subject digest in `alg:hex` form
    pub digest: String,
    pub limit: usize,
    pub owner: String,
    /// `<owner>/<repo>`; when unset, attestations are fetched org-wide
    pub repo: Option<String>,
    pub predicate_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AttestationsResponse {
    attestations: Vec<RawAttestation>,
}

#[derive(Debug, Deserialize)]
struct RawAttestation {
    bundle: Option<SigstoreBundle>,
    bundle_url: Option<String>,
}

/// A signed Sigstore bundle plus the URL it was fetched from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attestation {
    pub bundle: SigstoreBundle,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bundle_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SigstoreBundle {
    pub media_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verification_material: Option<VerificationMaterial>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsse_envelope: Option<DsseEnvelope>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationMaterial {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<EncodedCertificate>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x509_certificate_chain: Option<CertificateChain>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tlog_entries: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp_verification_data: Option<TimestampVerificationData>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodedCertificate {
    /// Base64-encoded DER
    pub raw_bytes: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CertificateChain {
    #[serde(default)]
    pub certificates: Vec<EncodedCertificate>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimestampVerificationData {
    #[serde(default)]
    pub rfc3161_timestamps: Vec<Rfc3161Timestamp>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Rfc3161Timestamp {
    pub signed_timestamp: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DsseEnvelope {
    /// Base64-encoded in-toto statement
    pub payload: String,
    pub payload_type: String,
    pub signatures: Vec<Signature>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signature {
    pub sig: String,
    #[serde(default)]
    pub keyid: String,
}

#[derive(Debug, Deserialize)]
struct MetaResponse {
    domains: Option<MetaDomains>,
}

#[derive(Debug, Deserialize)]
struct MetaDomains {
    artifact_attestations: Option<ArtifactAttestationsMeta>,
}

#[derive(Debug, Deserialize)]
struct ArtifactAttestationsMeta {
    trust_domain: Option<String>,
}

/// Seam between verification and the GitHub attestations API, so callers can
/// substitute a mock client in tests.
#[async_trait]
pub trait AttestationFetcher: Send + Sync {
    async fn get_by_digest(&self, params: &FetchParams) -> Result<Vec<Attestation>>;

    /// Tenancy trust domain from the meta endpoint; empty when not tenanted.
    async fn get_trust_domain(&self) -> Result<String>;
}

#[derive(Debug, Clone)]
pub struct AttestationClient {
    client: reqwest::Client,
    base_url: String,
}

impl AttestationClient {
    pub fn new(token: Option<&str>) -> Result<Self> {
        Self::with_base_url(token, GITHUB_API_URL)
    }

    pub fn with_base_url(token: Option<&str>, base_url: impl Into<String>) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(USER_AGENT_VALUE));

        if let Some(token) = token {
            let auth_value = format!("Bearer {}", token);
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&auth_value)
                    .map_err(|e| AttestationError::Api(e.to_string()))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    async fn fetch_bundle(&self, bundle_url: &str) -> Result<Option<SigstoreBundle>> {
        let response = self.client.get(bundle_url).send().await?;
        if !response.status().is_success() {
            return Ok(None);
        }

        let snappy = response
            .headers()
            .get("content-type")
            .and_then(|h| h.to_str().ok())
            .map(|s| s.contains("application/x-snappy"))
            .unwrap_or(false);

        let bundle = if snappy {
            let bytes = response.bytes().await?;
            let decompressed = decompress_snappy(&bytes)?;
            serde_json::from_slice(&decompressed)?
        } else {
            response.json().await?
        };
        Ok(Some(bundle))
    }
}

#[async_trait]
impl AttestationFetcher for AttestationClient {
    async fn get_by_digest(&self, params: &FetchParams) -> Result<Vec<Attestation>> {
        let url = if let Some(repo) = &params.repo {
            format!(
                "{}/repos/{}/attestations/{}",
                self.base_url, repo, params.digest
            )
        } else {
            format!(
                "{}/orgs/{}/attestations/{}",
                self.base_url, params.owner, params.digest
            )
        };

        let mut query_params = vec![("per_page", params.limit.to_string())];
        if let Some(predicate_type) = &params.predicate_type {
            query_params.push(("predicate_type", predicate_type.clone()));
        }

        let response = self.client.get(&url).query(&query_params).send().await?;

        if !response.status().is_success() {
            let status = response.status();

            // 404 means no attestations exist for this subject
            if status == reqwest::StatusCode::NOT_FOUND {
                return Err(AttestationError::NoAttestationsFound);
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AttestationError::Api(format!(
                "GitHub API returned {}: {}",
                status, body
            )));
        }

        let attestations_response: AttestationsResponse = response.json().await?;

        // Inline bundles are used as-is; URL-only entries are downloaded
        let mut attestations = Vec::new();
        for att in attestations_response.attestations {
            if let Some(bundle) = att.bundle {
                attestations.push(Attestation {
                    bundle,
                    bundle_url: att.bundle_url,
                });
            } else if let Some(bundle_url) = &att.bundle_url {
                if let Some(bundle) = self.fetch_bundle(bundle_url).await? {
                    attestations.push(Attestation {
                        bundle,
                        bundle_url: att.bundle_url.clone(),
                    });
                }
            }
        }

        if attestations.is_empty() {
            return Err(AttestationError::NoAttestationsFound);
        }

        Ok(attestations)
    }

    async fn get_trust_domain(&self) -> Result<String> {
        let url = format!("{}/meta", self.base_url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(AttestationError::Api(format!(
                "GitHub API returned {}",
                response.status()
            )));
        }
        let meta: MetaResponse = response.json().await?;
        Ok(meta
            .domains
            .and_then(|d| d.artifact_attestations)
            .and_then(|a| a.trust_domain)
            .unwrap_or_default())
    }
}

fn decompress_snappy(bytes: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = snap::raw::Decoder::new();
    decoder
        .decompress_vec(bytes)
        .map_err(|e| AttestationError::Api(format!("Snappy decompression failed: {}", e)))
}
