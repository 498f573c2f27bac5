use crate::{AttestationError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// An artifact reduced to a digest under a known algorithm.
///
/// Release tags carry a sha1 git ref digest; file assets are hashed with
/// sha256. The digest is hex-encoded without the algorithm prefix.
#[derive(Debug, Clone, Serialize)]
pub struct DigestedArtifact {
    /// Display name: file path, or tag name for release refs
    pub url: String,
    pub digest: String,
    pub algorithm: String,
}

impl DigestedArtifact {
    /// Hash a file on disk with sha256.
    pub fn from_file(path: &Path) -> Result<Self> {
        let digest = calculate_file_digest(path)?;
        Ok(Self {
            url: path.to_string_lossy().to_string(),
            digest,
            algorithm: "sha256".to_string(),
        })
    }

    /// Wrap a release tag already resolved to a ref digest (typically sha1).
    pub fn for_release(tag_name: &str, digest: &str, algorithm: &str) -> Self {
        Self {
            url: tag_name.to_string(),
            digest: digest.to_string(),
            algorithm: algorithm.to_string(),
        }
    }

    /// Parse an `alg:hex` digest spec, e.g. `sha256:dffd60...`.
    pub fn from_digest_spec(name: &str, spec: &str) -> Result<Self> {
        match spec.split_once(':') {
            Some((algorithm, digest)) if !algorithm.is_empty() && !digest.is_empty() => Ok(Self {
                url: name.to_string(),
                digest: digest.to_string(),
                algorithm: algorithm.to_string(),
            }),
            _ => Err(AttestationError::InvalidDigest(spec.to_string())),
        }
    }

    /// Digest in the `alg:hex` form the attestations API expects.
    pub fn digest_with_alg(&self) -> String {
        format!("{}:{}", self.algorithm, self.digest)
    }
}

pub fn calculate_file_digest(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let bytes_read = file.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hex::encode(hasher.finalize()))
}
