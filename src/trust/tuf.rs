//! TUF resolution of trusted roots.
//!
//! Bootstrap root.json files for both repositories are embedded; all further
//! metadata is fetched and signature-verified by `tough` over HTTP.

use crate::trust::TrustedRoot;
use crate::{AttestationError, Result};
use std::path::{Path, PathBuf};
use tough::{HttpTransport, IntoVec, RepositoryLoader, TargetName};
use url::Url;

/// Sigstore public-good TUF repository.
pub const SIGSTORE_TUF_URL: &str = "https://tuf-repo-cdn.sigstore.dev";

/// GitHub's TUF repository for its private Sigstore instance.
pub const GITHUB_TUF_URL: &str = "https://tuf-repo.github.com";

const SIGSTORE_TUF_ROOT: &[u8] = include_bytes!("repository/sigstore-tuf-root.json");
const GITHUB_TUF_ROOT: &[u8] = include_bytes!("repository/github-tuf-root.json");

const TRUSTED_ROOT_TARGET: &str = "trusted_root.json";

/// Target name for the trusted root, which is tenant-scoped on GitHub's
/// repository when a trust domain is set.
pub fn github_trusted_root_target(trust_domain: &str) -> String {
    if trust_domain.is_empty() {
        TRUSTED_ROOT_TARGET.to_string()
    } else {
        format!("{}.trusted_root.json", trust_domain)
    }
}

/// Fetch and parse the public-good instance's trusted root.
pub async fn resolve_public_good(metadata_dir: Option<&Path>) -> Result<TrustedRoot> {
    let bytes = fetch_target(
        SIGSTORE_TUF_URL,
        SIGSTORE_TUF_ROOT,
        TRUSTED_ROOT_TARGET,
        metadata_dir,
    )
    .await?;
    parse_root(&bytes, TRUSTED_ROOT_TARGET)
}

/// Fetch and parse GitHub's trusted root, tenant-scoped by trust domain.
pub async fn resolve_github(trust_domain: &str, metadata_dir: Option<&Path>) -> Result<TrustedRoot> {
    let target = github_trusted_root_target(trust_domain);
    let bytes = fetch_target(GITHUB_TUF_URL, GITHUB_TUF_ROOT, &target, metadata_dir).await?;
    parse_root(&bytes, &target)
}

fn parse_root(bytes: &[u8], target: &str) -> Result<TrustedRoot> {
    let json = std::str::from_utf8(bytes)
        .map_err(|e| AttestationError::Tuf(format!("Invalid UTF-8 in {}: {}", target, e)))?;
    TrustedRoot::from_json(json)
}

async fn fetch_target(
    base_url: &str,
    root_json: &[u8],
    target_name: &str,
    metadata_dir: Option<&Path>,
) -> Result<Vec<u8>> {
    let metadata_url = Url::parse(base_url).map_err(|e| AttestationError::Tuf(e.to_string()))?;
    let targets_url = metadata_url
        .join("targets/")
        .map_err(|e| AttestationError::Tuf(e.to_string()))?;

    let root_bytes = root_json.to_vec();
    let mut loader = RepositoryLoader::new(&root_bytes, metadata_url, targets_url)
        .transport(HttpTransport::default());

    if let Some(dir) = metadata_dir {
        let cache_dir: PathBuf = dir.to_path_buf();
        tokio::fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| AttestationError::Tuf(format!("Failed to create cache directory: {}", e)))?;
        loader = loader.datastore(cache_dir);
    }

    let repo = loader
        .load()
        .await
        .map_err(|e| AttestationError::Tuf(format!("TUF repository load failed: {}", e)))?;

    let target = TargetName::new(target_name)
        .map_err(|e| AttestationError::Tuf(format!("Invalid target name: {}", e)))?;
    let stream = repo
        .read_target(&target)
        .await
        .map_err(|e| AttestationError::Tuf(format!("Failed to read target: {}", e)))?
        .ok_or_else(|| AttestationError::Tuf(format!("Target not found: {}", target_name)))?;

    stream
        .into_vec()
        .await
        .map_err(|e| AttestationError::Tuf(format!("Failed to read target contents: {}", e)))
}
