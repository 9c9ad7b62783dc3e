//! Checks on a downloaded release before it touches the live install.
//!
//! The registry publishes no checksums for source tarballs, so the SHA-256 is only
//! computed and logged for the operator's records. What is enforced is structural:
//! the download must be a non-empty, readable gzip tar with at least one entry, and
//! the extracted tree must carry a version marker matching the release.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use semver::Version;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::path::Path;
use tar::Archive;
use tokio::fs;
use tracing::{debug, info};

use crate::core::UpgradeError;
use crate::install::{VERSION_MARKER, read_version_marker};
use crate::version::parse_version;

/// Facts about a validated release tarball.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveDigest {
    /// `sha256:<hex>`.
    pub sha256: String,
    pub size: u64,
    pub entries: usize,
}

pub struct ArtifactVerifier;

impl ArtifactVerifier {
    pub async fn compute_sha256(file_path: &Path) -> Result<String> {
        debug!("Computing SHA256 checksum for: {}", file_path.display());

        let contents = fs::read(file_path)
            .await
            .with_context(|| format!("Failed to read file: {}", file_path.display()))?;

        let mut hasher = Sha256::new();
        hasher.update(&contents);
        let result = hasher.finalize();

        Ok(format!("sha256:{result:x}"))
    }

    /// Validate a downloaded tarball and log its checksum.
    pub async fn verify_archive(archive: &Path) -> Result<ArchiveDigest> {
        let size = fs::metadata(archive)
            .await
            .map_err(|e| invalid_archive(archive, &e.to_string()))?
            .len();
        if size == 0 {
            return Err(invalid_archive(archive, "file is empty").into());
        }

        let path = archive.to_path_buf();
        let entries = tokio::task::spawn_blocking(move || count_entries(&path))
            .await
            .context("Archive inspection task panicked")??;
        if entries == 0 {
            return Err(invalid_archive(archive, "archive has no entries").into());
        }

        let sha256 = Self::compute_sha256(archive).await?;
        info!(
            target: "upgrade",
            "Release archive {} ({} bytes, {} entries) {}",
            archive.display(),
            size,
            entries,
            sha256
        );

        Ok(ArchiveDigest {
            sha256,
            size,
            entries,
        })
    }

    /// Check that an extracted release carries the expected version.
    ///
    /// Only major.minor.patch are compared; the marker may carry a build number that
    /// the release tag does not.
    pub fn verify_extracted_version(tree: &Path, expected: &Version) -> Result<Version> {
        let raw = read_version_marker(tree)?.ok_or_else(|| UpgradeError::UpdateFailed {
            operation: "verifying extracted release".to_string(),
            reason: format!("{} has no {VERSION_MARKER}", tree.display()),
        })?;
        let found = parse_version(&raw).map_err(|e| UpgradeError::UpdateFailed {
            operation: "verifying extracted release".to_string(),
            reason: format!("unreadable version '{raw}': {e}"),
        })?;

        if (found.major, found.minor, found.patch) != (expected.major, expected.minor, expected.patch) {
            return Err(UpgradeError::UpdateFailed {
                operation: "verifying extracted release".to_string(),
                reason: format!("archive contains {found}, expected {expected}"),
            }
            .into());
        }

        debug!(target: "upgrade", "Extracted release carries version {}", found);
        Ok(found)
    }
}

fn count_entries(archive: &Path) -> Result<usize> {
    let file = File::open(archive).map_err(|e| invalid_archive(archive, &e.to_string()))?;
    let mut tar = Archive::new(GzDecoder::new(file));
    let entries = tar.entries().map_err(|e| invalid_archive(archive, &e.to_string()))?;

    let mut count = 0;
    for entry in entries {
        entry.map_err(|e| invalid_archive(archive, &e.to_string()))?;
        count += 1;
    }
    Ok(count)
}

fn invalid_archive(archive: &Path, reason: &str) -> UpgradeError {
    UpgradeError::UpdateFailed {
        operation: format!("validating {}", archive.display()),
        reason: reason.to_string(),
    }
}
