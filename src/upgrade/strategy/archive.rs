//! Updates for installs unpacked from a release tarball.
//!
//! The sequence is:
//!
//! 1. refuse downgrades and installs older than the minimum supported version
//! 2. download the release tarball into the scratch area
//! 3. validate it (see [`ArtifactVerifier`])
//! 4. recreate the extraction directory and unpack the tarball into it
//! 5. check that the unpacked tree carries the release version
//! 6. copy the unpacked tree over the live install, keeping install-local state
//! 7. remove files the release no longer ships
//! 8. run `composer install` when the release has a `composer.json`
//!
//! Nothing in the live install is touched before step 6. Steps 6 to 8 are idempotent,
//! so an interrupted update can be repeated.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use semver::Version;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tar::Archive;
use tokio::fs;
use tracing::{debug, info};

use super::{CodeUpdater, composer_install};
use crate::config::RunConfig;
use crate::core::UpgradeError;
use crate::install::{DatabaseDriver, InstallFacts, VERSION_MARKER};
use crate::release::ReleaseFacts;
use crate::upgrade::maintenance::SENTINEL;
use crate::upgrade::verification::ArtifactVerifier;
use crate::utils::fs::{copy_dir, ensure_dir, prune_missing, reset_dir};
use crate::version::compare;

/// Install-local paths the overlay never replaces.
pub const PRESERVED_PATHS: &[&str] = &[".env", "local", "app/db", SENTINEL];

/// Paths the release tarball does not manage; never removed from the live install.
/// `build` holds this tool.
pub const UNMANAGED_PATHS: &[&str] = &["vendor", "storage", "build"];

pub struct ArchiveUpdate {
    client: reqwest::Client,
    download_path: PathBuf,
    extract_dir: PathBuf,
    minimum_version: Version,
    backup_dir: PathBuf,
    composer: String,
    timeout: Duration,
}

impl ArchiveUpdate {
    pub fn new(config: &RunConfig) -> Result<Self> {
        let settings = &config.settings;
        let client = reqwest::Client::builder()
            .user_agent(settings.release.user_agent.clone())
            .connect_timeout(settings.timeouts.network())
            .timeout(settings.timeouts.process())
            .build()
            .map_err(|e| UpgradeError::NetworkError {
                operation: "building HTTP client".to_string(),
                reason: e.to_string(),
            })?;

        Ok(Self {
            client,
            download_path: config.download_path(),
            extract_dir: config.extract_dir(),
            minimum_version: settings.release.minimum_archive_version()?,
            backup_dir: config.backup_dir.clone(),
            composer: settings.tools.composer.clone(),
            timeout: settings.timeouts.process(),
        })
    }

    /// Refuse anything but a forward move from a supported version.
    pub fn guard(&self, installed: &Version, target: &Version) -> Result<()> {
        if compare(installed, target).is_gt() {
            return Err(UpgradeError::UpdateRefused {
                reason: format!("installed version {installed} is newer than release {target}"),
            }
            .into());
        }
        if compare(installed, &self.minimum_version).is_lt() {
            return Err(UpgradeError::UpdateRefused {
                reason: format!(
                    "installed version {installed} is older than {}, the oldest version that can be upgraded from an archive",
                    self.minimum_version
                ),
            }
            .into());
        }
        Ok(())
    }

    /// Fetch the tarball to the scratch download path.
    ///
    /// `file://` URLs are copied from disk, for mirrored or offline releases.
    pub async fn download(&self, url: &str) -> Result<PathBuf> {
        if let Some(parent) = self.download_path.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        if let Some(source) = local_source(url) {
            info!(target: "upgrade", "Copying release archive from {}", source.display());
            fs::copy(&source, &self.download_path).await.map_err(|e| UpgradeError::UpdateFailed {
                operation: format!("copying {}", source.display()),
                reason: e.to_string(),
            })?;
            return Ok(self.download_path.clone());
        }

        info!(target: "upgrade", "Downloading release archive from {}", url);
        let network_error = |reason: String| UpgradeError::NetworkError {
            operation: format!("GET {url}"),
            reason,
        };
        let response = self.client.get(url).send().await.map_err(|e| network_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(network_error(format!("HTTP {status}")).into());
        }
        let bytes = response.bytes().await.map_err(|e| network_error(e.to_string()))?;

        fs::write(&self.download_path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", self.download_path.display()))?;
        debug!(target: "upgrade", "Downloaded {} bytes to {}", bytes.len(), self.download_path.display());
        Ok(self.download_path.clone())
    }

    /// Unpack into a freshly recreated extraction directory and return the release root.
    pub async fn extract(&self, archive: &Path) -> Result<PathBuf> {
        let archive = archive.to_path_buf();
        let extract_dir = self.extract_dir.clone();

        tokio::task::spawn_blocking(move || {
            reset_dir(&extract_dir)?;
            unpack(&archive, &extract_dir)?;
            release_root(&extract_dir)
        })
        .await
        .context("Extraction task panicked")?
    }

    /// Make the live install match the release tree.
    ///
    /// Release files are copied over the install, skipping [`PRESERVED_PATHS`] and
    /// `retained` (paths relative to the install root). Live files the release does not
    /// ship are then removed, except those paths and [`UNMANAGED_PATHS`].
    pub async fn overlay(&self, release_root: &Path, install_root: &Path, retained: &[PathBuf]) -> Result<()> {
        let source = release_root.to_path_buf();
        let target = install_root.to_path_buf();
        let retained = retained.to_vec();

        let (stats, removed) = tokio::task::spawn_blocking(move || -> Result<_> {
            ensure_dir(&target)?;
            let stats = copy_dir(&source, &target, |rel| is_preserved(rel) || retained.iter().any(|r| rel == r))?;
            let removed = prune_missing(&target, &source, |rel| {
                is_preserved(rel) || is_unmanaged(rel) || retained.iter().any(|r| rel == r)
            })?;
            Ok((stats, removed))
        })
        .await
        .context("Overlay task panicked")?
        .map_err(|e| UpgradeError::UpdateFailed {
            operation: format!("replacing files in {}", install_root.display()),
            reason: format!("{e:#}"),
        })?;

        info!(
            target: "upgrade",
            "Replaced {} files ({} bytes) and removed {} obsolete entries in {}",
            stats.files,
            stats.bytes,
            removed,
            install_root.display()
        );
        Ok(())
    }

    /// Install-relative paths that hold state this run must not lose: a sqlite
    /// datastore outside `app/db` and a backup directory inside the install.
    fn retained_paths(&self, facts: &InstallFacts) -> Vec<PathBuf> {
        let sqlite = (facts.database.driver == DatabaseDriver::Sqlite).then_some(facts.database.sqlite_path.as_path());

        sqlite
            .into_iter()
            .chain([self.backup_dir.as_path()])
            .filter_map(|path| path.strip_prefix(&facts.root).ok())
            .filter(|rel| !rel.as_os_str().is_empty())
            .map(Path::to_path_buf)
            .collect()
    }
}

impl CodeUpdater for ArchiveUpdate {
    async fn update(&self, facts: &InstallFacts, release: &ReleaseFacts) -> Result<()> {
        self.guard(&facts.installed_version, &release.version)?;
        if self.backup_dir == facts.root {
            return Err(UpgradeError::UpdateRefused {
                reason: format!(
                    "backups are written to the install root {}, where they would be pruned; choose another --backup-dir",
                    facts.root.display()
                ),
            }
            .into());
        }

        let archive = self.download(&release.tarball_url).await?;
        ArtifactVerifier::verify_archive(&archive).await?;

        let release_root = self.extract(&archive).await?;
        ArtifactVerifier::verify_extracted_version(&release_root, &release.version)?;

        self.overlay(&release_root, &facts.root, &self.retained_paths(facts)).await?;
        composer_install(&facts.root, &self.composer, self.timeout).await
    }
}

fn local_source(url: &str) -> Option<PathBuf> {
    let parsed = reqwest::Url::parse(url).ok()?;
    if parsed.scheme() == "file" {
        parsed.to_file_path().ok()
    } else {
        None
    }
}

fn unpack(archive: &Path, dest: &Path) -> Result<()> {
    let file = File::open(archive).with_context(|| format!("opening release archive {}", archive.display()))?;
    let mut tar = Archive::new(GzDecoder::new(file));
    tar.unpack(dest).map_err(|e| UpgradeError::UpdateFailed {
        operation: format!("extracting {} into {}", archive.display(), dest.display()),
        reason: e.to_string(),
    })?;
    Ok(())
}

/// GitHub tarballs wrap the tree in a single `<owner>-<repo>-<sha>/` directory.
fn release_root(extract_dir: &Path) -> Result<PathBuf> {
    if extract_dir.join(VERSION_MARKER).is_file() {
        return Ok(extract_dir.to_path_buf());
    }

    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(extract_dir).with_context(|| format!("reading {}", extract_dir.display()))? {
        let path = entry?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }

    match dirs.as_slice() {
        [single] => Ok(single.clone()),
        _ => Ok(extract_dir.to_path_buf()),
    }
}

fn is_preserved(rel: &Path) -> bool {
    PRESERVED_PATHS.iter().any(|preserved| rel == Path::new(preserved))
}

fn is_unmanaged(rel: &Path) -> bool {
    UNMANAGED_PATHS.iter().any(|unmanaged| rel == Path::new(unmanaged))
}
