//! Code replacement, one handler per install flavor.
//!
//! - [`GitUpdate`] pulls (or checks out the pinned tag) in a git checkout
//! - [`ArchiveUpdate`] downloads the release tarball and overlays it onto the tree
//!
//! Both finish by resolving PHP dependencies with composer when the tree needs it.
//! [`UpdateStrategy::for_install`] picks the handler from [`InstallFacts::flavor`].

pub mod archive;
pub mod git;

pub use archive::ArchiveUpdate;
pub use git::GitUpdate;

use anyhow::Result;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::install::{Flavor, InstallFacts};
use crate::process::ProcessCommand;
use crate::release::ReleaseFacts;

/// Replaces the code of an install with a release.
pub trait CodeUpdater: Send + Sync {
    fn update(
        &self,
        facts: &InstallFacts,
        release: &ReleaseFacts,
    ) -> impl Future<Output = Result<()>> + Send;
}

pub enum UpdateStrategy {
    Git(GitUpdate),
    Archive(ArchiveUpdate),
}

impl UpdateStrategy {
    /// The handler matching the install's flavor.
    pub fn for_install(facts: &InstallFacts, config: &RunConfig) -> Result<Self> {
        Ok(match facts.flavor {
            Flavor::Git => Self::Git(GitUpdate::new(config)),
            Flavor::Archive => Self::Archive(ArchiveUpdate::new(config)?),
        })
    }

    #[must_use]
    pub const fn flavor(&self) -> Flavor {
        match self {
            Self::Git(_) => Flavor::Git,
            Self::Archive(_) => Flavor::Archive,
        }
    }
}

impl CodeUpdater for UpdateStrategy {
    async fn update(&self, facts: &InstallFacts, release: &ReleaseFacts) -> Result<()> {
        debug!(target: "upgrade", "Updating {} install to {}", self.flavor(), release.version);
        match self {
            Self::Git(git) => git.update(facts, release).await,
            Self::Archive(archive) => archive.update(facts, release).await,
        }
    }
}

/// `composer install --no-dev --no-interaction` in `root`, if it has a `composer.json`.
pub(crate) async fn composer_install(root: &Path, composer: &str, timeout: Duration) -> Result<()> {
    if !root.join("composer.json").is_file() {
        debug!(target: "upgrade", "No composer.json in {}, skipping composer", root.display());
        return Ok(());
    }

    info!(target: "upgrade", "Resolving PHP dependencies with composer");
    ProcessCommand::new(composer)
        .args(["install", "--no-dev", "--no-interaction"])
        .current_dir(root)
        .with_timeout(timeout)
        .with_context("composer")
        .execute_success()
        .await
}
