//! Updates for installs that are git checkouts.

use anyhow::Result;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use super::{CodeUpdater, composer_install};
use crate::config::RunConfig;
use crate::core::UpgradeError;
use crate::install::{InstallFacts, read_version_marker};
use crate::process::ProcessCommand;
use crate::release::ReleaseFacts;

pub struct GitUpdate {
    git: String,
    composer: String,
    remote: String,
    /// Check out the release tag instead of pulling.
    pinned: bool,
    timeout: Duration,
}

impl GitUpdate {
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        Self {
            git: config.settings.tools.git.clone(),
            composer: config.settings.tools.composer.clone(),
            remote: config.settings.release.git_remote.clone(),
            pinned: config.target.is_pinned(),
            timeout: config.settings.timeouts.process(),
        }
    }

    fn git(&self, root: &Path) -> ProcessCommand {
        ProcessCommand::new(&self.git)
            .current_dir(root)
            .with_timeout(self.timeout)
            .with_context("git update")
    }

    async fn pull(&self, root: &Path) -> Result<()> {
        info!(target: "upgrade", "Pulling latest code from {}", self.remote);
        self.git(root).args(["pull", "--ff-only", self.remote.as_str()]).execute_success().await
    }

    async fn checkout(&self, root: &Path, tag: &str) -> Result<()> {
        info!(target: "upgrade", "Checking out {} from {}", tag, self.remote);
        self.git(root).args(["fetch", "--tags", self.remote.as_str()]).execute_success().await?;
        self.git(root).args(["checkout", tag]).execute_success().await
    }
}

impl CodeUpdater for GitUpdate {
    async fn update(&self, facts: &InstallFacts, release: &ReleaseFacts) -> Result<()> {
        let root = facts.root.as_path();

        let result = if self.pinned {
            self.checkout(root, &release.tag).await
        } else {
            self.pull(root).await
        };
        result.map_err(|e| UpgradeError::UpdateFailed {
            operation: format!("git update of {}", root.display()),
            reason: format!("{e:#}"),
        })?;

        composer_install(root, &self.composer, self.timeout).await?;

        if let Some(version) = read_version_marker(root)? {
            info!(target: "upgrade", "Code is now at {}", version);
        }
        Ok(())
    }
}
