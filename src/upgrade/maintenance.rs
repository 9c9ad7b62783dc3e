//! Maintenance mode of a MunkiReport install.
//!
//! The install is down while `storage/framework/down` exists. The file is an empty
//! marker; its content is never read.

use anyhow::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::core::UpgradeError;

/// Sentinel path relative to the install root.
pub const SENTINEL: &str = "storage/framework/down";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaintenanceGate {
    sentinel: PathBuf,
}

impl MaintenanceGate {
    #[must_use]
    pub fn for_install(root: &Path) -> Self {
        Self {
            sentinel: root.join(SENTINEL),
        }
    }

    #[must_use]
    pub fn sentinel_path(&self) -> &Path {
        &self.sentinel
    }

    #[must_use]
    pub fn is_engaged(&self) -> bool {
        self.sentinel.exists()
    }

    /// Take the install down. Engaging an engaged gate leaves it engaged.
    pub async fn engage(&self) -> Result<()> {
        if self.is_engaged() {
            debug!(target: "upgrade", "Maintenance sentinel already present at {}", self.sentinel.display());
            return Ok(());
        }

        if let Some(parent) = self.sentinel.parent() {
            fs::create_dir_all(parent).await.map_err(|e| self.failure("engage", &e))?;
        }
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.sentinel)
            .await
            .map_err(|e| self.failure("engage", &e))?;

        info!(target: "upgrade", "Maintenance mode on ({})", self.sentinel.display());
        Ok(())
    }

    /// Bring the install back up. Releasing a released gate is a no-op.
    pub async fn release(&self) -> Result<()> {
        match fs::remove_file(&self.sentinel).await {
            Ok(()) => {
                info!(target: "upgrade", "Maintenance mode off");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(target: "upgrade", "Maintenance sentinel already absent");
                Ok(())
            }
            Err(e) => Err(self.failure("release", &e).into()),
        }
    }

    fn failure(&self, operation: &str, error: &std::io::Error) -> UpgradeError {
        UpgradeError::MaintenanceFailed {
            operation: format!("{operation}: {error}"),
            path: self.sentinel.display().to_string(),
        }
    }
}
