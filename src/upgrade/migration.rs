//! Database schema migration through the install's own entry point.

use anyhow::Result;
use std::future::Future;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::RunConfig;
use crate::core::UpgradeError;
use crate::process::ProcessCommand;

/// Migration script relative to the install root.
pub const MIGRATE_SCRIPT: &str = "database/migrate.php";

/// Brings the database schema in line with the installed code.
pub trait Migrator: Send + Sync {
    fn migrate(&self, root: &Path) -> impl Future<Output = Result<()>> + Send;
}

/// Runs `php database/migrate.php` from the install root.
pub struct MigrationRunner {
    php: String,
    timeout: Duration,
}

impl MigrationRunner {
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        Self {
            php: config.settings.tools.php.clone(),
            timeout: config.settings.timeouts.process(),
        }
    }
}

impl Migrator for MigrationRunner {
    async fn migrate(&self, root: &Path) -> Result<()> {
        let script = root.join(MIGRATE_SCRIPT);
        if !script.is_file() {
            return Err(UpgradeError::MigrationFailed {
                code: None,
                output: format!("{} not found", script.display()),
            }
            .into());
        }

        info!(target: "upgrade", "Running database migrations");
        let output = ProcessCommand::new(&self.php)
            .arg(script.display().to_string())
            .current_dir(root)
            .with_timeout(self.timeout)
            .with_context("migration")
            .output()
            .await
            .map_err(|e| UpgradeError::MigrationFailed {
                code: None,
                output: format!("{e:#}"),
            })?;

        if !output.success {
            return Err(UpgradeError::MigrationFailed {
                code: output.code,
                output: output.combined(),
            }
            .into());
        }

        let log = output.combined();
        if !log.is_empty() {
            debug!(target: "upgrade", "Migration output:\n{}", log);
        }
        info!(target: "upgrade", "Migrations complete");
        Ok(())
    }
}
