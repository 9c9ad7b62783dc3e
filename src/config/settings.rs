//! Optional TOML settings file.
//!
//! Every field has a default, so an absent file and an empty file behave the same.
//! Unknown keys are rejected to catch typos early.
//!
//! ```toml
//! [tools]
//! composer = "/usr/local/bin/composer"
//! php = "/usr/bin/php"
//!
//! [timeouts]
//! process_secs = 900
//!
//! [release]
//! repository = "munkireport/munkireport-php"
//! minimum_archive_version = "4.0.0"
//! ```

use anyhow::{Context, Result};
use semver::Version;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;

use crate::core::UpgradeError;
use crate::version::parse_version;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Settings {
    #[serde(default)]
    pub tools: ToolPaths,

    #[serde(default)]
    pub timeouts: Timeouts,

    #[serde(default)]
    pub release: ReleaseSettings,
}

/// Executables invoked by the upgrade. Bare names are looked up on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ToolPaths {
    #[serde(default = "default_git")]
    pub git: String,

    #[serde(default = "default_composer")]
    pub composer: String,

    #[serde(default = "default_php")]
    pub php: String,

    #[serde(default = "default_mysqldump")]
    pub mysqldump: String,

    #[serde(default = "default_pg_dump")]
    pub pg_dump: String,
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self {
            git: default_git(),
            composer: default_composer(),
            php: default_php(),
            mysqldump: default_mysqldump(),
            pg_dump: default_pg_dump(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Timeouts {
    /// Limit for each external process (git, composer, php, dumps).
    #[serde(default = "default_process_secs")]
    pub process_secs: u64,

    /// Limit for each HTTP request to the release registry.
    #[serde(default = "default_network_secs")]
    pub network_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            process_secs: default_process_secs(),
            network_secs: default_network_secs(),
        }
    }
}

impl Timeouts {
    #[must_use]
    pub const fn process(&self) -> Duration {
        Duration::from_secs(self.process_secs)
    }

    #[must_use]
    pub const fn network(&self) -> Duration {
        Duration::from_secs(self.network_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReleaseSettings {
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// `owner/name` of the GitHub repository publishing releases.
    #[serde(default = "default_repository")]
    pub repository: String,

    /// Remote pulled from by git installs.
    #[serde(default = "default_git_remote")]
    pub git_remote: String,

    /// Archive installs older than this are refused.
    #[serde(default = "default_minimum_archive_version")]
    pub minimum_archive_version: String,

    /// Download and extraction area for archive updates; the system temp directory
    /// when unset.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            api_base: default_api_base(),
            repository: default_repository(),
            git_remote: default_git_remote(),
            minimum_archive_version: default_minimum_archive_version(),
            scratch_dir: None,
            user_agent: default_user_agent(),
        }
    }
}

impl ReleaseSettings {
    pub fn minimum_archive_version(&self) -> Result<Version> {
        parse_version(&self.minimum_archive_version).with_context(|| {
            format!("Invalid minimum_archive_version '{}'", self.minimum_archive_version)
        })
    }
}

fn default_git() -> String {
    "git".to_string()
}

fn default_composer() -> String {
    "composer".to_string()
}

fn default_php() -> String {
    "php".to_string()
}

fn default_mysqldump() -> String {
    "mysqldump".to_string()
}

fn default_pg_dump() -> String {
    "pg_dump".to_string()
}

const fn default_process_secs() -> u64 {
    600
}

const fn default_network_secs() -> u64 {
    30
}

fn default_api_base() -> String {
    "https://api.github.com".to_string()
}

fn default_repository() -> String {
    "munkireport/munkireport-php".to_string()
}

fn default_git_remote() -> String {
    "origin".to_string()
}

fn default_minimum_archive_version() -> String {
    "4.0.0".to_string()
}

fn default_user_agent() -> String {
    format!("mr-upgrade/{}", env!("CARGO_PKG_VERSION"))
}

impl Settings {
    /// Load settings from `path`, or defaults when no path is given.
    pub async fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from(path).await,
            None => Ok(Self::default()),
        }
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings = Self::parse(&content, path)?;
        settings.validate(path)?;
        Ok(settings)
    }

    fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            let line = e
                .span()
                .and_then(|span| content.get(..span.start))
                .map(|before| before.matches('\n').count() + 1)
                .unwrap_or(0);
            UpgradeError::MalformedConfig {
                file: path.display().to_string(),
                line,
                reason: e.message().to_string(),
            }
            .into()
        })
    }

    fn validate(&self, path: &Path) -> Result<()> {
        let malformed = |reason: String| UpgradeError::MalformedConfig {
            file: path.display().to_string(),
            line: 0,
            reason,
        };

        if self.release.minimum_archive_version().is_err() {
            return Err(malformed(format!(
                "minimum_archive_version '{}' is not a version",
                self.release.minimum_archive_version
            ))
            .into());
        }
        if !self.release.repository.contains('/') {
            return Err(malformed(format!(
                "repository '{}' must be owner/name",
                self.release.repository
            ))
            .into());
        }
        if self.timeouts.process_secs == 0 || self.timeouts.network_secs == 0 {
            return Err(malformed("timeouts must be greater than zero".to_string()).into());
        }
        Ok(())
    }
}
