//! Inspection of an installed MunkiReport tree.
//!
//! [`InstallProbe::probe`] reads, without modifying anything:
//!
//! | Fact | Source |
//! |------|--------|
//! | installed version | `$GLOBALS['version'] = '...'` in `app/helpers/site_helper.php` |
//! | flavor | `.git/` present ⇒ git, otherwise archive |
//! | database | `CONNECTION_*` keys of `.env` (driver defaults to `sqlite`) |
//! | maintenance | presence of `storage/framework/down` |
//!
//! A tree without a readable version marker is not an install at all and yields
//! [`UpgradeError::InvalidInstall`].

mod database;

pub use database::{DatabaseConfig, DatabaseDriver, SQLITE_DATASTORE};

use anyhow::{Context, Result};
use regex::Regex;
use semver::Version;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;

use crate::config::EnvFile;
use crate::core::UpgradeError;
use crate::upgrade::maintenance::MaintenanceGate;
use crate::version::parse_version;

/// File carrying the installed version.
pub const VERSION_MARKER: &str = "app/helpers/site_helper.php";

/// Environment file of the install.
pub const ENV_FILE: &str = ".env";

/// How the install receives code updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flavor {
    /// A git checkout; updated with `git pull`.
    Git,
    /// Unpacked from a release archive; updated by replacing files.
    Archive,
}

impl fmt::Display for Flavor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Git => write!(f, "git"),
            Self::Archive => write!(f, "archive"),
        }
    }
}

/// Everything known about an install, gathered once per run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallFacts {
    pub root: PathBuf,
    pub installed_version: Version,
    /// Version string exactly as written in the marker.
    pub raw_version: String,
    pub flavor: Flavor,
    pub database: DatabaseConfig,
    pub env: EnvFile,
    pub maintenance_active: bool,
}

/// Best-effort view of a path for `--info`; never fails.
#[derive(Debug, Clone)]
pub struct InstallDescription {
    pub root: PathBuf,
    pub version: Option<String>,
    pub flavor: Flavor,
    pub database_driver: std::result::Result<DatabaseDriver, String>,
    pub maintenance_active: bool,
}

pub struct InstallProbe;

impl InstallProbe {
    /// Gather [`InstallFacts`] for the install at `root`.
    pub fn probe(root: &Path) -> Result<InstallFacts> {
        debug!("Probing install at {}", root.display());

        if !root.is_dir() {
            return Err(UpgradeError::InvalidInstall {
                path: root.display().to_string(),
                reason: "directory does not exist".to_string(),
            }
            .into());
        }

        let raw_version = read_version_marker(root)?.ok_or_else(|| UpgradeError::InvalidInstall {
            path: root.display().to_string(),
            reason: format!("no version marker found in {VERSION_MARKER}"),
        })?;
        let installed_version =
            parse_version(&raw_version).map_err(|e| UpgradeError::InvalidInstall {
                path: root.display().to_string(),
                reason: format!("unreadable version '{raw_version}': {e}"),
            })?;

        let env = load_env(root)?;
        let database = DatabaseConfig::from_env(env.as_ref(), root);
        let flavor = detect_flavor(root);
        let maintenance_active = MaintenanceGate::for_install(root).is_engaged();

        debug!(
            "Install {} is {} ({}), database {}, maintenance {}",
            root.display(),
            installed_version,
            flavor,
            database.driver,
            if maintenance_active { "down" } else { "up" }
        );

        Ok(InstallFacts {
            root: root.to_path_buf(),
            installed_version,
            raw_version,
            flavor,
            database,
            env: env.unwrap_or_default(),
            maintenance_active,
        })
    }

    /// Whatever can be learned about `root`, even if it is not a valid install.
    #[must_use]
    pub fn describe(root: &Path) -> InstallDescription {
        let version = read_version_marker(root).ok().flatten();
        let database_driver = load_env(root)
            .map(|env| DatabaseConfig::from_env(env.as_ref(), root).driver)
            .map_err(|e| e.to_string());

        InstallDescription {
            root: root.to_path_buf(),
            version,
            flavor: detect_flavor(root),
            database_driver,
            maintenance_active: MaintenanceGate::for_install(root).is_engaged(),
        }
    }
}

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"\$GLOBALS\[\s*['"]version['"]\s*\]\s*=\s*['"]([^'"]+)['"]"#)
            .unwrap_or_else(|e| unreachable!("static regex is valid: {e}"))
    })
}

/// The version string from the marker file, `None` when the file or line is missing.
pub fn read_version_marker(root: &Path) -> Result<Option<String>> {
    let marker = root.join(VERSION_MARKER);
    if !marker.is_file() {
        return Ok(None);
    }
    let content = std::fs::read_to_string(&marker)
        .with_context(|| format!("Failed to read {}", marker.display()))?;

    Ok(content
        .lines()
        .find_map(|line| version_pattern().captures(line))
        .map(|captures| captures[1].trim().to_string())
        .filter(|version| !version.is_empty()))
}

fn detect_flavor(root: &Path) -> Flavor {
    if root.join(".git").exists() {
        Flavor::Git
    } else {
        Flavor::Archive
    }
}

/// `Ok(None)` when the install has no `.env`, which is allowed.
fn load_env(root: &Path) -> Result<Option<EnvFile>> {
    let path = root.join(ENV_FILE);
    if !path.is_file() {
        debug!("No {} in {}, using defaults", ENV_FILE, root.display());
        return Ok(None);
    }
    EnvFile::load(&path).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::InstallFixture;

    #[test]
    fn test_probe_archive_install_without_env() {
        let fixture = InstallFixture::new("4.2.1").build().unwrap();

        let facts = InstallProbe::probe(fixture.root()).unwrap();
        assert_eq!(facts.installed_version, Version::new(4, 2, 1));
        assert_eq!(facts.raw_version, "4.2.1");
        assert_eq!(facts.flavor, Flavor::Archive);
        assert_eq!(facts.database.driver, DatabaseDriver::Sqlite);
        assert!(facts.env.is_empty());
        assert!(!facts.maintenance_active);
    }

    #[test]
    fn test_probe_git_install_with_mysql() {
        let fixture = InstallFixture::new("5.6.3.4012")
            .git()
            .env("CONNECTION_DRIVER=\"mysql\"\nCONNECTION_DATABASE=munkireport\nCONNECTION_USERNAME=mr\n")
            .build()
            .unwrap();

        let facts = InstallProbe::probe(fixture.root()).unwrap();
        assert_eq!(facts.flavor, Flavor::Git);
        assert_eq!(facts.installed_version.build.as_str(), "4012");
        assert_eq!(facts.database.driver, DatabaseDriver::Mysql);
        assert_eq!(facts.database.database.as_deref(), Some("munkireport"));
        assert_eq!(facts.env.get("CONNECTION_USERNAME"), Some("mr"));
    }

    #[test]
    fn test_probe_reports_maintenance() {
        let fixture = InstallFixture::new("4.2.1").maintenance_down().build().unwrap();
        assert!(InstallProbe::probe(fixture.root()).unwrap().maintenance_active);
    }

    #[test]
    fn test_missing_marker_is_invalid_install() {
        let temp = tempfile::TempDir::new().unwrap();
        let err = InstallProbe::probe(temp.path()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::InvalidInstall { .. })
        ));

        let err = InstallProbe::probe(&temp.path().join("missing")).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::InvalidInstall { .. })
        ));
    }

    #[test]
    fn test_marker_without_version_line_is_invalid() {
        let temp = tempfile::TempDir::new().unwrap();
        let helper = temp.path().join(VERSION_MARKER);
        std::fs::create_dir_all(helper.parent().unwrap()).unwrap();
        std::fs::write(&helper, "<?php\n// no version here\n").unwrap();

        assert_eq!(read_version_marker(temp.path()).unwrap(), None);
        assert!(InstallProbe::probe(temp.path()).is_err());
    }

    #[test]
    fn test_marker_variants() {
        let temp = tempfile::TempDir::new().unwrap();
        let helper = temp.path().join(VERSION_MARKER);
        std::fs::create_dir_all(helper.parent().unwrap()).unwrap();

        std::fs::write(&helper, "<?php\n$GLOBALS['version'] = '5.6.3.4012';\n").unwrap();
        assert_eq!(read_version_marker(temp.path()).unwrap().as_deref(), Some("5.6.3.4012"));

        std::fs::write(&helper, "<?php\n  $GLOBALS[\"version\"]=\"4.10.0\";\n").unwrap();
        assert_eq!(read_version_marker(temp.path()).unwrap().as_deref(), Some("4.10.0"));
    }

    #[test]
    fn test_malformed_env_fails_probe() {
        let fixture = InstallFixture::new("4.2.1").env("CONNECTION_DRIVER mysql\n").build().unwrap();

        let err = InstallProbe::probe(fixture.root()).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::MalformedConfig { line: 1, .. })
        ));
    }

    #[test]
    fn test_describe_never_fails() {
        let temp = tempfile::TempDir::new().unwrap();
        let description = InstallProbe::describe(temp.path());
        assert_eq!(description.version, None);
        assert_eq!(description.flavor, Flavor::Archive);
        assert_eq!(description.database_driver, Ok(DatabaseDriver::Sqlite));

        let fixture = InstallFixture::new("4.2.1").env("broken line\n").build().unwrap();
        let description = InstallProbe::describe(fixture.root());
        assert_eq!(description.version.as_deref(), Some("4.2.1"));
        assert!(description.database_driver.is_err());
    }
}
