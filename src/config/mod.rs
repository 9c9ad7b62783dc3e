//! Configuration for a single upgrade run.
//!
//! Configuration comes from three places and is combined exactly once, at startup,
//! into a [`RunConfig`] that is passed to every component:
//!
//! - command-line arguments (install path, backup directory, target version, flags)
//! - the optional TOML [`Settings`] file (tool paths, timeouts, release source)
//! - the run timestamp, captured once so every backup of a run shares one stamp
//!
//! The system temp directory is looked up once, in [`RunConfig::new`], as the default
//! scratch area. Nothing downstream reads the clock or process environment on its own.
//!
//! The install's own `.env` file is parsed by [`EnvFile`].

pub mod env_file;
pub mod settings;

pub use env_file::EnvFile;
pub use settings::{ReleaseSettings, Settings, Timeouts, ToolPaths};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::release::ReleaseSelector;
use crate::utils::fs::normalize_path;

/// Backup destination when `--backup-dir` is not given.
pub const DEFAULT_BACKUP_DIR: &str = "/tmp";

/// Name of the scratch area created under the system temp directory.
pub const SCRATCH_DIR_NAME: &str = "mr-upgrade";

/// Everything a run needs to know, built once.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub install_root: PathBuf,
    pub backup_dir: PathBuf,
    /// `false` only when the operator passed `--no-backup`.
    pub backup_enabled: bool,
    /// Probe and compare only; never mutate.
    pub dry_run: bool,
    /// Finish an upgrade that left the install in maintenance mode.
    pub resume: bool,
    pub target: ReleaseSelector,
    pub started_at: DateTime<Local>,
    /// Download and extraction area for archive updates.
    pub scratch_dir: PathBuf,
    pub settings: Settings,
}

impl RunConfig {
    /// A configuration with default settings for `install_root`.
    #[must_use]
    pub fn new(install_root: impl Into<PathBuf>, started_at: DateTime<Local>) -> Self {
        Self {
            install_root: install_root.into(),
            backup_dir: PathBuf::from(DEFAULT_BACKUP_DIR),
            backup_enabled: true,
            dry_run: false,
            resume: false,
            target: ReleaseSelector::Latest,
            started_at,
            scratch_dir: std::env::temp_dir().join(SCRATCH_DIR_NAME),
            settings: Settings::default(),
        }
    }

    #[must_use]
    pub fn with_backup_dir(mut self, backup_dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = backup_dir.into();
        self
    }

    #[must_use]
    pub const fn with_backup_enabled(mut self, enabled: bool) -> Self {
        self.backup_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    #[must_use]
    pub const fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    #[must_use]
    pub fn with_target(mut self, target: ReleaseSelector) -> Self {
        self.target = target;
        self
    }

    #[must_use]
    pub fn with_scratch_dir(mut self, scratch_dir: impl Into<PathBuf>) -> Self {
        self.scratch_dir = scratch_dir.into();
        self
    }

    #[must_use]
    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }

    /// Stamp used in backup names, e.g. `20261017142501`.
    #[must_use]
    pub fn timestamp_tag(&self) -> String {
        self.started_at.format("%Y%m%d%H%M%S").to_string()
    }

    /// Where archive updates download the release tarball.
    #[must_use]
    pub fn download_path(&self) -> PathBuf {
        self.scratch_dir.join("munkireport_latest.tar.gz")
    }

    /// Where archive updates extract the release tarball.
    #[must_use]
    pub fn extract_dir(&self) -> PathBuf {
        self.scratch_dir.join("extracted")
    }
}

/// Expand `~` and normalize a path given on the command line.
pub fn expand_path(raw: &str) -> PathBuf {
    normalize_path(Path::new(shellexpand::tilde(raw).as_ref()))
}

/// The install root when `--install-path` is not given: the directory holding the
/// executable, or its parent when the tool ships inside the install's `build/`.
pub fn default_install_path() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("Failed to get current executable path")?;
    let exe = exe.canonicalize().unwrap_or(exe);
    let dir = exe.parent().context("Executable has no parent directory")?;
    Ok(install_root_for_tool_dir(dir))
}

fn install_root_for_tool_dir(dir: &Path) -> PathBuf {
    let root = if dir.file_name().is_some_and(|name| name == "build") {
        dir.parent().unwrap_or(dir)
    } else {
        dir
    };
    normalize_path(root)
}
