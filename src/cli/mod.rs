//! Command-line interface for mr-upgrade.
//!
//! The tool has a single command with three modes:
//!
//! | Invocation | Mode | Mutates |
//! |------------|------|---------|
//! | `mr-upgrade --info` | print install and release facts | never |
//! | `mr-upgrade` | check: report whether an upgrade is available | never |
//! | `mr-upgrade --upgrade true` | run the full upgrade | yes |
//!
//! `--dry-run` forces check mode even with `--upgrade true`.
//!
//! # Examples
//!
//! ```bash
//! # What is installed, and what is the latest release?
//! mr-upgrade --info --install-path /usr/local/munkireport
//!
//! # Upgrade to the latest release, backups in /var/backups/munkireport
//! mr-upgrade --install-path /usr/local/munkireport --backup-dir /var/backups/munkireport --upgrade true
//!
//! # Upgrade to a specific release
//! mr-upgrade --upgrade true --upgrade-version 5.6.3
//!
//! # Finish an upgrade whose migration failed, once the cause is fixed
//! mr-upgrade --upgrade true --resume
//! ```
//!
//! # Exit codes
//!
//! `0` success, nothing to do, or a check/dry run; `1` usage or unexpected errors;
//! `2`..`8` a failed stage (Probing, Comparing, MaintenanceDown, BackingUp, Updating,
//! Migrating, MaintenanceUp); `9` the install is at the target version but an earlier
//! run left it in maintenance mode (finish it with `--resume`).

pub mod info;
pub mod upgrade;


use anyhow::Result;
use chrono::{DateTime, Local};
use clap::builder::BoolishValueParser;
use clap::{ArgAction, Parser};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::warn;

use crate::config::{DEFAULT_BACKUP_DIR, RunConfig, Settings, default_install_path, expand_path};
use crate::release::ReleaseSelector;

#[derive(Parser, Debug)]
#[command(
    name = "mr-upgrade",
    about = "Upgrade a MunkiReport install in place",
    version,
    long_about = "Checks an installed MunkiReport against the latest release and, when asked, \
                  upgrades it: maintenance mode on, backup, code update, database migration, \
                  maintenance mode off."
)]
pub struct Cli {
    /// Print install and release information, then exit
    #[arg(short, long)]
    pub info: bool,

    /// Root of the MunkiReport install [default: directory of this tool]
    #[arg(long, value_name = "PATH")]
    pub install_path: Option<String>,

    /// Where backups are written
    #[arg(long, value_name = "PATH", default_value = DEFAULT_BACKUP_DIR)]
    pub backup_dir: String,

    /// Skip the files and database backups
    #[arg(long)]
    pub no_backup: bool,

    /// Perform the upgrade instead of only checking for one
    #[arg(
        long,
        value_name = "BOOL",
        action = ArgAction::Set,
        value_parser = BoolishValueParser::new(),
        default_value = "false"
    )]
    pub upgrade: bool,

    /// Release to upgrade to, e.g. 5.6.3
    #[arg(long, value_name = "VERSION", default_value = "latest")]
    pub upgrade_version: ReleaseSelector,

    /// Plan only: probe and compare, change nothing
    #[arg(long)]
    pub dry_run: bool,

    /// Finish an upgrade that left the install in maintenance mode
    #[arg(long)]
    pub resume: bool,

    /// Settings file (TOML) with tool paths, timeouts and the release source
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Show debug output
    #[arg(short, long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Only show errors
    #[arg(short, long)]
    pub quiet: bool,
}

impl Cli {
    /// Default log filter when `RUST_LOG` is not set.
    #[must_use]
    pub const fn log_filter(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "error"
        } else {
            "info"
        }
    }

    /// Whether this invocation may change the install.
    #[must_use]
    pub const fn mutating(&self) -> bool {
        self.upgrade && !self.dry_run && !self.info
    }

    pub async fn execute(self) -> Result<ExitCode> {
        let started_at = Local::now();
        let settings = self.load_settings().await?;
        let config = self.build_config(settings, started_at)?;

        if self.info {
            info::execute(&config).await;
            return Ok(ExitCode::SUCCESS);
        }

        let code = upgrade::execute(&config, !self.upgrade).await;
        Ok(ExitCode::from(code))
    }

    async fn load_settings(&self) -> Result<Settings> {
        let path = self.config.as_deref().map(expand_path);
        match Settings::load(path.as_deref()).await {
            Ok(settings) => Ok(settings),
            // --info never fails.
            Err(e) if self.info => {
                warn!("Ignoring settings file: {:#}", e);
                Ok(Settings::default())
            }
            Err(e) => Err(e),
        }
    }

    /// Combine arguments, settings and the run timestamp.
    pub fn build_config(&self, settings: Settings, started_at: DateTime<Local>) -> Result<RunConfig> {
        let install_root = match &self.install_path {
            Some(path) => expand_path(path),
            None => default_install_path()?,
        };

        if self.no_backup && self.mutating() {
            warn!("--no-backup given: the install will not be backed up before it is changed");
        }

        let mut config = RunConfig::new(install_root, started_at);
        if let Some(scratch_dir) = &settings.release.scratch_dir {
            config = config.with_scratch_dir(expand_path(&scratch_dir.to_string_lossy()));
        }

        Ok(config
            .with_backup_dir(self.backup_path())
            .with_backup_enabled(!self.no_backup)
            .with_dry_run(!self.mutating())
            .with_resume(self.resume)
            .with_target(self.upgrade_version.clone())
            .with_settings(settings))
    }

    fn backup_path(&self) -> PathBuf {
        let expanded = expand_path(&self.backup_dir);
        if expanded.as_os_str().is_empty() { Path::new(DEFAULT_BACKUP_DIR).to_path_buf() } else { expanded }
    }
}
