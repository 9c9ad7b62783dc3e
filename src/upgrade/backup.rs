//! Pre-upgrade snapshots of an install's files and database.
//!
//! Every run writes fresh, timestamped snapshots under the backup directory:
//!
//! ```text
//! <backup_dir>/munkireport<stamp>/        copy of the install tree
//! <backup_dir>/db<stamp>.sqlite.bak       sqlite datastore
//! <backup_dir>/<database><stamp>.bak      mysqldump / pg_dump output
//! ```
//!
//! Snapshots are never overwritten and never pruned. A destination that already
//! exists fails the backup instead of replacing what is there.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info};

use crate::config::{RunConfig, ToolPaths};
use crate::core::UpgradeError;
use crate::install::{DatabaseConfig, DatabaseDriver, InstallFacts};
use crate::process::ProcessCommand;
use crate::utils::fs::copy_dir;

/// What a completed backup produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRecord {
    pub timestamp: String,
    pub files_snapshot: PathBuf,
    /// `None` when no database snapshot was taken.
    pub database_snapshot: Option<PathBuf>,
}

pub struct BackupManager {
    backup_dir: PathBuf,
    stamp: String,
    tools: ToolPaths,
    process_timeout: Duration,
}

impl BackupManager {
    #[must_use]
    pub fn new(config: &RunConfig) -> Self {
        Self {
            backup_dir: config.backup_dir.clone(),
            stamp: config.timestamp_tag(),
            tools: config.settings.tools.clone(),
            process_timeout: config.settings.timeouts.process(),
        }
    }

    #[must_use]
    pub fn backup_dir(&self) -> &Path {
        &self.backup_dir
    }

    #[must_use]
    pub fn files_snapshot_path(&self) -> PathBuf {
        self.backup_dir.join(format!("munkireport{}", self.stamp))
    }

    /// Destination of the database snapshot, `None` for drivers without one.
    #[must_use]
    pub fn database_snapshot_path(&self, database: &DatabaseConfig) -> Option<PathBuf> {
        match database.driver {
            DatabaseDriver::Sqlite => Some(self.backup_dir.join(format!("db{}.sqlite.bak", self.stamp))),
            DatabaseDriver::Mysql | DatabaseDriver::Pgsql => database
                .database
                .as_ref()
                .map(|name| self.backup_dir.join(format!("{name}{}.bak", self.stamp))),
            DatabaseDriver::Other(_) => None,
        }
    }

    /// Snapshot files and database concurrently; both must succeed.
    pub async fn run(&self, facts: &InstallFacts) -> Result<BackupRecord> {
        self.prepare_backup_dir().await?;

        let (files, database) = tokio::join!(self.backup_files(&facts.root), self.backup_database(facts));
        let record = BackupRecord {
            timestamp: self.stamp.clone(),
            files_snapshot: files?,
            database_snapshot: database?,
        };

        info!(
            target: "upgrade",
            "Backup complete: files at {}{}",
            record.files_snapshot.display(),
            record
                .database_snapshot
                .as_ref()
                .map(|p| format!(", database at {}", p.display()))
                .unwrap_or_default()
        );
        Ok(record)
    }

    /// Copy the install tree to `<backup_dir>/munkireport<stamp>`.
    pub async fn backup_files(&self, root: &Path) -> Result<PathBuf> {
        self.prepare_backup_dir().await?;
        let destination = self.files_snapshot_path();
        refuse_existing(&destination).await?;

        let excluded = self.excluded_paths(root, &destination).await;
        if !excluded.is_empty() {
            debug!(target: "upgrade", "Excluding from files backup: {:?}", excluded);
        }

        info!(target: "upgrade", "Backing up {} to {}", root.display(), destination.display());
        let source = root.to_path_buf();
        let target = destination.clone();
        let stats = tokio::task::spawn_blocking(move || {
            copy_dir(&source, &target, |rel| excluded.iter().any(|skip| rel == skip))
        })
        .await
        .context("Files backup task panicked")?
        .map_err(|e| UpgradeError::BackupFailed {
            operation: format!("copying {} to {}", root.display(), destination.display()),
            reason: format!("{e:#}"),
        })?;

        debug!(
            target: "upgrade",
            "Copied {} files, {} directories, {} bytes",
            stats.files,
            stats.dirs,
            stats.bytes
        );
        Ok(destination)
    }

    /// Snapshot the database according to its driver.
    pub async fn backup_database(&self, facts: &InstallFacts) -> Result<Option<PathBuf>> {
        self.prepare_backup_dir().await?;
        let database = &facts.database;

        match &database.driver {
            DatabaseDriver::Sqlite => self.backup_sqlite(database).await,
            DatabaseDriver::Mysql => self.backup_mysql(database, &facts.root).await.map(Some),
            DatabaseDriver::Pgsql => self.backup_pgsql(database, &facts.root).await.map(Some),
            DatabaseDriver::Other(driver) => Err(UpgradeError::UnsupportedDriver {
                driver: driver.clone(),
            }
            .into()),
        }
    }

    async fn backup_sqlite(&self, database: &DatabaseConfig) -> Result<Option<PathBuf>> {
        if !database.sqlite_path.is_file() {
            return Err(UpgradeError::BackupFailed {
                operation: "sqlite backup".to_string(),
                reason: format!(
                    "no datastore at {}; check CONNECTION_DATABASE in .env",
                    database.sqlite_path.display()
                ),
            }
            .into());
        }

        let destination = self.backup_dir.join(format!("db{}.sqlite.bak", self.stamp));
        refuse_existing(&destination).await?;

        info!(target: "upgrade", "Backing up sqlite database to {}", destination.display());
        fs::copy(&database.sqlite_path, &destination).await.map_err(|e| UpgradeError::BackupFailed {
            operation: format!("copying {}", database.sqlite_path.display()),
            reason: e.to_string(),
        })?;
        Ok(Some(destination))
    }

    async fn backup_mysql(&self, database: &DatabaseConfig, root: &Path) -> Result<PathBuf> {
        let (name, destination) = self.dump_destination(database).await?;

        let mut command = ProcessCommand::new(&self.tools.mysqldump)
            .current_dir(root)
            .with_timeout(self.process_timeout)
            .with_context("mysql backup")
            .arg("--single-transaction");
        if let Some(user) = &database.username {
            command = command.arg(format!("--user={user}"));
        }
        if let Some(host) = &database.host {
            command = command.arg(format!("--host={host}"));
        }
        if let Some(port) = &database.port {
            command = command.arg(format!("--port={port}"));
        }
        if let Some(password) = &database.password {
            command = command.secret_env("MYSQL_PWD", password.clone());
        }
        let command = command.arg(format!("--result-file={}", destination.display())).arg(name);

        info!(target: "upgrade", "Dumping mysql database to {}", destination.display());
        run_dump(command, &destination).await?;
        Ok(destination)
    }

    async fn backup_pgsql(&self, database: &DatabaseConfig, root: &Path) -> Result<PathBuf> {
        let (name, destination) = self.dump_destination(database).await?;

        let mut command = ProcessCommand::new(&self.tools.pg_dump)
            .current_dir(root)
            .with_timeout(self.process_timeout)
            .with_context("pgsql backup")
            .arg("--no-password");
        if let Some(user) = &database.username {
            command = command.arg(format!("--username={user}"));
        }
        if let Some(host) = &database.host {
            command = command.arg(format!("--host={host}"));
        }
        if let Some(port) = &database.port {
            command = command.arg(format!("--port={port}"));
        }
        if let Some(password) = &database.password {
            command = command.secret_env("PGPASSWORD", password.clone());
        }
        let command = command.arg(format!("--file={}", destination.display())).arg(name);

        info!(target: "upgrade", "Dumping pgsql database to {}", destination.display());
        run_dump(command, &destination).await?;
        Ok(destination)
    }

    async fn dump_destination(&self, database: &DatabaseConfig) -> Result<(String, PathBuf)> {
        let name = database.database.clone().ok_or_else(|| UpgradeError::BackupFailed {
            operation: format!("{} backup", database.driver),
            reason: "CONNECTION_DATABASE is not set in .env".to_string(),
        })?;
        let destination = self.backup_dir.join(format!("{name}{}.bak", self.stamp));
        refuse_existing(&destination).await?;
        Ok((name, destination))
    }

    async fn prepare_backup_dir(&self) -> Result<()> {
        fs::create_dir_all(&self.backup_dir).await.map_err(|e| {
            UpgradeError::BackupFailed {
                operation: format!("creating backup directory {}", self.backup_dir.display()),
                reason: e.to_string(),
            }
            .into()
        })
    }

    /// Paths relative to `root` that the files snapshot must not contain: the backup
    /// directory itself when it lives inside the install, and the snapshot destination.
    async fn excluded_paths(&self, root: &Path, destination: &Path) -> Vec<PathBuf> {
        let Ok(root) = fs::canonicalize(root).await else {
            return Vec::new();
        };
        let Ok(backup_dir) = fs::canonicalize(&self.backup_dir).await else {
            return Vec::new();
        };

        let mut excluded = Vec::new();
        if let Ok(rel) = backup_dir.strip_prefix(&root) {
            if rel.as_os_str().is_empty() {
                if let Some(name) = destination.file_name() {
                    excluded.push(PathBuf::from(name));
                }
            } else {
                excluded.push(rel.to_path_buf());
            }
        }
        excluded
    }
}

async fn refuse_existing(destination: &Path) -> Result<()> {
    if fs::symlink_metadata(destination).await.is_ok() {
        return Err(UpgradeError::BackupFailed {
            operation: format!("writing {}", destination.display()),
            reason: "destination already exists and will not be overwritten".to_string(),
        }
        .into());
    }
    Ok(())
}

async fn run_dump(command: ProcessCommand, destination: &Path) -> Result<()> {
    let program = command.program().to_string();
    command.execute_success().await.map_err(|e| {
        anyhow::Error::from(UpgradeError::BackupFailed {
            operation: format!("{program} to {}", destination.display()),
            reason: format!("{e:#}"),
        })
    })
}
