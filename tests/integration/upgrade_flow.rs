//! Complete upgrades of archive installs through the binary.
//!
//! The release tarball is served from disk via a `file://` URL and `php` is a shell
//! script, so these run without network access or a PHP toolchain.

#![cfg(unix)]

use mr_upgrade::install::read_version_marker;
use mr_upgrade::test_utils::{InstallFixture, write_release_tarball, write_script};
use mr_upgrade::upgrade::maintenance::SENTINEL;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::common::{RegistryStub, entries_with_prefix, mr_upgrade, write_settings};

struct Setup {
    temp: TempDir,
    fixture: InstallFixture,
    registry: RegistryStub,
    settings: PathBuf,
}

impl Setup {
    /// A 5.5.0 archive install with sqlite data, a release 5.6.0 tarball and a
    /// `php` that runs `php_body`.
    fn new(php_body: &str) -> Self {
        let temp = TempDir::new().unwrap();
        let fixture = InstallFixture::new("5.5.0")
            .env("CONNECTION_DRIVER=\"sqlite\"\nAUTH_METHODS=\"LOCAL\"\n")
            .sqlite_database("machine rows")
            .file("local/users/admin.yml", "password_hash: x\n")
            .build()
            .unwrap();

        let tarball = temp.path().join("munkireport-php-v5.6.0.tar.gz");
        write_release_tarball(&tarball, "munkireport-munkireport-php-abc1234", "5.6.0").unwrap();
        let registry = RegistryStub::release("v5.6.0", &tarball).unwrap();

        let php = temp.path().join("bin/php");
        write_script(&php, php_body).unwrap();
        let settings = write_settings(temp.path(), registry.base(), Some(&php)).unwrap();

        Self {
            temp,
            fixture,
            registry,
            settings,
        }
    }

    fn backups(&self) -> PathBuf {
        self.temp.path().join("backups")
    }

    fn root(&self) -> &Path {
        self.fixture.root()
    }

    fn upgrade(&self) -> assert_cmd::assert::Assert {
        mr_upgrade()
            .args(["--upgrade", "true"])
            .arg("--install-path")
            .arg(self.root())
            .arg("--backup-dir")
            .arg(self.backups())
            .arg("--config")
            .arg(&self.settings)
            .assert()
    }
}

#[test]
fn test_archive_upgrade_end_to_end() {
    let setup = Setup::new("echo \"$@\" > migrated.log\n");

    setup
        .upgrade()
        .success()
        .stdout(predicate::str::contains("Upgraded MunkiReport from 5.5.0 to 5.6.0"));

    let root = setup.root();
    assert_eq!(read_version_marker(root).unwrap().as_deref(), Some("5.6.0"));
    assert_eq!(fs::read_to_string(root.join("public/index.php")).unwrap(), "<?php\n// release 5.6.0\n");
    assert!(!root.join(SENTINEL).exists(), "site must be back up");

    // Operator data survives the overlay.
    assert_eq!(
        fs::read_to_string(root.join(".env")).unwrap(),
        "CONNECTION_DRIVER=\"sqlite\"\nAUTH_METHODS=\"LOCAL\"\n"
    );
    assert_eq!(fs::read_to_string(root.join("app/db/db.sqlite")).unwrap(), "machine rows");
    assert!(root.join("local/users/admin.yml").exists());

    // Migration ran from the install root with the migrate script.
    let log = fs::read_to_string(root.join("migrated.log")).unwrap();
    assert!(log.contains("database/migrate.php"));

    let files = entries_with_prefix(&setup.backups(), "munkireport");
    assert_eq!(files.len(), 1);
    assert_eq!(read_version_marker(&files[0]).unwrap().as_deref(), Some("5.5.0"));
    let databases = entries_with_prefix(&setup.backups(), "db");
    assert_eq!(databases.len(), 1);
    assert_eq!(fs::read_to_string(&databases[0]).unwrap(), "machine rows");

    assert_eq!(setup.registry.requests(), 1);
}

#[test]
fn test_failed_migration_keeps_maintenance_mode_and_resume_finishes() {
    let setup = Setup::new("echo 'SQLSTATE[42S01]: table exists' >&2\nexit 1\n");

    setup
        .upgrade()
        .code(7)
        .stdout(predicate::str::contains("remains in maintenance mode"))
        .stderr(predicate::str::contains("SQLSTATE[42S01]"));

    let root = setup.root();
    assert!(root.join(SENTINEL).exists());
    assert_eq!(read_version_marker(root).unwrap().as_deref(), Some("5.6.0"));

    // Fix the cause. A plain retry still refuses to call the site healthy.
    let php = setup.temp.path().join("bin/php");
    write_script(&php, "exit 0\n").unwrap();
    setup
        .upgrade()
        .code(9)
        .stdout(predicate::str::contains("still in maintenance mode"))
        .stdout(predicate::str::contains("--resume"));
    assert!(root.join(SENTINEL).exists());

    // Resume applies the release again, so a damaged file is restored.
    fs::write(root.join("public/index.php"), "<?php // half written").unwrap();

    mr_upgrade()
        .args(["--upgrade", "true", "--resume"])
        .arg("--install-path")
        .arg(root)
        .arg("--backup-dir")
        .arg(setup.backups())
        .arg("--config")
        .arg(&setup.settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("Finished the interrupted upgrade"));

    assert!(!root.join(SENTINEL).exists());
    assert_eq!(fs::read_to_string(root.join("public/index.php")).unwrap(), "<?php\n// release 5.6.0\n");
    assert_eq!(fs::read_to_string(root.join("app/db/db.sqlite")).unwrap(), "machine rows");
    // One backup from the first attempt; resuming takes none.
    assert_eq!(entries_with_prefix(&setup.backups(), "munkireport").len(), 1);
    assert_eq!(setup.registry.requests(), 3);
}

#[test]
fn test_no_backup_skips_snapshots() {
    let setup = Setup::new("exit 0\n");

    mr_upgrade()
        .args(["--upgrade", "true", "--no-backup"])
        .arg("--install-path")
        .arg(setup.root())
        .arg("--backup-dir")
        .arg(setup.backups())
        .arg("--config")
        .arg(&setup.settings)
        .assert()
        .success()
        .stderr(predicate::str::contains("--no-backup"));

    assert!(entries_with_prefix(&setup.backups(), "").is_empty());
    assert_eq!(read_version_marker(setup.root()).unwrap().as_deref(), Some("5.6.0"));
}

#[test]
fn test_backup_failure_leaves_code_untouched() {
    let setup = Setup::new("exit 0\n");
    // A file where the backup directory should be.
    fs::write(setup.backups(), "not a directory").unwrap();

    setup.upgrade().code(5);

    let root = setup.root();
    assert_eq!(read_version_marker(root).unwrap().as_deref(), Some("5.5.0"));
    assert!(root.join(SENTINEL).exists());
}
