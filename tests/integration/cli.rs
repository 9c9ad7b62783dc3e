use mr_upgrade::test_utils::{InstallFixture, snapshot_tree};
use predicates::prelude::*;
use tempfile::TempDir;

use crate::common::{RegistryStub, entries_with_prefix, mr_upgrade, write_settings};

fn latest_release(tag: &str) -> RegistryStub {
    let body = serde_json::json!({
        "tag_name": tag,
        "tarball_url": "https://example.invalid/munkireport.tar.gz",
    })
    .to_string();
    RegistryStub::start(200, body).unwrap()
}

#[test]
fn test_help_lists_the_flags() {
    mr_upgrade()
        .arg("--help")
        .assert()
        .code(0)
        .stdout(predicate::str::contains("--install-path"))
        .stdout(predicate::str::contains("--upgrade-version"))
        .stdout(predicate::str::contains("--backup-dir"));
}

#[test]
fn test_info_reports_install_and_latest_release() {
    let temp = TempDir::new().unwrap();
    let fixture = InstallFixture::new("5.5.0.4301")
        .env("CONNECTION_DRIVER=\"mysql\"\nCONNECTION_DATABASE=\"munkireport\"\n")
        .build()
        .unwrap();
    let registry = latest_release("v5.6.0");
    let settings = write_settings(temp.path(), registry.base(), None).unwrap();

    mr_upgrade()
        .arg("--info")
        .arg("--install-path")
        .arg(fixture.root())
        .arg("--config")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("Installed version: 5.5.0.4301"))
        .stdout(predicate::str::contains("Latest version:    5.6.0"))
        .stdout(predicate::str::contains("Flavor:            archive"))
        .stdout(predicate::str::contains("Database driver:   mysql"))
        .stdout(predicate::str::contains("Site status:       up"));
}

#[test]
fn test_info_never_fails() {
    let temp = TempDir::new().unwrap();
    let missing = temp.path().join("not-an-install");
    let settings = write_settings(temp.path(), "http://127.0.0.1:9", None).unwrap();

    mr_upgrade()
        .arg("--info")
        .arg("--install-path")
        .arg(&missing)
        .arg("--config")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("unknown (no version marker)"))
        .stdout(predicate::str::contains("unavailable"));
}

#[test]
fn test_info_ignores_a_broken_settings_file() {
    let temp = TempDir::new().unwrap();
    let settings = temp.path().join("broken.toml");
    std::fs::write(&settings, "[release\napi_base = ").unwrap();

    mr_upgrade()
        .arg("-i")
        .arg("--install-path")
        .arg(temp.path())
        .arg("--config")
        .arg(&settings)
        .assert()
        .success();
}

#[test]
fn test_check_mode_reports_available_upgrade_without_changes() {
    let temp = TempDir::new().unwrap();
    let fixture = InstallFixture::new("5.5.0").sqlite_database("rows").build().unwrap();
    let registry = latest_release("v5.6.0");
    let settings = write_settings(temp.path(), registry.base(), None).unwrap();
    let backups = temp.path().join("backups");
    std::fs::create_dir_all(&backups).unwrap();
    let before = snapshot_tree(fixture.root()).unwrap();

    mr_upgrade()
        .arg("--install-path")
        .arg(fixture.root())
        .arg("--backup-dir")
        .arg(&backups)
        .arg("--config")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("Upgrade available: 5.5.0 -> 5.6.0"))
        .stdout(predicate::str::contains("--upgrade true"));

    assert_eq!(snapshot_tree(fixture.root()).unwrap(), before);
    assert!(entries_with_prefix(&backups, "").is_empty());
    assert_eq!(registry.requests(), 1);
}

#[test]
fn test_dry_run_with_upgrade_changes_nothing() {
    let temp = TempDir::new().unwrap();
    let fixture = InstallFixture::new("5.5.0").build().unwrap();
    let registry = latest_release("v5.6.0");
    let settings = write_settings(temp.path(), registry.base(), None).unwrap();
    let before = snapshot_tree(fixture.root()).unwrap();

    mr_upgrade()
        .args(["--upgrade", "true", "--dry-run", "--backup-dir"])
        .arg(temp.path().join("backups"))
        .arg("--install-path")
        .arg(fixture.root())
        .arg("--config")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run: nothing was changed"));

    assert_eq!(snapshot_tree(fixture.root()).unwrap(), before);
    assert!(!temp.path().join("backups").exists());
}

#[test]
fn test_up_to_date_install() {
    let temp = TempDir::new().unwrap();
    let fixture = InstallFixture::new("5.6.0").build().unwrap();
    let registry = latest_release("v5.6.0");
    let settings = write_settings(temp.path(), registry.base(), None).unwrap();

    mr_upgrade()
        .args(["--upgrade", "true"])
        .arg("--install-path")
        .arg(fixture.root())
        .arg("--config")
        .arg(&settings)
        .assert()
        .success()
        .stdout(predicate::str::contains("is up to date"));
}

#[test]
fn test_invalid_install_fails_probing() {
    let temp = TempDir::new().unwrap();
    let registry = latest_release("v5.6.0");
    let settings = write_settings(temp.path(), registry.base(), None).unwrap();

    mr_upgrade()
        .arg("--install-path")
        .arg(temp.path().join("nowhere"))
        .arg("--config")
        .arg(&settings)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("Probing failed"));

    assert_eq!(registry.requests(), 0);
}

#[test]
fn test_unreachable_registry_fails_comparing() {
    let temp = TempDir::new().unwrap();
    let fixture = InstallFixture::new("5.5.0").build().unwrap();
    let registry = RegistryStub::start(404, "{\"message\":\"Not Found\"}".to_string()).unwrap();
    let settings = write_settings(temp.path(), registry.base(), None).unwrap();

    mr_upgrade()
        .arg("--install-path")
        .arg(fixture.root())
        .arg("--config")
        .arg(&settings)
        .assert()
        .code(3)
        .stderr(predicate::str::contains("Comparing failed"));
}

#[test]
fn test_invalid_upgrade_version_is_a_usage_error() {
    mr_upgrade()
        .args(["--upgrade-version", "newest"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--upgrade-version"));
}

#[test]
fn test_usage_errors_exit_with_one() {
    mr_upgrade()
        .args(["--upgrade", "maybe"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--upgrade"));

    mr_upgrade().arg("--no-such-flag").assert().code(1);
    mr_upgrade().args(["-v", "-q"]).assert().code(1);
}

#[test]
fn test_version_flag_exits_with_zero() {
    mr_upgrade()
        .arg("--version")
        .assert()
        .code(0)
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_malformed_settings_file_exits_with_one() {
    let temp = TempDir::new().unwrap();
    let fixture = InstallFixture::new("5.5.0").build().unwrap();
    let settings = temp.path().join("mr-upgrade.toml");
    std::fs::write(&settings, "[release]\nunknown_key = 1\n").unwrap();

    mr_upgrade()
        .arg("--install-path")
        .arg(fixture.root())
        .arg("--config")
        .arg(&settings)
        .assert()
        .code(1);
}
