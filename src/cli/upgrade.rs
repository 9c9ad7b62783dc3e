//! Check and upgrade modes: run the orchestrator and report the outcome.

use colored::Colorize;

use crate::config::RunConfig;
use crate::core::user_friendly_error;
use crate::install::InstallFacts;
use crate::release::GithubReleases;
use crate::upgrade::{
    BackupManager, MaintenanceGate, MigrationRunner, UpdateStrategy, UpgradeOrchestrator, UpgradeReport, UpgradeState,
};

/// Run one invocation and return its exit code.
///
/// `check_mode` is true when the operator did not ask for an upgrade at all, which
/// only changes the hint printed after the plan.
pub async fn execute(config: &RunConfig, check_mode: bool) -> u8 {
    let releases = match GithubReleases::new(&config.settings.release, &config.settings.timeouts) {
        Ok(releases) => releases,
        Err(e) => {
            user_friendly_error(e).display();
            return 1;
        }
    };

    let orchestrator = UpgradeOrchestrator::new(
        config,
        releases,
        MigrationRunner::new(config),
        |facts: &InstallFacts| UpdateStrategy::for_install(facts, config),
    );
    let mut report = orchestrator.run().await;

    print_report(config, &report, check_mode);

    let code = report.exit_code();
    if let Some(failure) = report.failure.take() {
        user_friendly_error(anyhow::Error::new(failure)).display();
    }
    code
}

fn print_report(config: &RunConfig, report: &UpgradeReport, check_mode: bool) {
    match report.final_state() {
        UpgradeState::NoActionNeeded {
            installed,
            target,
        } => {
            println!(
                "{}",
                format!("MunkiReport {installed} is up to date (release {target})").green()
            );
        }
        UpgradeState::MaintenancePending {
            installed,
            ..
        } => {
            println!(
                "{}",
                format!("MunkiReport {installed} is installed but the site is still in maintenance mode").red()
            );
            println!(
                "An earlier upgrade did not finish. Run with --upgrade true --resume to apply the release \
                 again, migrate and bring the site back up"
            );
        }
        UpgradeState::NeedsUpgrade {
            installed,
            target,
        } => {
            println!("{}", format!("Upgrade available: {installed} -> {target}").cyan());
            if let Some(facts) = &report.facts {
                print_plan(config, facts);
            }
            if check_mode {
                println!("Run with --upgrade true to install it");
            } else {
                println!("{}", "Dry run: nothing was changed".yellow());
            }
        }
        UpgradeState::Done => {
            let from = report.facts.as_ref().map(|facts| facts.installed_version.to_string());
            let to = report.release.as_ref().map(|release| release.version.to_string());
            if report.resumed {
                println!("{}", "Finished the interrupted upgrade; maintenance mode is off".green());
            } else if let (Some(from), Some(to)) = (from, to) {
                println!("{}", format!("Upgraded MunkiReport from {from} to {to}").green());
            }
            if let Some(backup) = &report.backup {
                println!("  Files backup:    {}", backup.files_snapshot.display());
                if let Some(database) = &backup.database_snapshot {
                    println!("  Database backup: {}", database.display());
                }
            }
        }
        UpgradeState::Failed(stage) if stage.is_mutating() => {
            let down = report
                .facts
                .as_ref()
                .is_some_and(|facts| MaintenanceGate::for_install(&facts.root).is_engaged());
            if down {
                println!(
                    "{}",
                    format!("Upgrade stopped at {stage}; the site remains in maintenance mode").red()
                );
            }
        }
        _ => {}
    }
}

fn print_plan(config: &RunConfig, facts: &InstallFacts) {
    println!("  Install path: {} ({} install)", facts.root.display(), facts.flavor);
    if config.backup_enabled {
        let backups = BackupManager::new(config);
        println!("  Files backup: {}", backups.files_snapshot_path().display());
        match backups.database_snapshot_path(&facts.database) {
            Some(path) => println!("  Database backup: {} ({})", path.display(), facts.database.driver),
            None => println!(
                "  Database backup: {}",
                format!("not possible for driver {}", facts.database.driver).yellow()
            ),
        }
    } else {
        println!("  Backups: {}", "disabled".yellow());
    }
}
