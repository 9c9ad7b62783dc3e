//! In-place upgrade of a MunkiReport install.
//!
//! The [`UpgradeOrchestrator`] drives one run through a fixed sequence of stages and
//! records the outcome in an [`UpgradeReport`]:
//!
//! | Stage | Component | On failure |
//! |-------|-----------|------------|
//! | Probing | [`InstallProbe`](crate::install::InstallProbe) | nothing touched |
//! | Comparing | [`ReleaseSource`](crate::release::ReleaseSource) | nothing touched |
//! | MaintenanceDown | [`MaintenanceGate`] | install may be down |
//! | BackingUp | [`BackupManager`] | install stays down |
//! | Updating | [`UpdateStrategy`] | install stays down |
//! | Migrating | [`MigrationRunner`] | install stays down |
//! | MaintenanceUp | [`MaintenanceGate`] | install stays down |
//!
//! Re-running after a failure is the recovery path. Backups never overwrite earlier
//! snapshots and the gate operations are idempotent, so repeating a run is safe. A run
//! that stopped after the version marker was replaced finds the install at the target
//! version but still down. Without `--resume` that run ends in `MaintenancePending`
//! and exits with [`MAINTENANCE_PENDING_EXIT_CODE`]; with `--resume` it applies the
//! release again, since the earlier update may have been partial, then migrates and
//! brings the site back up.
//!
//! # Example
//!
//! ```rust,no_run
//! use mr_upgrade::config::RunConfig;
//! use mr_upgrade::install::InstallFacts;
//! use mr_upgrade::release::GithubReleases;
//! use mr_upgrade::upgrade::{MigrationRunner, UpdateStrategy, UpgradeOrchestrator};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = RunConfig::new("/srv/munkireport", chrono::Local::now());
//! let releases = GithubReleases::new(&config.settings.release, &config.settings.timeouts)?;
//! let orchestrator = UpgradeOrchestrator::new(
//!     &config,
//!     releases,
//!     MigrationRunner::new(&config),
//!     |facts: &InstallFacts| UpdateStrategy::for_install(facts, &config),
//! );
//!
//! let report = orchestrator.run().await;
//! println!("{} (exit {})", report.final_state(), report.exit_code());
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod maintenance;
pub mod migration;
pub mod orchestrator;
pub mod state;
pub mod strategy;
pub mod verification;


pub use backup::{BackupManager, BackupRecord};
pub use maintenance::MaintenanceGate;
pub use migration::{MigrationRunner, Migrator};
pub use orchestrator::{UpgradeOrchestrator, UpgradeReport};
pub use state::{MAINTENANCE_PENDING_EXIT_CODE, Stage, StageFailure, UpgradeState};
pub use strategy::{ArchiveUpdate, CodeUpdater, GitUpdate, UpdateStrategy};
pub use verification::ArtifactVerifier;
