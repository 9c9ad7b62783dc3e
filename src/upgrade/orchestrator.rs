//! The upgrade state machine.
//!
//! ```text
//! Idle → Probing → Comparing ─┬─ NoActionNeeded
//!                             ├─ MaintenancePending
//!                             └─ NeedsUpgrade → MaintenanceDown → BackingUp
//!                                  → Updating → Migrating → MaintenanceUp → Done
//! ```
//!
//! Any stage may end the run in `Failed(stage)`. Once the maintenance gate is engaged
//! it is released on exactly one path, full success; every failure after that point
//! leaves the install down so a half-upgraded site is never served.
//!
//! An install at the target version whose gate is still engaged was left behind by an
//! interrupted run. Without `--resume` the run stops in `MaintenancePending`. With it,
//! the release is applied again and the run continues with `Migrating`:
//!
//! ```text
//! Comparing → NoActionNeeded → MaintenanceDown → Updating → Migrating → MaintenanceUp → Done
//! ```

use anyhow::Result;
use tracing::{error, info, warn};

use super::backup::{BackupManager, BackupRecord};
use super::maintenance::MaintenanceGate;
use super::migration::Migrator;
use super::state::{MAINTENANCE_PENDING_EXIT_CODE, Stage, StageFailure, UpgradeState};
use super::strategy::CodeUpdater;
use crate::config::RunConfig;
use crate::core::UpgradeError;
use crate::install::{InstallFacts, InstallProbe};
use crate::release::{ReleaseFacts, ReleaseSource};
use crate::version::UpgradePlan;

/// Everything a run did, in order, and how it ended.
#[derive(Debug, Default)]
pub struct UpgradeReport {
    /// States entered, starting with `Probing`.
    pub trace: Vec<UpgradeState>,
    pub facts: Option<InstallFacts>,
    pub release: Option<ReleaseFacts>,
    pub plan: Option<UpgradePlan>,
    pub backup: Option<BackupRecord>,
    /// The run stopped after planning because nothing may be mutated.
    pub dry_run: bool,
    /// The run finished an earlier upgrade left in maintenance mode.
    pub resumed: bool,
    pub failure: Option<StageFailure>,
}

impl UpgradeReport {
    #[must_use]
    pub fn final_state(&self) -> UpgradeState {
        self.trace.last().cloned().unwrap_or(UpgradeState::Idle)
    }

    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match (&self.failure, self.final_state()) {
            (Some(failure), _) => failure.exit_code(),
            (None, UpgradeState::MaintenancePending { .. }) => MAINTENANCE_PENDING_EXIT_CODE,
            (None, _) => 0,
        }
    }

    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.failure.is_none()
    }

    fn enter(&mut self, state: UpgradeState) {
        info!(target: "upgrade", "-> {}", state);
        self.trace.push(state);
    }

    fn fail(mut self, stage: Stage, source: anyhow::Error) -> Self {
        error!(target: "upgrade", "{} failed: {:#}", stage, source);
        self.trace.push(UpgradeState::Failed(stage));
        self.failure = Some(StageFailure::new(stage, source));
        self
    }
}

/// Sequences one upgrade run against one install.
///
/// `strategy_for` picks the code updater once the install has been probed; production
/// passes [`UpdateStrategy::for_install`](super::strategy::UpdateStrategy::for_install).
pub struct UpgradeOrchestrator<'a, R, M, F> {
    config: &'a RunConfig,
    releases: R,
    migrator: M,
    strategy_for: F,
}

impl<'a, R, M, F> UpgradeOrchestrator<'a, R, M, F>
where
    R: ReleaseSource,
    M: Migrator,
{
    pub fn new<U>(config: &'a RunConfig, releases: R, migrator: M, strategy_for: F) -> Self
    where
        F: Fn(&InstallFacts) -> Result<U>,
        U: CodeUpdater,
    {
        Self {
            config,
            releases,
            migrator,
            strategy_for,
        }
    }

    /// Run to a terminal state. Failures are recorded in the report, never returned.
    pub async fn run<U>(&self) -> UpgradeReport
    where
        F: Fn(&InstallFacts) -> Result<U>,
        U: CodeUpdater,
    {
        let mut report = UpgradeReport {
            dry_run: self.config.dry_run,
            ..UpgradeReport::default()
        };

        report.enter(UpgradeState::Probing);
        let facts = match InstallProbe::probe(&self.config.install_root) {
            Ok(facts) => facts,
            Err(e) => return report.fail(Stage::Probing, e),
        };
        report.facts = Some(facts.clone());

        report.enter(UpgradeState::Comparing);
        let release = match self.releases.fetch(&self.config.target).await {
            Ok(release) => release,
            Err(e) => return report.fail(Stage::Comparing, e),
        };
        let plan = UpgradePlan::new(&facts.installed_version, &release.version);
        report.release = Some(release.clone());
        report.plan = Some(plan.clone());

        if !plan.needed {
            if !facts.maintenance_active {
                report.enter(UpgradeState::NoActionNeeded {
                    installed: plan.installed,
                    target: plan.target,
                });
                return report;
            }
            if self.config.resume && !self.config.dry_run {
                report.enter(UpgradeState::NoActionNeeded {
                    installed: plan.installed,
                    target: plan.target,
                });
                return self.resume::<U>(report, &facts, &release).await;
            }
            warn!(
                target: "upgrade",
                "{} is in maintenance mode although it is up to date; an earlier upgrade did not finish. \
                 Run with --upgrade true --resume to apply the release again, migrate and bring it back up",
                facts.root.display()
            );
            report.enter(UpgradeState::MaintenancePending {
                installed: plan.installed,
                target: plan.target,
            });
            return report;
        }

        report.enter(UpgradeState::NeedsUpgrade {
            installed: plan.installed,
            target: plan.target,
        });
        if self.config.dry_run {
            info!(target: "upgrade", "Dry run: stopping before any change");
            return report;
        }

        let gate = MaintenanceGate::for_install(&facts.root);

        report.enter(UpgradeState::MaintenanceDown);
        if let Err(e) = gate.engage().await {
            return report.fail(Stage::MaintenanceDown, e);
        }

        report.enter(UpgradeState::BackingUp);
        if self.config.backup_enabled {
            match BackupManager::new(self.config).run(&facts).await {
                Ok(record) => report.backup = Some(record),
                Err(e) => return report.fail(Stage::BackingUp, e),
            }
        } else {
            warn!(target: "upgrade", "Backups disabled with --no-backup; the upgrade cannot be rolled back");
        }

        self.update_and_finish::<U>(report, &gate, &facts, &release).await
    }

    /// Finish an install an earlier run left in maintenance mode at the target version.
    ///
    /// The marker only says the earlier update got as far as writing it, so the
    /// release is applied again before migrating. No backup is taken: the install is
    /// mid-upgrade and the interrupted run already snapshotted the previous version.
    async fn resume<U>(
        &self,
        mut report: UpgradeReport,
        facts: &InstallFacts,
        release: &ReleaseFacts,
    ) -> UpgradeReport
    where
        F: Fn(&InstallFacts) -> Result<U>,
        U: CodeUpdater,
    {
        info!(target: "upgrade", "Resuming the upgrade of {}", facts.root.display());
        report.resumed = true;
        let gate = MaintenanceGate::for_install(&facts.root);

        report.enter(UpgradeState::MaintenanceDown);
        if let Err(e) = gate.engage().await {
            return report.fail(Stage::MaintenanceDown, e);
        }
        info!(target: "upgrade", "Skipping backups while resuming; the interrupted run took them");

        self.update_and_finish::<U>(report, &gate, facts, release).await
    }

    /// Updating → Migrating → MaintenanceUp → Done.
    async fn update_and_finish<U>(
        &self,
        mut report: UpgradeReport,
        gate: &MaintenanceGate,
        facts: &InstallFacts,
        release: &ReleaseFacts,
    ) -> UpgradeReport
    where
        F: Fn(&InstallFacts) -> Result<U>,
        U: CodeUpdater,
    {
        report.enter(UpgradeState::Updating);
        let updated = async {
            ensure_engaged(gate, Stage::Updating)?;
            let updater = (self.strategy_for)(facts)?;
            updater.update(facts, release).await
        }
        .await;
        if let Err(e) = updated {
            return report.fail(Stage::Updating, e);
        }

        self.finish(report, gate, facts).await
    }

    /// Migrating → MaintenanceUp → Done.
    async fn finish(
        &self,
        mut report: UpgradeReport,
        gate: &MaintenanceGate,
        facts: &InstallFacts,
    ) -> UpgradeReport {
        report.enter(UpgradeState::Migrating);
        let migrated = async {
            ensure_engaged(gate, Stage::Migrating)?;
            self.migrator.migrate(&facts.root).await
        }
        .await;
        if let Err(e) = migrated {
            return report.fail(Stage::Migrating, e);
        }

        report.enter(UpgradeState::MaintenanceUp);
        if let Err(e) = gate.release().await {
            return report.fail(Stage::MaintenanceUp, e);
        }

        report.enter(UpgradeState::Done);
        report
    }
}

fn ensure_engaged(gate: &MaintenanceGate, stage: Stage) -> Result<()> {
    if gate.is_engaged() {
        return Ok(());
    }
    Err(UpgradeError::MaintenanceFailed {
        operation: format!("sentinel disappeared before {stage}"),
        path: gate.sentinel_path().display().to_string(),
    }
    .into())
}
