//! States of an upgrade run and the failure type that carries a stage.

use std::fmt;

use semver::Version;

/// A step of the run that can fail.
///
/// Each stage owns one process exit code; the mapping is part of the command-line
/// contract and must not change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Probing,
    Comparing,
    MaintenanceDown,
    BackingUp,
    Updating,
    Migrating,
    MaintenanceUp,
}

impl Stage {
    #[must_use]
    pub const fn exit_code(self) -> u8 {
        match self {
            Self::Probing => 2,
            Self::Comparing => 3,
            Self::MaintenanceDown => 4,
            Self::BackingUp => 5,
            Self::Updating => 6,
            Self::Migrating => 7,
            Self::MaintenanceUp => 8,
        }
    }

    /// Whether the install may have been touched by the time this stage runs.
    #[must_use]
    pub const fn is_mutating(self) -> bool {
        !matches!(self, Self::Probing | Self::Comparing)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Probing => "Probing",
            Self::Comparing => "Comparing",
            Self::MaintenanceDown => "MaintenanceDown",
            Self::BackingUp => "BackingUp",
            Self::Updating => "Updating",
            Self::Migrating => "Migrating",
            Self::MaintenanceUp => "MaintenanceUp",
        };
        f.write_str(name)
    }
}

/// Exit code for an install left in maintenance mode by an earlier run that this run
/// did not finish. The code is already at the target, so there is nothing to upgrade,
/// but the site is still down.
pub const MAINTENANCE_PENDING_EXIT_CODE: u8 = 9;

/// Where a run is, or where it stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpgradeState {
    Idle,
    Probing,
    Comparing,
    NoActionNeeded {
        installed: Version,
        target: Version,
    },
    NeedsUpgrade {
        installed: Version,
        target: Version,
    },
    /// At the target version but still in maintenance mode, and not asked to resume.
    MaintenancePending {
        installed: Version,
        target: Version,
    },
    MaintenanceDown,
    BackingUp,
    Updating,
    Migrating,
    MaintenanceUp,
    Done,
    Failed(Stage),
}

impl UpgradeState {
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NoActionNeeded { .. } | Self::MaintenancePending { .. } | Self::Done | Self::Failed(_)
        )
    }
}

impl From<Stage> for UpgradeState {
    fn from(stage: Stage) -> Self {
        match stage {
            Stage::Probing => Self::Probing,
            Stage::Comparing => Self::Comparing,
            Stage::MaintenanceDown => Self::MaintenanceDown,
            Stage::BackingUp => Self::BackingUp,
            Stage::Updating => Self::Updating,
            Stage::Migrating => Self::Migrating,
            Stage::MaintenanceUp => Self::MaintenanceUp,
        }
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Probing => write!(f, "Probing"),
            Self::Comparing => write!(f, "Comparing"),
            Self::NoActionNeeded {
                installed,
                target,
            } => write!(f, "NoActionNeeded ({installed} >= {target})"),
            Self::NeedsUpgrade {
                installed,
                target,
            } => write!(f, "NeedsUpgrade ({installed} -> {target})"),
            Self::MaintenancePending {
                installed,
                target,
            } => write!(f, "MaintenancePending ({installed} >= {target})"),
            Self::MaintenanceDown => write!(f, "MaintenanceDown"),
            Self::BackingUp => write!(f, "BackingUp"),
            Self::Updating => write!(f, "Updating"),
            Self::Migrating => write!(f, "Migrating"),
            Self::MaintenanceUp => write!(f, "MaintenanceUp"),
            Self::Done => write!(f, "Done"),
            Self::Failed(stage) => write!(f, "Failed({stage})"),
        }
    }
}

/// An error tagged with the stage it happened in.
#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub source: anyhow::Error,
}

impl StageFailure {
    #[must_use]
    pub const fn new(stage: Stage, source: anyhow::Error) -> Self {
        Self {
            stage,
            source,
        }
    }

    #[must_use]
    pub const fn exit_code(&self) -> u8 {
        self.stage.exit_code()
    }
}

impl fmt::Display for StageFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} failed: {}", self.stage, self.source)
    }
}

impl std::error::Error for StageFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}
