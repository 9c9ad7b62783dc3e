//! Error handling for mr-upgrade
//!
//! The error system follows two rules:
//! 1. **Strongly-typed errors** ([`UpgradeError`]) name every failure the upgrade
//!    workflow knows about, so the orchestrator and tests can match on them.
//! 2. **User-friendly messages** ([`ErrorContext`]) add details and a suggestion when
//!    the failure reaches the operator.
//!
//! Components return `anyhow::Result` and attach typed causes with `.into()`; the CLI
//! boundary turns whatever arrives into an [`ErrorContext`] via [`user_friendly_error`].
//!
//! # Examples
//!
//! ```rust,no_run
//! use mr_upgrade::core::{UpgradeError, user_friendly_error};
//!
//! let err = anyhow::Error::from(UpgradeError::InvalidInstall {
//!     path: "/var/www/munkireport".to_string(),
//!     reason: "version marker not found".to_string(),
//! });
//! user_friendly_error(err).display();
//! ```

use colored::Colorize;
use std::fmt;
use thiserror::Error;

use crate::upgrade::state::{Stage, StageFailure};

/// Every failure condition of the upgrade workflow.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpgradeError {
    /// The path does not hold a recognisable install (no version marker).
    #[error("{path} does not appear to be a valid MunkiReport install: {reason}")]
    InvalidInstall {
        path: String,
        reason: String,
    },

    /// A configuration file contains syntax the parser does not accept.
    #[error("Malformed configuration in {file} at line {line}: {reason}")]
    MalformedConfig {
        file: String,
        line: usize,
        reason: String,
    },

    /// The release registry could not be reached or answered with an error status.
    #[error("Network error: {operation}")]
    NetworkError {
        operation: String,
        reason: String,
    },

    /// The release registry answered with something we cannot interpret.
    #[error("Could not parse {what}: {reason}")]
    ParseError {
        what: String,
        reason: String,
    },

    #[error("Backup failed: {operation}")]
    BackupFailed {
        operation: String,
        reason: String,
    },

    #[error("Unsupported database driver '{driver}'")]
    UnsupportedDriver {
        driver: String,
    },

    #[error("Update failed: {operation}")]
    UpdateFailed {
        operation: String,
        reason: String,
    },

    /// The update strategy declined to touch the install.
    #[error("Update refused: {reason}")]
    UpdateRefused {
        reason: String,
    },

    #[error("Migration failed (exit code {code:?})")]
    MigrationFailed {
        code: Option<i32>,
        output: String,
    },

    #[error("Could not toggle maintenance mode: {operation}")]
    MaintenanceFailed {
        operation: String,
        path: String,
    },

    #[error("Command failed: {program} {args}")]
    ProcessFailed {
        program: String,
        args: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Command timed out after {seconds}s: {program} {args}")]
    ProcessTimedOut {
        program: String,
        args: String,
        seconds: u64,
    },

    #[error("Required tool '{tool}' was not found")]
    ToolNotFound {
        tool: String,
    },

    #[error("{message}")]
    Other {
        message: String,
    },
}

/// An [`UpgradeError`] decorated with operator-facing details and a suggestion.
#[derive(Debug)]
pub struct ErrorContext {
    pub error: UpgradeError,
    pub stage: Option<Stage>,
    pub suggestion: Option<String>,
    pub details: Option<String>,
}

impl ErrorContext {
    #[must_use]
    pub const fn new(error: UpgradeError) -> Self {
        Self {
            error,
            stage: None,
            suggestion: None,
            details: None,
        }
    }

    #[must_use]
    pub const fn with_stage(mut self, stage: Stage) -> Self {
        self.stage = Some(stage);
        self
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    /// Print the error to stderr with colors.
    pub fn display(&self) {
        match self.stage {
            Some(stage) => {
                eprintln!("{} [{}]: {}", "error".red().bold(), stage.to_string().bold(), self.error);
            }
            None => eprintln!("{}: {}", "error".red().bold(), self.error),
        }

        if let Some(details) = &self.details {
            eprintln!("{}: {}", "details".yellow(), details);
        }

        if let Some(suggestion) = &self.suggestion {
            eprintln!("{}: {}", "suggestion".green(), suggestion);
        }
    }
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(stage) = self.stage {
            write!(f, "[{stage}] ")?;
        }
        write!(f, "{}", self.error)?;

        if let Some(details) = &self.details {
            write!(f, "\nDetails: {details}")?;
        }

        if let Some(suggestion) = &self.suggestion {
            write!(f, "\nSuggestion: {suggestion}")?;
        }

        Ok(())
    }
}

impl std::error::Error for ErrorContext {}

/// Convert any error into an [`ErrorContext`] with a suggestion where one is known.
#[must_use]
pub fn user_friendly_error(error: anyhow::Error) -> ErrorContext {
    if let Some(failure) = error.downcast_ref::<StageFailure>() {
        let mut context = typed_cause(&failure.source)
            .map(create_error_context)
            .unwrap_or_else(|| generic_context(&failure.source))
            .with_stage(failure.stage);
        if context.suggestion.is_none() {
            context.suggestion = Some(stage_suggestion(failure.stage).to_string());
        }
        return context;
    }

    if let Some(typed) = typed_cause(&error) {
        return create_error_context(typed);
    }

    generic_context(&error)
}

/// First [`UpgradeError`] in the cause chain, if any.
fn typed_cause(error: &anyhow::Error) -> Option<UpgradeError> {
    error.chain().find_map(|cause| cause.downcast_ref::<UpgradeError>()).cloned()
}

fn generic_context(error: &anyhow::Error) -> ErrorContext {
    let mut message = error.to_string();
    let chain: Vec<String> = error.chain().skip(1).map(ToString::to_string).collect();

    if !chain.is_empty() {
        message.push_str("\n\nCaused by:");
        for (i, cause) in chain.iter().enumerate() {
            message.push_str(&format!("\n  {}: {}", i + 1, cause));
        }
    }

    ErrorContext::new(UpgradeError::Other {
        message,
    })
}

fn stage_suggestion(stage: Stage) -> &'static str {
    match stage {
        Stage::Probing | Stage::Comparing => {
            "Nothing was changed. Fix the cause above and run the command again"
        }
        Stage::MaintenanceDown
        | Stage::BackingUp
        | Stage::Updating
        | Stage::Migrating
        | Stage::MaintenanceUp => {
            "The install was left in maintenance mode. Fix the cause above and re-run the upgrade; it is safe to repeat"
        }
    }
}

fn create_error_context(error: UpgradeError) -> ErrorContext {
    match &error {
        UpgradeError::InvalidInstall { .. } => ErrorContext::new(error)
            .with_suggestion("Pass the install root with --install-path <path>")
            .with_details("The version is read from app/helpers/site_helper.php"),

        UpgradeError::MalformedConfig { file, .. } => {
            let suggestion = format!("Check the KEY=VALUE syntax in {file}");
            ErrorContext::new(error).with_suggestion(suggestion)
        }

        UpgradeError::NetworkError { reason, .. } => {
            let details = reason.clone();
            ErrorContext::new(error)
                .with_suggestion("Check your internet connection and GitHub API rate limits, then retry")
                .with_details(details)
        }

        UpgradeError::ParseError { reason, .. } => {
            let details = reason.clone();
            ErrorContext::new(error).with_details(details)
        }

        UpgradeError::BackupFailed { reason, .. } => {
            let details = reason.clone();
            ErrorContext::new(error)
                .with_suggestion("Choose a writable location with --backup-dir <path>")
                .with_details(details)
        }

        UpgradeError::UnsupportedDriver { .. } => ErrorContext::new(error)
            .with_suggestion("Back up the database manually and re-run with --no-backup")
            .with_details("Supported drivers: sqlite, mysql, pgsql"),

        UpgradeError::UpdateFailed { reason, .. } => {
            let details = reason.clone();
            ErrorContext::new(error).with_details(details)
        }

        UpgradeError::UpdateRefused { .. } => ErrorContext::new(error)
            .with_suggestion("Upgrade this install manually or use a git checkout"),

        UpgradeError::MigrationFailed { output, .. } => {
            let details = output.trim().to_string();
            ErrorContext::new(error)
                .with_suggestion("Fix the migration error, then run with --resume to migrate and leave maintenance mode")
                .with_details(details)
        }

        UpgradeError::MaintenanceFailed { path, .. } => {
            let details = format!("Sentinel file: {path}");
            ErrorContext::new(error)
                .with_suggestion("Check write permissions on storage/framework")
                .with_details(details)
        }

        UpgradeError::ProcessFailed { stderr, .. } => {
            let details = stderr.trim().to_string();
            ErrorContext::new(error).with_details(details)
        }

        UpgradeError::ProcessTimedOut { .. } => ErrorContext::new(error)
            .with_suggestion("Raise [timeouts] process_secs in the settings file or run the command manually"),

        UpgradeError::ToolNotFound { tool } => {
            let suggestion = format!("Install '{tool}' or set its path under [tools] in the settings file");
            ErrorContext::new(error).with_suggestion(suggestion)
        }

        UpgradeError::Other { .. } => ErrorContext::new(error),
    }
}
