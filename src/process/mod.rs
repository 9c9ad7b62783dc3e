//! Builder for running external tools (git, composer, php, database dumps).
//!
//! Every command runs with a timeout; a command that exceeds it is killed and reported
//! as [`UpgradeError::ProcessTimedOut`]. A non-zero exit becomes
//! [`UpgradeError::ProcessFailed`] carrying the captured stderr. A tool that cannot be
//! found on `PATH` becomes [`UpgradeError::ToolNotFound`] before anything is spawned.
//!
//! ```rust,no_run
//! use mr_upgrade::process::ProcessCommand;
//! use std::time::Duration;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let output = ProcessCommand::new("git")
//!     .args(["pull", "--ff-only", "origin"])
//!     .current_dir("/srv/munkireport")
//!     .with_timeout(Duration::from_secs(600))
//!     .with_context("git update")
//!     .execute()
//!     .await?;
//! println!("{}", output.stdout);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;
use tokio::time::timeout;

use crate::core::UpgradeError;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

pub struct ProcessCommand {
    program: String,

    args: Vec<String>,

    current_dir: Option<PathBuf>,

    env_vars: Vec<(String, String)>,

    /// Variables whose values must never reach the logs.
    secret_env: Vec<String>,

    timeout_duration: Duration,

    context: Option<String>,
}

/// Captured output of a finished command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    pub code: Option<i32>,
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

impl ProcessOutput {
    /// stdout and stderr joined, for reporting.
    #[must_use]
    pub fn combined(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", self.stdout.trim_end(), self.stderr.trim_end()),
            (false, true) => self.stdout.trim_end().to_string(),
            (true, false) => self.stderr.trim_end().to_string(),
            (true, true) => String::new(),
        }
    }
}

impl ProcessCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env_vars: Vec::new(),
            secret_env: Vec::new(),
            timeout_duration: DEFAULT_TIMEOUT,
            context: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.current_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((key.into(), value.into()));
        self
    }

    /// Like [`env`](Self::env) but the value is masked in logs.
    pub fn secret_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        self.secret_env.push(key.clone());
        self.env_vars.push((key, value.into()));
        self
    }

    pub const fn with_timeout(mut self, duration: Duration) -> Self {
        self.timeout_duration = duration;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    #[must_use]
    pub fn command_line(&self) -> String {
        if self.args.is_empty() {
            self.program.clone()
        } else {
            format!("{} {}", self.program, self.args.join(" "))
        }
    }

    /// Run the command; a non-zero exit is returned as output, not as an error.
    ///
    /// Spawn failures, missing tools and timeouts are still errors.
    pub async fn output(self) -> Result<ProcessOutput> {
        let start = Instant::now();
        let resolved = which::which(&self.program).map_err(|_| UpgradeError::ToolNotFound {
            tool: self.program.clone(),
        })?;
        let label = self.context.as_deref().unwrap_or(&self.program);

        tracing::debug!(target: "process", "({}) Executing: {}", label, self.command_line());

        let mut cmd = Command::new(&resolved);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.env_vars {
            if self.secret_env.contains(key) {
                tracing::trace!(target: "process", "Setting env var: {}=***", key);
            } else {
                tracing::trace!(target: "process", "Setting env var: {}={}", key, value);
            }
            cmd.env(key, value);
        }

        let child = cmd
            .spawn()
            .with_context(|| format!("Failed to start {}", resolved.display()))?;

        let output = match timeout(self.timeout_duration, child.wait_with_output()).await {
            Ok(result) => result.with_context(|| format!("Failed to run {}", self.command_line()))?,
            Err(_) => {
                // Dropping the future kills the child (kill_on_drop).
                tracing::warn!(
                    target: "process",
                    "({}) Command timed out after {} seconds: {}",
                    label,
                    self.timeout_duration.as_secs(),
                    self.command_line()
                );
                return Err(UpgradeError::ProcessTimedOut {
                    program: self.program.clone(),
                    args: self.args.join(" "),
                    seconds: self.timeout_duration.as_secs(),
                }
                .into());
            }
        };

        let result = ProcessOutput {
            code: output.status.code(),
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !result.stdout.trim().is_empty() {
            tracing::debug!(target: "process", "({}) {}", label, result.stdout.trim());
        }
        if !result.stderr.trim().is_empty() {
            tracing::debug!(target: "process", "({}) {}", label, result.stderr.trim());
        }

        let elapsed = start.elapsed();
        if elapsed.as_secs() > 1 {
            tracing::info!(target: "process::perf", "({}) {} took {:.2}s", label, self.program, elapsed.as_secs_f64());
        } else {
            tracing::debug!(target: "process::perf", "({}) {} took {}ms", label, self.program, elapsed.as_millis());
        }

        Ok(result)
    }

    /// Run the command and fail with [`UpgradeError::ProcessFailed`] on a non-zero exit.
    pub async fn execute(self) -> Result<ProcessOutput> {
        let program = self.program.clone();
        let args = self.args.join(" ");
        let output = self.output().await?;

        if !output.success {
            tracing::debug!(target: "process", "Command failed with exit code: {:?}", output.code);
            let stderr = if output.stderr.trim().is_empty() {
                output.stdout.clone()
            } else {
                output.stderr.clone()
            };
            return Err(UpgradeError::ProcessFailed {
                program,
                args,
                code: output.code,
                stderr,
            }
            .into());
        }

        Ok(output)
    }

    pub async fn execute_success(self) -> Result<()> {
        self.execute().await?;
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_captures_stdout() -> Result<()> {
        let output = ProcessCommand::new("sh").args(["-c", "echo hello"]).execute().await?;
        assert!(output.success);
        assert_eq!(output.code, Some(0));
        assert_eq!(output.stdout.trim(), "hello");
        Ok(())
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_process_failed() {
        let err = ProcessCommand::new("sh")
            .args(["-c", "echo broken >&2; exit 3"])
            .execute()
            .await
            .unwrap_err();

        match err.downcast_ref::<UpgradeError>() {
            Some(UpgradeError::ProcessFailed { program, code, stderr, .. }) => {
                assert_eq!(program, "sh");
                assert_eq!(*code, Some(3));
                assert_eq!(stderr.trim(), "broken");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_output_returns_failure_without_error() -> Result<()> {
        let output = ProcessCommand::new("sh").args(["-c", "echo out; exit 2"]).output().await?;
        assert!(!output.success);
        assert_eq!(output.code, Some(2));
        assert_eq!(output.combined(), "out");
        Ok(())
    }

    #[tokio::test]
    async fn test_timeout_is_reported() {
        let err = ProcessCommand::new("sh")
            .args(["-c", "sleep 5"])
            .with_timeout(Duration::from_millis(100))
            .execute()
            .await
            .unwrap_err();

        assert!(matches!(
            err.downcast_ref::<UpgradeError>(),
            Some(UpgradeError::ProcessTimedOut { .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let err = ProcessCommand::new("definitely-not-a-real-tool-mr-upgrade")
            .execute()
            .await
            .unwrap_err();

        assert_eq!(
            err.downcast_ref::<UpgradeError>(),
            Some(&UpgradeError::ToolNotFound {
                tool: "definitely-not-a-real-tool-mr-upgrade".to_string(),
            })
        );
    }

    #[tokio::test]
    async fn test_env_and_current_dir() -> Result<()> {
        let temp = tempfile::TempDir::new()?;
        let output = ProcessCommand::new("sh")
            .args(["-c", "echo $MR_TEST_VALUE; pwd"])
            .env("MR_TEST_VALUE", "visible")
            .current_dir(temp.path())
            .execute()
            .await?;

        let mut lines = output.stdout.lines();
        assert_eq!(lines.next(), Some("visible"));
        let pwd = std::path::PathBuf::from(lines.next().unwrap_or_default());
        assert_eq!(pwd.canonicalize()?, temp.path().canonicalize()?);
        Ok(())
    }
}
