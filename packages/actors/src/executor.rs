//! Command execution for claimed jobs.
//!
//! A [`CommandRunner`] turns a job into a [`JobOutcome`]. Runners never fail:
//! anything that stops a command from producing an exit status (spawn
//! errors, timeouts) becomes an outcome with exit code `-1`, so every claim
//! ends in a normal state transition.

use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use queue_core::{Job, JobOutcome, SYNTHETIC_EXIT_CODE};
use tokio::process::Command;

/// Future type for command runners.
pub type RunFuture = Pin<Box<dyn Future<Output = JobOutcome> + Send>>;

/// Executes a job's command.
pub trait CommandRunner: Send + Sync + 'static {
    /// Run the job's command to completion.
    fn run(&self, job: &Job) -> RunFuture;
}

/// Errors from launching or waiting on a command.
#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("failed to start command: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to collect command output: {0}")]
    Io(#[source] std::io::Error),
}

impl ExecError {
    /// The outcome recorded when a command could not produce an exit status.
    pub fn into_outcome(self) -> JobOutcome {
        JobOutcome::execution_failure(self.to_string())
    }
}

/// Runs commands through the platform shell.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    timeout: Option<Duration>,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Kill commands that run longer than `timeout`.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run `command` and capture its exit code and combined output.
    pub async fn execute(command: &str, timeout: Option<Duration>) -> Result<JobOutcome, ExecError> {
        let mut cmd = shell_command(command);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(ExecError::Spawn)?;

        let output = match timeout {
            Some(limit) => tokio::time::timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ExecError::Timeout(limit))?,
            None => child.wait_with_output().await,
        }
        .map_err(ExecError::Io)?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{}{}", stdout, stderr);

        // Killed by a signal: no exit code.
        let exit_code = output.status.code().unwrap_or(SYNTHETIC_EXIT_CODE);
        if exit_code == 0 {
            return Ok(JobOutcome::success(combined));
        }

        let error = match stderr.trim() {
            "" if output.status.code().is_none() => Some("terminated by signal".to_string()),
            "" => None,
            message => Some(message.to_string()),
        };
        Ok(JobOutcome::failure(exit_code, combined, error))
    }
}

impl CommandRunner for ShellRunner {
    fn run(&self, job: &Job) -> RunFuture {
        let command = job.command.clone();
        let timeout = self.timeout;
        Box::pin(async move {
            match Self::execute(&command, timeout).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(command = %command, error = %e, "Command did not run to completion");
                    e.into_outcome()
                }
            }
        })
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// A simple function-based runner.
pub struct FnRunner<F>
where
    F: Fn(&Job) -> RunFuture + Send + Sync + 'static,
{
    runner: F,
}

impl<F> FnRunner<F>
where
    F: Fn(&Job) -> RunFuture + Send + Sync + 'static,
{
    /// Create a new function-based runner.
    pub fn new(runner: F) -> Self {
        Self { runner }
    }
}

impl<F> CommandRunner for FnRunner<F>
where
    F: Fn(&Job) -> RunFuture + Send + Sync + 'static,
{
    fn run(&self, job: &Job) -> RunFuture {
        (self.runner)(job)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn captures_stdout_and_exit_code() {
        let outcome = ShellRunner::execute("echo ok", None).await.unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.output, "ok\n");
        assert_eq!(outcome.error, None);
    }

    #[tokio::test]
    async fn failure_uses_stderr_as_error() {
        let outcome = ShellRunner::execute("echo oops >&2; exit 3", None).await.unwrap();
        assert_eq!(outcome.exit_code, 3);
        assert_eq!(outcome.error.as_deref(), Some("oops"));
        assert_eq!(outcome.error_summary().as_deref(), Some("oops"));
    }

    #[tokio::test]
    async fn silent_failure_reports_exit_code() {
        let outcome = ShellRunner::execute("exit 1", None).await.unwrap();
        assert_eq!(outcome.exit_code, 1);
        assert_eq!(outcome.error_summary().as_deref(), Some("exit code 1"));
    }

    #[tokio::test]
    async fn timeout_becomes_synthetic_failure() {
        let err = ShellRunner::execute("sleep 5", Some(Duration::from_millis(100)))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Timeout(_)));

        let outcome = err.into_outcome();
        assert_eq!(outcome.exit_code, SYNTHETIC_EXIT_CODE);
        assert!(outcome.error_summary().unwrap().contains("timed out"));
    }

    #[tokio::test]
    async fn unknown_command_fails_through_the_shell() {
        let outcome = ShellRunner::execute("definitely-not-a-command-xyz", None)
            .await
            .unwrap();
        assert_eq!(outcome.exit_code, 127);
        assert!(outcome.error.is_some());
    }
}
