// Subprocess execution for the node-status command

use crate::errors::NodeStatusError;
use async_trait::async_trait;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, instrument};

/// Node-status command invoked when none is configured
pub const DEFAULT_NODE_STATUS_COMMAND: &str = "scontrol";

/// Captured result of one command run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

/// Runs an external program and captures its output
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// `Err` only when the program could not be started or waited on;
    /// a nonzero exit is reported through `CommandOutput::success`
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NodeStatusError>;
}

/// Runs commands as real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    #[instrument(skip(self))]
    async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, NodeStatusError> {
        let output = Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                NodeStatusError::SubprocessFailure(format!("failed to run {}: {}", program, e))
            })?;

        debug!(
            status = %output.status,
            stdout_bytes = output.stdout.len(),
            "Command finished"
        );

        Ok(CommandOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_captures_stdout_and_status() {
        let output = SystemCommandRunner
            .run("sh", &["-c", "echo NodeName=n1; exit 0"])
            .await
            .unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "NodeName=n1");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_not_an_error() {
        let output = SystemCommandRunner
            .run("sh", &["-c", "echo oops >&2; exit 3"])
            .await
            .unwrap();
        assert!(!output.success);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn test_missing_program_is_subprocess_failure() {
        let err = SystemCommandRunner
            .run("definitely-not-a-node-status-command", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, NodeStatusError::SubprocessFailure(_)));
    }
}
