//! Time-bounded invocation of provider command-line tools.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// A provider CLI call such as `gcloud auth print-access-token`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CliCommand {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl CliCommand {
    pub fn new<I, S>(program: &str, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
        }
    }

    /// `program arg1 arg2 ...`, used in logs and by test runners as a lookup key.
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Result of running a [`CliCommand`]. None of these is fatal to a credential chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// Exit status 0; trimmed stdout.
    Success(String),
    Failed { code: Option<i32>, stderr: String },
    TimedOut,
    /// The program could not be started (usually: not installed).
    Unavailable(String),
}

impl CommandOutcome {
    /// Non-empty stdout of a successful run.
    pub fn into_stdout(self) -> Option<String> {
        match self {
            CommandOutcome::Success(out) if !out.is_empty() => Some(out),
            _ => None,
        }
    }
}

#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &CliCommand) -> CommandOutcome;
}

/// Runs commands as real subprocesses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemCommandRunner;

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, command: &CliCommand) -> CommandOutcome {
        let child = tokio::process::Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let outcome = match tokio::time::timeout(command.timeout, child).await {
            Err(_) => CommandOutcome::TimedOut,
            Ok(Err(e)) => CommandOutcome::Unavailable(e.to_string()),
            Ok(Ok(output)) if output.status.success() => {
                CommandOutcome::Success(String::from_utf8_lossy(&output.stdout).trim().to_string())
            }
            Ok(Ok(output)) => CommandOutcome::Failed {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            },
        };

        match &outcome {
            CommandOutcome::Success(_) => debug!(command = %command.display(), "command succeeded"),
            other => debug!(command = %command.display(), outcome = ?other, "command did not succeed"),
        }
        outcome
    }
}
