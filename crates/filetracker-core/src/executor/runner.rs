//! Command runners

use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio::time::timeout;

use super::command::{AuthorizedCommand, CommandError};

/// Runs one authorized command to completion
///
/// Implementations report success or failure only; output is not captured for
/// the caller.
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync + fmt::Debug {
    async fn run(&self, command: &AuthorizedCommand) -> Result<(), CommandError>;
}

/// Runs commands as child processes of the tracker
#[derive(Debug, Clone, Default)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    working_dir: Option<PathBuf>,
}

impl ProcessRunner {
    /// `None` lets a command run for as long as it takes
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            working_dir: None,
        }
    }

    /// Resolve relative paths in arguments against `dir`
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

#[async_trait::async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &AuthorizedCommand) -> Result<(), CommandError> {
        let program = command.program();

        let mut child = Command::new(program);
        child
            .args(command.args())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &self.working_dir {
            child.current_dir(dir);
        }

        let output = match self.timeout {
            Some(after) => timeout(after, child.output())
                .await
                .map_err(|_| CommandError::Timeout { program, after })?,
            None => child.output().await,
        }
        .map_err(|source| CommandError::Spawn { program, source })?;

        if !output.status.success() {
            return Err(CommandError::Failed {
                program,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::executor::command::AllowedCommand;

    #[tokio::test]
    async fn test_runs_in_working_dir() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::new(Some(Duration::from_secs(5))).with_working_dir(dir.path());

        runner
            .run(&AuthorizedCommand::new(
                AllowedCommand::Mkdir,
                vec!["-p".into(), "nested/deeper".into()],
            ))
            .await
            .unwrap();

        assert!(dir.path().join("nested/deeper").is_dir());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let dir = tempfile::tempdir().unwrap();
        let runner = ProcessRunner::default().with_working_dir(dir.path());

        // mkdir without -p cannot create a missing parent
        let err = runner
            .run(&AuthorizedCommand::new(
                AllowedCommand::Mkdir,
                vec!["missing/child".into()],
            ))
            .await
            .unwrap_err();

        assert!(matches!(err, CommandError::Failed { program: "mkdir", .. }), "got {err}");
    }
}
