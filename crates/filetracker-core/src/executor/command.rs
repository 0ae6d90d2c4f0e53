//! Command parsing and whitelist authorization

use std::fmt;
use std::process::ExitStatus;
use std::time::Duration;

use thiserror::Error;

use crate::telemetry::CommandOutcome;

/// Errors for a single queued command
///
/// These never reach the submitter; the executor logs them and moves on.
#[derive(Error, Debug)]
pub enum CommandError {
    #[error("empty command")]
    Empty,

    #[error("no command after sudo")]
    EmptyAfterSudo,

    #[error("command not whitelisted: {0}")]
    NotWhitelisted(String),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: &'static str,
        #[source]
        source: std::io::Error,
    },

    #[error("{program} exited with {status}: {stderr}")]
    Failed {
        program: &'static str,
        status: ExitStatus,
        stderr: String,
    },

    #[error("{program} did not finish within {after:?}")]
    Timeout {
        program: &'static str,
        after: Duration,
    },
}

impl CommandError {
    /// Metrics label for this failure
    pub fn outcome(&self) -> CommandOutcome {
        match self {
            CommandError::Empty | CommandError::EmptyAfterSudo => CommandOutcome::ParseError,
            CommandError::NotWhitelisted(_) => CommandOutcome::NotWhitelisted,
            CommandError::Spawn { .. }
            | CommandError::Failed { .. }
            | CommandError::Timeout { .. } => CommandOutcome::Failed,
        }
    }
}

/// The closed set of executables the tracker may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllowedCommand {
    Touch,
    Mkdir,
}

impl AllowedCommand {
    pub const ALL: [AllowedCommand; 2] = [AllowedCommand::Touch, AllowedCommand::Mkdir];

    pub fn program(self) -> &'static str {
        match self {
            AllowedCommand::Touch => "touch",
            AllowedCommand::Mkdir => "mkdir",
        }
    }

    /// Exact, case-sensitive match on the executable name
    pub fn from_program(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.program() == name)
    }
}

impl fmt::Display for AllowedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())
    }
}

/// A tokenized command line, not yet checked against the whitelist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRequest {
    executable: String,
    args: Vec<String>,
}

impl CommandRequest {
    /// Split on whitespace and strip a leading `sudo` (any case)
    pub fn parse(raw: &str) -> Result<Self, CommandError> {
        let mut tokens = raw.split_whitespace();
        let first = tokens.next().ok_or(CommandError::Empty)?;

        let executable = if first.eq_ignore_ascii_case("sudo") {
            tokens.next().ok_or(CommandError::EmptyAfterSudo)?
        } else {
            first
        };

        Ok(Self {
            executable: executable.to_string(),
            args: tokens.map(str::to_string).collect(),
        })
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn authorize(self) -> Result<AuthorizedCommand, CommandError> {
        match AllowedCommand::from_program(&self.executable) {
            Some(command) => Ok(AuthorizedCommand {
                command,
                args: self.args,
            }),
            None => Err(CommandError::NotWhitelisted(self.executable)),
        }
    }
}

/// A whitelisted executable and its positional arguments
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedCommand {
    command: AllowedCommand,
    args: Vec<String>,
}

impl AuthorizedCommand {
    pub fn new(command: AllowedCommand, args: Vec<String>) -> Self {
        Self { command, args }
    }

    pub fn command(&self) -> AllowedCommand {
        self.command
    }

    pub fn program(&self) -> &'static str {
        self.command.program()
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }
}

impl fmt::Display for AuthorizedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.program())?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn authorize(raw: &str) -> Result<AuthorizedCommand, CommandError> {
        CommandRequest::parse(raw).and_then(CommandRequest::authorize)
    }

    #[test]
    fn test_parse_tokens() {
        let request = CommandRequest::parse("  mkdir   -p  /tmp/a/b ").unwrap();
        assert_eq!(request.executable(), "mkdir");
        assert_eq!(request.args(), ["-p", "/tmp/a/b"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(matches!(CommandRequest::parse(""), Err(CommandError::Empty)));
        assert!(matches!(CommandRequest::parse(" \t\n"), Err(CommandError::Empty)));
        assert!(matches!(
            CommandRequest::parse("sudo"),
            Err(CommandError::EmptyAfterSudo)
        ));
        assert!(matches!(
            CommandRequest::parse("SUDO   "),
            Err(CommandError::EmptyAfterSudo)
        ));
    }

    #[test]
    fn test_sudo_is_stripped() {
        assert_eq!(authorize("sudo touch x").unwrap(), authorize("touch x").unwrap());
        assert_eq!(authorize("Sudo mkdir y").unwrap(), authorize("mkdir y").unwrap());
        assert_eq!(authorize("sUdO mkdir y").unwrap().to_string(), "mkdir y");
    }

    #[test]
    fn test_whitelist_accepts_members_with_any_args() {
        for raw in ["touch", "touch a b c", "mkdir -p /tmp/x", "mkdir"] {
            assert!(authorize(raw).is_ok(), "{raw} should be allowed");
        }
    }

    #[test]
    fn test_whitelist_rejects_everything_else() {
        for raw in ["rm c", "mkdirp x", "Touch a", "/usr/bin/touch a", "touchy", "sudo rm -rf /"] {
            let err = authorize(raw).unwrap_err();
            assert!(
                matches!(err, CommandError::NotWhitelisted(_)),
                "{raw} should be rejected, got {err}"
            );
            assert_eq!(err.outcome(), CommandOutcome::NotWhitelisted);
        }
    }

    #[test]
    fn test_outcome_labels() {
        assert_eq!(CommandError::Empty.outcome(), CommandOutcome::ParseError);
        assert_eq!(
            CommandError::Timeout {
                program: "touch",
                after: Duration::from_secs(1)
            }
            .outcome(),
            CommandOutcome::Failed
        );
    }
}
