//! osquery-backed change source
//!
//! Runs the osquery shell in JSON mode for each query. With a socket
//! configured the shell attaches to the running `osqueryd` extension socket,
//! which is where `file_events` rows accumulate:
//!
//! ```text
//! osqueryi [extra args] --connect /var/osquery/osquery.em --json "SELECT * FROM file_events WHERE ..."
//! ```
//!
//! osquery reports every column as a string; anything else that shows up is
//! stringified so rows stay `field -> string` maps.

use std::ffi::OsString;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::process::Command;
use tokio::time::timeout;

use super::{ChangeEvent, ChangeFilter, ChangeSource, QueryOutcome, SourceError, SourceResult};
use crate::config::OsqueryConfig;

/// Change source that shells out to `osqueryi`
#[derive(Debug)]
pub struct OsqueryCliSource {
    binary: PathBuf,
    extra_args: Vec<String>,
    socket: Option<PathBuf>,
    timeout: Duration,
    closed: AtomicBool,
}

impl OsqueryCliSource {
    pub fn new(binary: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            socket: None,
            timeout,
            closed: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &OsqueryConfig) -> Self {
        let source =
            Self::new(config.binary.clone(), config.timeout()).with_args(config.extra_args.clone());
        match &config.socket_path {
            Some(socket) => source.with_socket(socket.clone()),
            None => source,
        }
    }

    /// Query the daemon behind this extension socket instead of a fresh shell
    pub fn with_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.socket = Some(socket.into());
        self
    }

    /// Arguments placed before `--json`, e.g. `--database_path`
    pub fn with_args(mut self, args: Vec<String>) -> Self {
        self.extra_args = args;
        self
    }

    /// Full argument vector for one query
    pub fn command_args(&self, sql: &str) -> Vec<OsString> {
        let mut args: Vec<OsString> = self.extra_args.iter().map(OsString::from).collect();
        if let Some(socket) = &self.socket {
            args.push("--connect".into());
            args.push(socket.clone().into_os_string());
        }
        args.push("--json".into());
        args.push(sql.into());
        args
    }
}

#[async_trait::async_trait]
impl ChangeSource for OsqueryCliSource {
    fn name(&self) -> &str {
        "osquery"
    }

    async fn query(&self, filter: &ChangeFilter) -> SourceResult<QueryOutcome> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SourceError::Closed);
        }

        let sql = filter.to_sql();
        tracing::trace!(sql = %sql, "running osquery");

        let mut command = Command::new(&self.binary);
        command
            .args(self.command_args(&sql))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = timeout(self.timeout, command.output())
            .await
            .map_err(|_| SourceError::Timeout(self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(SourceError::query(format!(
                "osquery exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        parse_rows(&output.stdout)
    }

    async fn close(&self) -> SourceResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// Decode osquery JSON output into rows
///
/// Blank output and `[]` both mean no matches.
pub fn parse_rows(stdout: &[u8]) -> SourceResult<QueryOutcome> {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return Ok(QueryOutcome::Empty);
    }

    let raw: Vec<Map<String, Value>> =
        serde_json::from_slice(stdout).map_err(|e| SourceError::decode(e.to_string()))?;

    let rows = raw
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(field, value)| (field, stringify(value)))
                .collect::<ChangeEvent>()
        })
        .collect();

    Ok(QueryOutcome::from_rows(rows))
}

fn stringify(value: Value) -> String {
    match value {
        Value::String(s) => s,
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
