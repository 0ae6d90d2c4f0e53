//! Change event sources
//!
//! A [`ChangeSource`] answers bounded queries over file change events. The
//! poller builds a [`ChangeFilter`] (path prefix plus an exclusive lower time
//! bound) and hands it to the source; the source either returns rows, reports
//! that nothing matched ([`QueryOutcome::Empty`]), or fails.
//!
//! Implementations:
//! - [`OsqueryCliSource`]: shells out to the osquery interactive shell
//! - [`MemoryChangeSource`]: in-process event list, for tests and demo runs

pub mod filter;
pub mod memory;
pub mod osquery;

pub use filter::ChangeFilter;
pub use memory::MemoryChangeSource;
pub use osquery::OsqueryCliSource;

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when querying a change source
#[derive(Error, Debug)]
pub enum SourceError {
    /// The backend rejected or failed to run the query
    #[error("Query failed: {0}")]
    Query(String),

    /// The query did not return within the configured bound
    #[error("Query timed out after {0:?}")]
    Timeout(Duration),

    /// The backend answered with something that is not a row set
    #[error("Decode error: {0}")]
    Decode(String),

    /// The source client has been released
    #[error("Change source is closed")]
    Closed,

    /// Spawning or talking to the backend failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SourceError {
    /// Create a query error
    pub fn query(msg: impl Into<String>) -> Self {
        SourceError::Query(msg.into())
    }

    /// Create a decode error
    pub fn decode(msg: impl Into<String>) -> Self {
        SourceError::Decode(msg.into())
    }
}

/// Result type for source operations
pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// A single file change event: field name to string value
///
/// Always carries `target_path` and `time` (epoch seconds as a string) when
/// produced by a real source; every other field is opaque.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChangeEvent(BTreeMap<String, String>);

impl ChangeEvent {
    /// Field holding the changed path
    pub const TARGET_PATH: &'static str = "target_path";
    /// Field holding the event time in epoch seconds
    pub const TIME: &'static str = "time";

    /// Create an event with the two well-known fields
    pub fn new(target_path: impl Into<String>, time: impl fmt::Display) -> Self {
        Self::default()
            .with_field(Self::TARGET_PATH, target_path)
            .with_field(Self::TIME, time.to_string())
    }

    /// Add or replace a field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn target_path(&self) -> Option<&str> {
        self.get(Self::TARGET_PATH)
    }

    pub fn time(&self) -> Option<&str> {
        self.get(Self::TIME)
    }

    /// The `time` field as epoch seconds, `None` when missing or not an integer
    pub fn parsed_time(&self) -> Option<i64> {
        self.time()?.parse().ok()
    }

    pub fn fields(&self) -> &BTreeMap<String, String> {
        &self.0
    }

    pub fn into_fields(self) -> BTreeMap<String, String> {
        self.0
    }
}

impl From<BTreeMap<String, String>> for ChangeEvent {
    fn from(fields: BTreeMap<String, String>) -> Self {
        Self(fields)
    }
}

impl FromIterator<(String, String)> for ChangeEvent {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Result of a successful query
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryOutcome {
    /// Matching rows, in the order the backend returned them
    Rows(Vec<ChangeEvent>),
    /// Nothing matched; not an error
    Empty,
}

impl QueryOutcome {
    /// Wrap a row set, mapping an empty one to [`QueryOutcome::Empty`]
    pub fn from_rows(rows: Vec<ChangeEvent>) -> Self {
        if rows.is_empty() {
            QueryOutcome::Empty
        } else {
            QueryOutcome::Rows(rows)
        }
    }

    pub fn len(&self) -> usize {
        match self {
            QueryOutcome::Rows(rows) => rows.len(),
            QueryOutcome::Empty => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, QueryOutcome::Empty)
    }
}

/// Core trait for change event backends
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn ChangeSource>`.
/// A query is never cancelled mid-flight by the poller; bounding its duration
/// is the implementation's job.
#[async_trait::async_trait]
pub trait ChangeSource: Send + Sync + fmt::Debug {
    /// Returns the name of this source, for logs
    fn name(&self) -> &str;

    /// Run one bounded query
    ///
    /// # Returns
    ///
    /// The matching rows, [`QueryOutcome::Empty`] when nothing matched, or an
    /// error if the backend could not answer.
    async fn query(&self, filter: &ChangeFilter) -> SourceResult<QueryOutcome>;

    /// Release the underlying client
    ///
    /// Default implementation does nothing (for sources without a client).
    async fn close(&self) -> SourceResult<()> {
        Ok(())
    }
}
