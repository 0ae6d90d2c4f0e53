//! Durable change log
//!
//! A [`LogSink`] appends one [`LogRecord`] per detected change and reads them
//! back most-recent-first. Records are never edited or deleted by the tracker.
//!
//! The record's `created_at` is the insertion timestamp and ordering key; it
//! never leaves the process. Outward-facing callers get a [`LogEntry`].

pub mod memory;

pub use memory::MemoryLogSink;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

use crate::source::ChangeEvent;

/// Page size used when a caller asks for zero records
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// Errors that can occur when writing or reading the change log
#[derive(Error, Debug)]
pub enum SinkError {
    /// Underlying storage engine failure
    #[error("Storage error: {0}")]
    Storage(String),

    /// Record could not be encoded or decoded
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The sink has been closed
    #[error("Log sink is closed")]
    Closed,
}

impl SinkError {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        SinkError::Storage(msg.into())
    }
}

/// Result type for sink operations
pub type SinkResult<T> = std::result::Result<T, SinkError>;

/// One persisted change
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogRecord {
    /// Globally unique id, fresh for every write
    pub id: String,
    /// Insertion timestamp, used only for ordering
    pub created_at: DateTime<Utc>,
    /// Event time taken from the `time` field, or `created_at` if unparseable
    pub occurred_at: DateTime<Utc>,
    /// The originating event
    pub details: ChangeEvent,
}

impl LogRecord {
    /// Stamp a new record for `details`
    pub fn new(details: ChangeEvent) -> Self {
        let created_at = Utc::now();
        let occurred_at = details
            .parsed_time()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(created_at);

        Self {
            id: Uuid::new_v4().to_string(),
            created_at,
            occurred_at,
            details,
        }
    }
}

/// Boundary view of a [`LogRecord`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub id: String,
    pub details: ChangeEvent,
    /// RFC 3339 event time
    #[serde(rename = "logTime")]
    pub log_time: String,
}

impl From<LogRecord> for LogEntry {
    fn from(record: LogRecord) -> Self {
        Self {
            id: record.id,
            details: record.details,
            log_time: record.occurred_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        }
    }
}

/// Resolve a caller-supplied limit
pub fn page_size(limit: usize) -> usize {
    if limit == 0 {
        DEFAULT_PAGE_SIZE
    } else {
        limit
    }
}

/// Storage contract for the change log
///
/// Implementations must be `Send + Sync` for use behind `Arc<dyn LogSink>`.
#[async_trait::async_trait]
pub trait LogSink: Send + Sync + fmt::Debug {
    /// Append one record for `event`
    async fn write(&self, event: &ChangeEvent) -> SinkResult<LogRecord>;

    /// Read up to `limit` records after skipping `offset`, most recent first
    ///
    /// A `limit` of zero reads [`DEFAULT_PAGE_SIZE`] records.
    async fn read_paginated(&self, limit: usize, offset: usize) -> SinkResult<Vec<LogRecord>>;

    /// Flush and release the store
    async fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_uses_event_time() {
        let record = LogRecord::new(ChangeEvent::new("/tmp/a", 1_700_000_000));
        assert_eq!(record.occurred_at.timestamp(), 1_700_000_000);
        assert!(!record.id.is_empty());
    }

    #[test]
    fn test_record_falls_back_to_insertion_time() {
        let record = LogRecord::new(ChangeEvent::new("/tmp/a", "soon"));
        assert_eq!(record.occurred_at, record.created_at);
    }

    #[test]
    fn test_ids_are_unique_per_write() {
        let event = ChangeEvent::new("/tmp/a", 1);
        let first = LogRecord::new(event.clone());
        let second = LogRecord::new(event);
        assert_ne!(first.id, second.id);
    }

    #[test]
    fn test_entry_hides_created_at() {
        let entry = LogEntry::from(LogRecord::new(ChangeEvent::new("/tmp/a", 0)));
        let json = serde_json::to_value(&entry).unwrap();

        assert_eq!(json["logTime"], "1970-01-01T00:00:00Z");
        assert_eq!(json["details"]["target_path"], "/tmp/a");
        assert!(json.get("created_at").is_none());
        assert!(json.get("createdAt").is_none());
    }

    #[test]
    fn test_page_size() {
        assert_eq!(page_size(0), DEFAULT_PAGE_SIZE);
        assert_eq!(page_size(25), 25);
    }
}
