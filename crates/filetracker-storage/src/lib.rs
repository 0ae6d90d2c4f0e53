//! Durable change log backed by sled
//!
//! Records live in a single tree keyed by sled's monotonic id generator,
//! encoded big-endian so that byte order equals insertion order. Reading the
//! tree in reverse yields the most recent records first.

pub mod error;

pub use error::StorageError;

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use filetracker_core::sink::{page_size, LogRecord, LogSink, SinkError, SinkResult};
use filetracker_core::source::ChangeEvent;

const TREE_NAME: &str = "change_log";

/// sled-backed [`LogSink`]
#[derive(Debug)]
pub struct SledLogSink {
    db: sled::Db,
    tree: sled::Tree,
    closed: AtomicBool,
}

impl SledLogSink {
    /// Open or create a change log under `path`
    pub fn open(path: impl AsRef<Path>) -> error::Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = sled::open(path)?;
        tracing::info!(path = %path.display(), "opened change log");
        Self::from_db(db)
    }

    /// A change log that is deleted when dropped
    pub fn temporary() -> error::Result<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: sled::Db) -> error::Result<Self> {
        let tree = db.open_tree(TREE_NAME)?;
        Ok(Self {
            db,
            tree,
            closed: AtomicBool::new(false),
        })
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    fn append(&self, event: &ChangeEvent) -> error::Result<LogRecord> {
        let record = LogRecord::new(event.clone());
        let key = self.db.generate_id()?.to_be_bytes();
        let value = serde_json::to_vec(&record)?;
        self.tree.insert(key, value)?;
        Ok(record)
    }

    fn read(&self, limit: usize, offset: usize) -> error::Result<Vec<LogRecord>> {
        self.tree
            .iter()
            .values()
            .rev()
            .skip(offset)
            .take(page_size(limit))
            .map(|value| -> error::Result<LogRecord> { Ok(serde_json::from_slice(&value?)?) })
            .collect()
    }
}

#[async_trait::async_trait]
impl LogSink for SledLogSink {
    async fn write(&self, event: &ChangeEvent) -> SinkResult<LogRecord> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }
        Ok(self.append(event)?)
    }

    async fn read_paginated(&self, limit: usize, offset: usize) -> SinkResult<Vec<LogRecord>> {
        Ok(self.read(limit, offset)?)
    }

    async fn close(&self) -> SinkResult<()> {
        self.closed.store(true, Ordering::Release);
        let flushed = self
            .db
            .flush_async()
            .await
            .map_err(StorageError::from)?;
        tracing::debug!(bytes = flushed, "change log flushed");
        Ok(())
    }
}
