//! In-memory change log

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{page_size, LogRecord, LogSink, SinkError, SinkResult};
use crate::source::ChangeEvent;

/// Insertion-ordered vector of records; nothing survives a restart
#[derive(Debug, Default)]
pub struct MemoryLogSink {
    records: Mutex<Vec<LogRecord>>,
    closed: AtomicBool,
}

impl MemoryLogSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl LogSink for MemoryLogSink {
    async fn write(&self, event: &ChangeEvent) -> SinkResult<LogRecord> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SinkError::Closed);
        }

        let record = LogRecord::new(event.clone());
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record.clone());
        Ok(record)
    }

    async fn read_paginated(&self, limit: usize, offset: usize) -> SinkResult<Vec<LogRecord>> {
        let records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(records
            .iter()
            .rev()
            .skip(offset)
            .take(page_size(limit))
            .cloned()
            .collect())
    }

    async fn close(&self) -> SinkResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
