//! In-memory change source

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use super::{ChangeEvent, ChangeFilter, ChangeSource, QueryOutcome, SourceError, SourceResult};

/// Change source backed by a plain event list
///
/// Queries return every stored event accepted by the filter, in insertion
/// order.
#[derive(Debug, Default)]
pub struct MemoryChangeSource {
    events: Mutex<Vec<ChangeEvent>>,
    closed: AtomicBool,
}

impl MemoryChangeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a source pre-loaded with events
    pub fn with_events(events: impl IntoIterator<Item = ChangeEvent>) -> Self {
        Self {
            events: Mutex::new(events.into_iter().collect()),
            closed: AtomicBool::new(false),
        }
    }

    /// Append an event, as if the filesystem had just reported it
    pub fn push(&self, event: ChangeEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait::async_trait]
impl ChangeSource for MemoryChangeSource {
    fn name(&self) -> &str {
        "memory"
    }

    async fn query(&self, filter: &ChangeFilter) -> SourceResult<QueryOutcome> {
        if self.is_closed() {
            return Err(SourceError::Closed);
        }

        let rows = self
            .events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| filter.matches(event))
            .cloned()
            .collect();

        Ok(QueryOutcome::from_rows(rows))
    }

    async fn close(&self) -> SourceResult<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_query_preserves_insertion_order() {
        let source = MemoryChangeSource::with_events([
            ChangeEvent::new("/w/a", 100),
            ChangeEvent::new("/w/b", 105),
            ChangeEvent::new("/w/c", 103),
            ChangeEvent::new("/elsewhere/d", 110),
        ]);

        let outcome = source.query(&ChangeFilter::new("/w", 99)).await.unwrap();
        let QueryOutcome::Rows(rows) = outcome else {
            panic!("expected rows");
        };
        let times: Vec<_> = rows.iter().filter_map(ChangeEvent::parsed_time).collect();
        assert_eq!(times, vec![100, 105, 103]);
    }

    #[tokio::test]
    async fn test_empty_when_nothing_matches() {
        let source = MemoryChangeSource::with_events([ChangeEvent::new("/w/a", 100)]);
        let outcome = source.query(&ChangeFilter::new("/w", 100)).await.unwrap();
        assert_eq!(outcome, QueryOutcome::Empty);
    }

    #[tokio::test]
    async fn test_closed_source_rejects_queries() {
        let source = MemoryChangeSource::new();
        source.close().await.unwrap();

        let err = source.query(&ChangeFilter::new("/w", 0)).await.unwrap_err();
        assert!(matches!(err, SourceError::Closed));
    }
}
