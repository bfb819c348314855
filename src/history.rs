//! History recorder.
//!
//! Appends the current conditions of every fresh fetch to a per-location
//! series. Each record carries a process-wide monotonic sequence so records
//! sharing a timestamp still order deterministically.

use chrono::Duration;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::clock::Clock;
use crate::storage::{HistoryStore, PersistenceError};
use crate::types::{CurrentConditions, HistoryRecord, LocationKey};

#[derive(Clone)]
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    clock: Arc<dyn Clock>,
    sequence: Arc<AtomicU64>,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Append one observation for `key`.
    pub async fn append(
        &self,
        key: &LocationKey,
        current: CurrentConditions,
    ) -> Result<HistoryRecord, PersistenceError> {
        let record = HistoryRecord {
            location_key: key.clone(),
            recorded_at: self.clock.now(),
            sequence: self.sequence.fetch_add(1, Ordering::SeqCst) + 1,
            current,
        };
        self.store.append(record.clone()).await?;
        debug!(location_key = %key, sequence = record.sequence, "History record appended");
        Ok(record)
    }

    /// Most recent records for `key`, newest first.
    pub async fn recent(
        &self,
        key: &LocationKey,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, PersistenceError> {
        self.store.recent(key, limit).await
    }

    /// Drop records older than `retention`.
    pub async fn purge_older_than(&self, retention: Duration) -> Result<u64, PersistenceError> {
        self.store
            .purge_recorded_before(self.clock.now() - retention)
            .await
    }
}
