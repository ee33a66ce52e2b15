use std::error::Error as StdError;
use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{ActivityRecord, StoredActivity};

/// Failure reported by an [`ActivityStore`] backend.
#[derive(Debug, Error)]
#[error("activity store failure: {source}")]
pub struct StoreError {
    source: Box<dyn StdError + Send + Sync + 'static>,
}

impl StoreError {
    pub fn new<E>(source: E) -> Self
    where
        E: Into<Box<dyn StdError + Send + Sync + 'static>>,
    {
        Self {
            source: source.into(),
        }
    }
}

/// Append-only persistence for activity records.
#[async_trait]
pub trait ActivityStore: Send + Sync {
    /// Persists `record` and returns the identifier assigned to it.
    async fn insert(&self, record: &ActivityRecord) -> Result<String, StoreError>;

    /// Returns the record with the greatest timestamp, if any.
    async fn fetch_latest(&self) -> Result<Option<StoredActivity>, StoreError>;
}

/// Process-local store used by tests and local tooling.
#[derive(Debug, Default)]
pub struct MemoryActivityStore {
    rows: Mutex<Vec<StoredActivity>>,
}

impl MemoryActivityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of every stored row in insertion order.
    pub fn snapshot(&self) -> Vec<StoredActivity> {
        self.rows
            .lock()
            .map(|rows| rows.clone())
            .unwrap_or_else(|poisoned| poisoned.into_inner().clone())
    }
}

#[async_trait]
impl ActivityStore for MemoryActivityStore {
    async fn insert(&self, record: &ActivityRecord) -> Result<String, StoreError> {
        let mut rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::new("memory store lock poisoned"))?;
        let id = format!("mem-{}", rows.len() + 1);
        rows.push(StoredActivity {
            id: id.clone(),
            record: record.clone(),
        });
        Ok(id)
    }

    async fn fetch_latest(&self) -> Result<Option<StoredActivity>, StoreError> {
        let rows = self
            .rows
            .lock()
            .map_err(|_| StoreError::new("memory store lock poisoned"))?;
        // `max_by` keeps the last of equal elements, so later inserts win ties.
        Ok(rows
            .iter()
            .max_by(|a, b| a.record.timestamp.cmp(&b.record.timestamp))
            .cloned())
    }
}
