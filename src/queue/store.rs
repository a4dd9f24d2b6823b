//! Queue store capability and an in-process implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use super::item::{ItemUpdate, QueueItem, QueueStatus};
use crate::error::{BulwarkError, Result};

/// Row-oriented persistence for queue items.
///
/// Implementations must make `insert` and `update` atomic per row. No
/// cross-row transactions are required.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Persist a new item.
    async fn insert(&self, item: QueueItem) -> Result<()>;

    /// Fetch a single item.
    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>>;

    /// Apply `update` to the row with `id`, failing with `NotFound` if absent.
    async fn update(&self, id: Uuid, update: ItemUpdate) -> Result<()>;

    /// Up to `limit` pending items with `next_retry_at <= now`, oldest first.
    async fn select_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>>;

    /// Ids of every item in `status`.
    async fn ids_with_status(&self, status: QueueStatus) -> Result<Vec<Uuid>>;

    /// The status of every row.
    async fn statuses(&self) -> Result<Vec<QueueStatus>>;

    /// Up to `limit` items, newest first.
    async fn recent(&self, limit: usize) -> Result<Vec<QueueItem>>;
}

/// Queue store held in process memory.
///
/// Suitable for tests and single-process deployments; contents are lost on
/// restart.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    rows: DashMap<Uuid, QueueItem>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored items.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, item: QueueItem) -> Result<()> {
        if self.rows.contains_key(&item.id) {
            return Err(BulwarkError::Persistence(format!(
                "duplicate queue item id {}",
                item.id
            )));
        }
        self.rows.insert(item.id, item);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        Ok(self.rows.get(&id).map(|row| row.value().clone()))
    }

    async fn update(&self, id: Uuid, update: ItemUpdate) -> Result<()> {
        let mut row = self.rows.get_mut(&id).ok_or(BulwarkError::NotFound(id))?;
        update.apply(row.value_mut());
        Ok(())
    }

    async fn select_due(&self, now: DateTime<Utc>, limit: usize) -> Result<Vec<QueueItem>> {
        let mut due: Vec<QueueItem> = self
            .rows
            .iter()
            .filter(|row| row.is_due(now))
            .map(|row| row.value().clone())
            .collect();

        due.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        due.truncate(limit);
        Ok(due)
    }

    async fn ids_with_status(&self, status: QueueStatus) -> Result<Vec<Uuid>> {
        Ok(self
            .rows
            .iter()
            .filter(|row| row.status == status)
            .map(|row| *row.key())
            .collect())
    }

    async fn statuses(&self) -> Result<Vec<QueueStatus>> {
        Ok(self.rows.iter().map(|row| row.status).collect())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<QueueItem>> {
        let mut items: Vec<QueueItem> = self.rows.iter().map(|row| row.value().clone()).collect();
        items.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        items.truncate(limit);
        Ok(items)
    }
}
