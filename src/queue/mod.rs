//! Durable, retrying delivery queue.

mod backoff;
mod dispatch;
mod item;
mod store;
mod submission;
mod worker;

pub use backoff::{RetryPolicy, DEFAULT_BASE_DELAY};
pub use dispatch::{Dispatcher, LogDispatcher};
pub use item::{ItemUpdate, OutboundMessage, QueueItem, QueueStats, QueueStatus};
pub use store::{InMemoryQueueStore, QueueStore};
pub use submission::{SubmitReport, Submission};
pub use worker::QueueWorker;

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::QueueConfig;
use crate::error::{BulwarkError, Result};

/// Default number of items drained per processing pass.
pub const DEFAULT_BATCH_SIZE: usize = 20;
/// Default attempt ceiling for new items.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The delivery queue.
///
/// Owns the lifecycle of queued messages: admission, draining due items,
/// dispatch, and retry bookkeeping. All state lives in the injected
/// [`QueueStore`]; the queue itself holds no per-item state.
pub struct DeliveryQueue {
    store: Arc<dyn QueueStore>,
    dispatcher: Arc<dyn Dispatcher>,
    clock: Arc<dyn Clock>,
    policy: RetryPolicy,
    batch_size: usize,
    default_max_retries: u32,
}

impl DeliveryQueue {
    /// Create a queue with default batch size, retry ceiling and schedule.
    pub fn new(store: Arc<dyn QueueStore>, dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            clock: Arc::new(SystemClock),
            policy: RetryPolicy::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Create a queue tuned by `config`.
    pub fn from_config(
        config: &QueueConfig,
        store: Arc<dyn QueueStore>,
        dispatcher: Arc<dyn Dispatcher>,
    ) -> Self {
        let policy = RetryPolicy::new(
            Duration::from_secs(config.base_backoff_secs),
            config.max_backoff_secs.map(Duration::from_secs),
        );
        Self::new(store, dispatcher)
            .with_retry_policy(policy)
            .with_batch_size(config.batch_size)
            .with_default_max_retries(config.default_max_retries)
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries.max(1);
        self
    }

    /// Queue a message with the default retry ceiling.
    pub async fn enqueue(&self, message: OutboundMessage) -> Result<Uuid> {
        self.enqueue_with_retries(message, self.default_max_retries)
            .await
    }

    /// Queue a message that may be attempted at most `max_retries` times.
    #[instrument(skip(self, message), fields(recipients = message.recipients.len()))]
    pub async fn enqueue_with_retries(
        &self,
        message: OutboundMessage,
        max_retries: u32,
    ) -> Result<Uuid> {
        if max_retries == 0 {
            return Err(BulwarkError::InvalidMessage(
                "max_retries must be positive".to_string(),
            ));
        }
        message.validate()?;

        let item = QueueItem::new(message, max_retries, self.clock.now());
        let id = item.id;

        self.store.insert(item).await.map_err(|e| {
            error!(error = %e, "Failed to enqueue message");
            match e {
                BulwarkError::Persistence(reason) => BulwarkError::Persistence(reason),
                other => BulwarkError::Persistence(other.to_string()),
            }
        })?;

        info!(id = %id, max_retries, "Message queued");
        Ok(id)
    }

    /// Drain one batch of due items, dispatching each in turn.
    ///
    /// Never fails: dispatch failures become retry or failure transitions and
    /// store failures are logged, leaving the item to the next pass.
    #[instrument(skip(self))]
    pub async fn process_pending(&self) {
        let now = self.clock.now();
        let items = match self.store.select_due(now, self.batch_size).await {
            Ok(items) => items,
            Err(e) => {
                error!(error = %e, "Failed to fetch pending messages");
                return;
            }
        };

        if items.is_empty() {
            debug!("No pending messages to process");
            return;
        }

        info!(count = items.len(), "Processing pending messages");

        for item in items {
            self.process_item(&item).await;
        }
    }

    async fn process_item(&self, item: &QueueItem) {
        // Guard against a store that hands back rows we should not touch.
        if !item.is_due(self.clock.now()) {
            warn!(id = %item.id, status = %item.status, "Skipping item that is not due");
            return;
        }

        match dispatch::attempt(self.dispatcher.as_ref(), &item.message).await {
            Ok(()) => {
                let update = ItemUpdate::Sent {
                    sent_at: self.clock.now(),
                };
                match self.store.update(item.id, update).await {
                    Ok(()) => info!(id = %item.id, "Message sent"),
                    Err(e) => error!(
                        id = %item.id,
                        error = %e,
                        "Message sent but status update failed"
                    ),
                }
            }
            Err(reason) => self.handle_retry(item, reason).await,
        }
    }

    async fn handle_retry(&self, item: &QueueItem, reason: String) {
        let attempts = item.attempts.saturating_add(1);

        let update = if attempts >= item.max_retries {
            let last_error = if reason.is_empty() {
                "Max retries exceeded".to_string()
            } else {
                reason
            };
            error!(
                id = %item.id,
                attempts,
                error = %last_error,
                "Message failed after max retries"
            );
            ItemUpdate::Failed {
                attempts,
                last_error,
            }
        } else {
            let last_error = if reason.is_empty() {
                "Retry scheduled".to_string()
            } else {
                reason
            };
            let next_retry_at = self.policy.next_retry_at(attempts, self.clock.now());
            warn!(
                id = %item.id,
                attempt = attempts,
                next_retry_at = %next_retry_at,
                error = %last_error,
                "Message retry scheduled"
            );
            ItemUpdate::RetryScheduled {
                attempts,
                next_retry_at,
                last_error,
            }
        };

        if let Err(e) = self.store.update(item.id, update).await {
            error!(
                id = %item.id,
                error = %e,
                "Failed to record delivery failure; item left for next pass"
            );
        }
    }

    /// Counts of items by status. Returns all zeros if the store fails.
    pub async fn get_stats(&self) -> QueueStats {
        match self.store.statuses().await {
            Ok(statuses) => QueueStats::from_statuses(statuses),
            Err(e) => {
                error!(error = %e, "Failed to fetch queue stats");
                QueueStats::default()
            }
        }
    }

    /// Fetch a single item.
    pub async fn get(&self, id: Uuid) -> Result<Option<QueueItem>> {
        self.store.get(id).await
    }

    /// The `limit` most recently created items, newest first.
    pub async fn recent_items(&self, limit: usize) -> Result<Vec<QueueItem>> {
        self.store.recent(limit).await
    }

    /// Reset a sent or failed item to pending with a fresh attempt budget.
    ///
    /// Returns `false` when the item is already pending.
    #[instrument(skip(self))]
    pub async fn requeue(&self, id: Uuid) -> Result<bool> {
        let item = self.store.get(id).await?.ok_or(BulwarkError::NotFound(id))?;
        if !item.status.is_terminal() {
            debug!(id = %id, "Item already pending; requeue skipped");
            return Ok(false);
        }

        self.store
            .update(
                id,
                ItemUpdate::Requeued {
                    next_retry_at: self.clock.now(),
                },
            )
            .await?;

        info!(id = %id, previous_status = %item.status, "Message requeued");
        Ok(true)
    }

    /// Requeue every failed item, returning how many were reset.
    #[instrument(skip(self))]
    pub async fn requeue_failed(&self) -> Result<usize> {
        let ids = self.store.ids_with_status(QueueStatus::Failed).await?;
        let now = self.clock.now();

        for id in &ids {
            self.store
                .update(*id, ItemUpdate::Requeued { next_retry_at: now })
                .await?;
        }

        info!(count = ids.len(), "Failed messages requeued");
        Ok(ids.len())
    }
}

impl std::fmt::Debug for DeliveryQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeliveryQueue")
            .field("policy", &self.policy)
            .field("batch_size", &self.batch_size)
            .field("default_max_retries", &self.default_max_retries)
            .finish()
    }
}
