//! Queue item model and the state transitions applied to it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BulwarkError, Result};

/// Lifecycle status of a queued message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueStatus {
    /// Waiting for its next dispatch attempt
    Pending,
    /// Delivered
    Sent,
    /// Retries exhausted
    Failed,
}

impl QueueStatus {
    /// Whether automatic processing can still move an item out of this status.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, QueueStatus::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Sent => "sent",
            QueueStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The payload handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboundMessage {
    /// Destination addresses, in order
    pub recipients: Vec<String>,
    pub subject: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub html_body: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_body: Option<String>,
}

impl OutboundMessage {
    /// Create a message with no body.
    pub fn new<I, S>(recipients: I, subject: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            recipients: recipients.into_iter().map(Into::into).collect(),
            subject: subject.into(),
            html_body: None,
            text_body: None,
        }
    }

    /// Create a message from a comma separated recipient list.
    pub fn with_recipient_list(list: &str, subject: impl Into<String>) -> Self {
        Self::new(
            list.split(',').map(str::trim).filter(|r| !r.is_empty()),
            subject,
        )
    }

    pub fn html(mut self, body: impl Into<String>) -> Self {
        self.html_body = Some(body.into());
        self
    }

    pub fn text(mut self, body: impl Into<String>) -> Self {
        self.text_body = Some(body.into());
        self
    }

    /// Reject messages that can never be delivered.
    pub fn validate(&self) -> Result<()> {
        if self.recipients.is_empty() {
            return Err(BulwarkError::InvalidMessage(
                "at least one recipient is required".to_string(),
            ));
        }
        if self.recipients.iter().any(|r| r.trim().is_empty()) {
            return Err(BulwarkError::InvalidMessage(
                "recipient addresses must not be blank".to_string(),
            ));
        }
        if self.html_body.is_none() && self.text_body.is_none() {
            return Err(BulwarkError::InvalidMessage(
                "an html or text body is required".to_string(),
            ));
        }
        Ok(())
    }
}

/// One row of the delivery queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueItem {
    pub id: Uuid,
    #[serde(flatten)]
    pub message: OutboundMessage,
    pub status: QueueStatus,
    /// Dispatch attempts made so far
    pub attempts: u32,
    /// Attempts allowed before the item is marked failed
    pub max_retries: u32,
    /// The item is not dispatched before this instant
    pub next_retry_at: DateTime<Utc>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
}

impl QueueItem {
    /// Build a fresh pending item that is due immediately.
    pub fn new(message: OutboundMessage, max_retries: u32, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            message,
            status: QueueStatus::Pending,
            attempts: 0,
            max_retries,
            next_retry_at: now,
            last_error: None,
            created_at: now,
            sent_at: None,
        }
    }

    /// Whether the item should be picked up by a processing pass at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == QueueStatus::Pending && self.next_retry_at <= now
    }
}

/// A row-level update to a queue item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemUpdate {
    /// Delivery succeeded.
    Sent { sent_at: DateTime<Utc> },
    /// Delivery failed and another attempt is scheduled.
    RetryScheduled {
        attempts: u32,
        next_retry_at: DateTime<Utc>,
        last_error: String,
    },
    /// Delivery failed and no attempts remain.
    Failed { attempts: u32, last_error: String },
    /// Operator reset back to pending.
    Requeued { next_retry_at: DateTime<Utc> },
}

impl ItemUpdate {
    /// Apply this update to an item in place.
    pub fn apply(&self, item: &mut QueueItem) {
        match self {
            ItemUpdate::Sent { sent_at } => {
                item.status = QueueStatus::Sent;
                item.sent_at = Some(*sent_at);
                item.last_error = None;
            }
            ItemUpdate::RetryScheduled {
                attempts,
                next_retry_at,
                last_error,
            } => {
                item.status = QueueStatus::Pending;
                item.attempts = *attempts;
                item.next_retry_at = *next_retry_at;
                item.last_error = Some(last_error.clone());
            }
            ItemUpdate::Failed {
                attempts,
                last_error,
            } => {
                item.status = QueueStatus::Failed;
                item.attempts = *attempts;
                item.last_error = Some(last_error.clone());
            }
            ItemUpdate::Requeued { next_retry_at } => {
                item.status = QueueStatus::Pending;
                item.attempts = 0;
                item.next_retry_at = *next_retry_at;
                item.last_error = None;
                item.sent_at = None;
            }
        }
    }
}

/// Point-in-time counts of queue items by status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub sent: u64,
    pub failed: u64,
    pub total: u64,
}

impl QueueStats {
    pub fn from_statuses<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = QueueStatus>,
    {
        statuses
            .into_iter()
            .fold(QueueStats::default(), |mut stats, status| {
                match status {
                    QueueStatus::Pending => stats.pending += 1,
                    QueueStatus::Sent => stats.sent += 1,
                    QueueStatus::Failed => stats.failed += 1,
                }
                stats.total += 1;
                stats
            })
    }
}
