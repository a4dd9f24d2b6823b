//! Batch submission of messages read from a file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{DeliveryQueue, OutboundMessage};
use crate::error::{BulwarkError, Result};

/// A message to queue, with an optional attempt ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(flatten)]
    pub message: OutboundMessage,
    /// Falls back to the queue's default ceiling when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retries: Option<u32>,
}

impl Submission {
    /// Parse a YAML or JSON list of submissions.
    pub fn parse_list(text: &str) -> Result<Vec<Self>> {
        serde_yaml::from_str(text)
            .map_err(|e| BulwarkError::InvalidMessage(format!("malformed message list: {e}")))
    }

    /// Read a YAML or JSON list of submissions from `path`.
    pub fn read_list<P: AsRef<Path>>(path: P) -> Result<Vec<Self>> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse_list(&contents)
    }
}

/// Outcome of [`DeliveryQueue::submit_all`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub accepted: usize,
    pub rejected: usize,
}

impl DeliveryQueue {
    /// Queue every submission, skipping the ones the queue rejects.
    pub async fn submit_all<I>(&self, submissions: I) -> SubmitReport
    where
        I: IntoIterator<Item = Submission>,
    {
        let mut report = SubmitReport::default();

        for (index, submission) in submissions.into_iter().enumerate() {
            let result = match submission.max_retries {
                Some(max_retries) => {
                    self.enqueue_with_retries(submission.message, max_retries)
                        .await
                }
                None => self.enqueue(submission.message).await,
            };
            match result {
                Ok(_) => report.accepted += 1,
                Err(e) => {
                    warn!(index, error = %e, "Submission rejected");
                    report.rejected += 1;
                }
            }
        }

        info!(
            accepted = report.accepted,
            rejected = report.rejected,
            "Submissions queued"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::{InMemoryQueueStore, LogDispatcher, QueueStats};
    use std::sync::Arc;
    use tokio_test::assert_err;

    const MESSAGES: &str = r#"
- recipients: ["a@example.com", "b@example.com"]
  subject: Welcome
  htmlBody: "<p>hello</p>"
- recipients: ["c@example.com"]
  subject: Receipt
  textBody: "thanks"
  maxRetries: 5
- recipients: []
  subject: Nobody
  textBody: "lost"
"#;

    #[test]
    fn test_parse_yaml_list() {
        let list = Submission::parse_list(MESSAGES).unwrap();
        assert_eq!(list.len(), 3);
        assert_eq!(list[0].message.recipients.len(), 2);
        assert_eq!(list[0].max_retries, None);
        assert_eq!(list[1].max_retries, Some(5));
        assert_eq!(list[1].message.text_body.as_deref(), Some("thanks"));
    }

    #[test]
    fn test_parse_json_list() {
        let json = r#"[{"recipients":["a@example.com"],"subject":"Hi","textBody":"x"}]"#;
        let list = Submission::parse_list(json).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].message.subject, "Hi");
    }

    #[test]
    fn test_malformed_list_is_invalid_message() {
        let err = assert_err!(Submission::parse_list("subject: not a list"));
        assert!(matches!(err, BulwarkError::InvalidMessage(_)));
    }

    #[tokio::test]
    async fn test_submit_all_then_drain() {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = DeliveryQueue::new(store, Arc::new(LogDispatcher));

        let report = queue
            .submit_all(Submission::parse_list(MESSAGES).unwrap())
            .await;
        assert_eq!(
            report,
            SubmitReport {
                accepted: 2,
                rejected: 1
            }
        );
        assert_eq!(queue.get_stats().await.pending, 2);

        let receipt = queue
            .recent_items(10)
            .await
            .unwrap()
            .into_iter()
            .find(|item| item.message.subject == "Receipt")
            .unwrap();
        assert_eq!(receipt.max_retries, 5);

        queue.process_pending().await;
        assert_eq!(
            queue.get_stats().await,
            QueueStats {
                pending: 0,
                sent: 2,
                failed: 0,
                total: 2
            }
        );
    }

    #[test]
    fn test_read_list_from_file() {
        let path = std::env::temp_dir().join(format!("bulwark-msgs-{}.yaml", uuid::Uuid::new_v4()));
        std::fs::write(&path, MESSAGES).unwrap();
        let list = Submission::read_list(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(list.len(), 3);
    }
}
