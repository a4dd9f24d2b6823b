//! Dispatch collaborator for delivering queued messages.

use std::panic::AssertUnwindSafe;

use async_trait::async_trait;
use futures::FutureExt;
use tracing::info;

use super::item::OutboundMessage;
use crate::error::{BulwarkError, Result};

/// Transport that attempts delivery of a single message.
///
/// Returning `Err` (conventionally `BulwarkError::Dispatch`) marks the
/// attempt as failed; the queue then schedules a retry or gives up.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn send(&self, message: &OutboundMessage) -> Result<()>;
}

/// Dispatcher that records the message in the log and reports success.
///
/// Stands in for a mail transport when none is wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogDispatcher;

#[async_trait]
impl Dispatcher for LogDispatcher {
    async fn send(&self, message: &OutboundMessage) -> Result<()> {
        info!(
            recipients = ?message.recipients,
            subject = %message.subject,
            has_html = message.html_body.is_some(),
            has_text = message.text_body.is_some(),
            "Delivering message"
        );
        Ok(())
    }
}

/// Run a dispatch attempt, turning both errors and panics into a reason string.
pub(crate) async fn attempt(
    dispatcher: &dyn Dispatcher,
    message: &OutboundMessage,
) -> std::result::Result<(), String> {
    match AssertUnwindSafe(dispatcher.send(message))
        .catch_unwind()
        .await
    {
        Ok(Ok(())) => Ok(()),
        Ok(Err(BulwarkError::Dispatch(reason))) => Err(reason),
        Ok(Err(e)) => Err(e.to_string()),
        Err(panic) => Err(panic_message(panic.as_ref())),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("dispatcher panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("dispatcher panicked: {s}")
    } else {
        "dispatcher panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Refusing;

    #[async_trait]
    impl Dispatcher for Refusing {
        async fn send(&self, _message: &OutboundMessage) -> Result<()> {
            Err(BulwarkError::Dispatch("mailbox full".to_string()))
        }
    }

    struct Exploding;

    #[async_trait]
    impl Dispatcher for Exploding {
        async fn send(&self, _message: &OutboundMessage) -> Result<()> {
            panic!("connection reset");
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage::new(["a@example.com"], "s").text("b")
    }

    #[tokio::test]
    async fn test_log_dispatcher_succeeds() {
        assert_eq!(attempt(&LogDispatcher, &message()).await, Ok(()));
    }

    #[tokio::test]
    async fn test_dispatch_error_reason_is_kept() {
        assert_eq!(
            attempt(&Refusing, &message()).await,
            Err("mailbox full".to_string())
        );
    }

    #[tokio::test]
    async fn test_panicking_dispatcher_is_contained() {
        let reason = attempt(&Exploding, &message()).await.unwrap_err();
        assert!(reason.contains("connection reset"), "got {reason}");
    }
}
