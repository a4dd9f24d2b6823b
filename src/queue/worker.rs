//! Periodic trigger for draining the delivery queue.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::info;

use super::DeliveryQueue;

/// Runs [`DeliveryQueue::process_pending`] on a fixed interval.
pub struct QueueWorker {
    queue: Arc<DeliveryQueue>,
    interval: Duration,
}

impl QueueWorker {
    pub fn new(queue: Arc<DeliveryQueue>, interval: Duration) -> Self {
        Self {
            queue,
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Process the queue once per tick until `shutdown` resolves.
    ///
    /// The first pass runs immediately. `shutdown` is only polled between
    /// passes, so a pass already in progress completes its dispatches and
    /// bookkeeping before the worker stops.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        info!(interval_ms = self.interval.as_millis() as u64, "Starting queue worker");

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.queue.process_pending().await,
            }
        }

        info!("Queue worker stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::queue::{
        Dispatcher, InMemoryQueueStore, LogDispatcher, OutboundMessage, QueueStatus,
    };
    use async_trait::async_trait;
    use tokio::sync::Notify;

    /// Signals when a send starts, then takes a while to finish.
    struct SlowDispatcher {
        started: Arc<Notify>,
    }

    #[async_trait]
    impl Dispatcher for SlowDispatcher {
        async fn send(&self, _message: &OutboundMessage) -> Result<()> {
            self.started.notify_one();
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_drains_queue_and_stops() {
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = Arc::new(DeliveryQueue::new(store, Arc::new(LogDispatcher)));
        let id = queue
            .enqueue(OutboundMessage::new(["a@example.com"], "hi").text("body"))
            .await
            .unwrap();

        let worker = QueueWorker::new(queue.clone(), Duration::from_millis(10));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let handle = tokio::spawn(worker.run_until(async {
            let _ = rx.await;
        }));

        let mut sent = false;
        for _ in 0..100 {
            if queue.get(id).await.unwrap().unwrap().status == QueueStatus::Sent {
                sent = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(sent, "worker should have delivered the message");

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should stop after shutdown")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_lets_current_pass_finish() {
        let started = Arc::new(Notify::new());
        let store = Arc::new(InMemoryQueueStore::new());
        let queue = Arc::new(DeliveryQueue::new(
            store,
            Arc::new(SlowDispatcher {
                started: started.clone(),
            }),
        ));
        let id = queue
            .enqueue(OutboundMessage::new(["a@example.com"], "hi").text("body"))
            .await
            .unwrap();

        let worker = QueueWorker::new(queue.clone(), Duration::from_secs(3600));
        let signal = started.clone();
        tokio::time::timeout(
            Duration::from_secs(1),
            worker.run_until(async move { signal.notified().await }),
        )
        .await
        .expect("worker should stop after the pass");

        let item = queue.get(id).await.unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Sent);
        assert!(item.sent_at.is_some());
    }
}
