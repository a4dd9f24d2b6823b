//! Counter store trait for abstracting shared and in-process counters.

use async_trait::async_trait;

use super::counter::{WindowDuration, WindowState};
use super::key::CounterKey;
use crate::error::Result;

/// Storage for fixed-window counters.
///
/// `increment_and_get` must be a single atomic step: count one request for
/// `key` (rolling the window first if it has expired) and return the
/// post-increment state. A store that cannot be reached should return
/// `BulwarkError::LimiterUnavailable`.
#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn increment_and_get(
        &self,
        key: &CounterKey,
        limit: u64,
        window: WindowDuration,
    ) -> Result<WindowState>;
}
