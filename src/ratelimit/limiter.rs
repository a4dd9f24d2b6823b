//! Admission limiter with in-process fallback.

use std::sync::Arc;

use tracing::{debug, error, instrument, trace, warn};

use super::backend::CounterStore;
use super::key::CounterKey;
use super::memory::InMemoryCounterStore;
use super::response::Decision;
use super::rules::LimiterConfig;
use crate::clock::{Clock, SystemClock};

/// Fixed-window admission limiter.
///
/// Counts go to the primary (shared) counter store. When that store errors,
/// the check is answered from the fallback store using the limiter's
/// fallback policy, so callers always receive a definite decision. If the
/// fallback also errors the request is admitted.
pub struct AdmissionLimiter {
    primary: Arc<dyn CounterStore>,
    fallback: Arc<dyn CounterStore>,
    clock: Arc<dyn Clock>,
}

impl AdmissionLimiter {
    /// Create a limiter over `primary` with a process-local fallback.
    pub fn new(primary: Arc<dyn CounterStore>) -> Self {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        Self {
            primary,
            fallback: Arc::new(InMemoryCounterStore::with_clock(clock.clone())),
            clock,
        }
    }

    /// Create a limiter with explicit stores and clock.
    pub fn with_stores(
        primary: Arc<dyn CounterStore>,
        fallback: Arc<dyn CounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            primary,
            fallback,
            clock,
        }
    }

    /// Count one request from `identifier` against `config` and decide.
    #[instrument(skip(self, config), fields(limiter = %config.name))]
    pub async fn check(&self, config: &LimiterConfig, identifier: &str) -> Decision {
        let key = CounterKey::new(&config.name, identifier);
        let limit = config.effective_limit();

        trace!(key = %key, limit, "Checking admission");

        let state = match self
            .primary
            .increment_and_get(&key, limit, config.window)
            .await
        {
            Ok(state) => state,
            Err(e) => {
                warn!(key = %key, error = %e, "Counter store unavailable, falling back to in-memory");
                let policy = config.fallback_policy();
                match self
                    .fallback
                    .increment_and_get(&key, policy.limit, policy.window)
                    .await
                {
                    Ok(state) => state,
                    Err(e) => {
                        error!(key = %key, error = %e, "Fallback counter failed; admitting request");
                        let now = self.clock.now();
                        return Decision::Allowed {
                            limit: policy.limit,
                            remaining: policy.limit,
                            reset_at: now,
                        };
                    }
                }
            }
        };

        let decision = Decision::from_state(state, self.clock.now());
        if !decision.is_allowed() {
            debug!(
                key = %key,
                count = state.count,
                limit = state.limit,
                "Rate limit exceeded"
            );
        }
        decision
    }
}
