//! Process-local counter store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::{debug, trace};

use super::backend::CounterStore;
use super::counter::{FixedWindow, WindowDuration, WindowState};
use super::key::CounterKey;
use crate::clock::{Clock, SystemClock};
use crate::error::Result;

/// Tracked window count at which `hit` first sweeps expired windows.
pub const DEFAULT_SWEEP_THRESHOLD: usize = 10_000;

/// Fixed-window counters held in process memory behind a single mutex.
///
/// Counts are per process: several running instances each enforce the limit
/// on their own. Used as the fallback when the shared store is unreachable.
///
/// Expired windows are swept from within `hit` whenever the map reaches the
/// sweep mark. After a sweep the mark moves to twice the surviving count, so
/// the map stays within twice the number of live windows and sweeps stay
/// amortized.
pub struct InMemoryCounterStore {
    state: Mutex<Windows>,
    clock: Arc<dyn Clock>,
    sweep_threshold: usize,
}

struct Windows {
    map: HashMap<CounterKey, FixedWindow>,
    sweep_at: usize,
}

impl Windows {
    fn sweep(&mut self, now: DateTime<Utc>, threshold: usize) -> usize {
        let before = self.map.len();
        self.map.retain(|_, w| !w.is_expired(now));
        self.sweep_at = threshold.max(self.map.len().saturating_mul(2));
        before - self.map.len()
    }
}

impl InMemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Mutex::new(Windows {
                map: HashMap::new(),
                sweep_at: DEFAULT_SWEEP_THRESHOLD,
            }),
            clock,
            sweep_threshold: DEFAULT_SWEEP_THRESHOLD,
        }
    }

    /// Sweep expired windows once `threshold` windows are tracked.
    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        self.sweep_threshold = threshold.max(1);
        self.state.get_mut().sweep_at = self.sweep_threshold;
        self
    }

    /// Record one request and return the resulting window state.
    pub fn hit(&self, key: &CounterKey, limit: u64, window: WindowDuration) -> WindowState {
        let now = self.clock.now();
        let mut state = self.state.lock();

        if state.map.len() >= state.sweep_at {
            let removed = state.sweep(now, self.sweep_threshold);
            debug!(removed, tracked = state.map.len(), "Swept expired in-memory counters");
        }

        let counter = state.map.entry(key.clone()).or_insert_with(|| {
            debug!(key = %key, limit, window = %window, "Creating in-memory counter");
            FixedWindow::open(now, window)
        });
        let count = counter.hit(now, window);

        trace!(key = %key, count, limit, "In-memory counter incremented");

        WindowState {
            count,
            limit,
            reset_at: counter.reset_at,
        }
    }

    /// Current count for `key` within its active window, if any.
    pub fn current_count(&self, key: &CounterKey) -> Option<u64> {
        let now = self.clock.now();
        let state = self.state.lock();
        state
            .map
            .get(key)
            .map(|w| if w.is_expired(now) { 0 } else { w.count })
    }

    /// Drop windows that have expired. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.state.lock().sweep(now, self.sweep_threshold)
    }

    /// Number of tracked counters.
    pub fn len(&self) -> usize {
        self.state.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().map.is_empty()
    }

    /// Clear all counters.
    pub fn clear(&self) {
        let mut state = self.state.lock();
        state.map.clear();
        state.sweep_at = self.sweep_threshold;
    }
}

impl Default for InMemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CounterStore for InMemoryCounterStore {
    async fn increment_and_get(
        &self,
        key: &CounterKey,
        limit: u64,
        window: WindowDuration,
    ) -> Result<WindowState> {
        Ok(self.hit(key, limit, window))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use chrono::TimeZone;

    fn store() -> (InMemoryCounterStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (InMemoryCounterStore::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_hit_creates_and_increments() {
        let (store, _) = store();
        let key = CounterKey::new("api", "10.0.0.1");
        let window = WindowDuration::from_mins(1);

        assert_eq!(store.hit(&key, 100, window).count, 1);
        assert_eq!(store.hit(&key, 100, window).count, 2);
        assert_eq!(store.current_count(&key), Some(2));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_counters_isolated_by_limiter_and_identifier() {
        let (store, _) = store();
        let window = WindowDuration::from_mins(1);

        store.hit(&CounterKey::new("auth", "a"), 5, window);
        store.hit(&CounterKey::new("auth", "a"), 5, window);
        store.hit(&CounterKey::new("auth", "b"), 5, window);
        store.hit(&CounterKey::new("api", "a"), 5, window);

        assert_eq!(store.current_count(&CounterKey::new("auth", "a")), Some(2));
        assert_eq!(store.current_count(&CounterKey::new("auth", "b")), Some(1));
        assert_eq!(store.current_count(&CounterKey::new("api", "a")), Some(1));
    }

    #[test]
    fn test_window_resets_after_expiry() {
        let (store, clock) = store();
        let key = CounterKey::new("auth", "a");
        let window = WindowDuration::from_mins(15);

        for _ in 0..6 {
            store.hit(&key, 5, window);
        }
        clock.advance(chrono::Duration::minutes(15));

        assert_eq!(store.current_count(&key), Some(0));
        let state = store.hit(&key, 5, window);
        assert_eq!(state.count, 1);
        assert_eq!(state.reset_at, clock.now() + chrono::Duration::minutes(15));
    }

    #[test]
    fn test_purge_expired() {
        let (store, clock) = store();
        store.hit(&CounterKey::new("short", "a"), 5, WindowDuration::from_secs(10));
        store.hit(&CounterKey::new("long", "a"), 5, WindowDuration::from_hours(1));

        clock.advance(chrono::Duration::seconds(30));
        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.len(), 1);

        store.clear();
        assert!(store.is_empty());
    }

    #[test]
    fn test_expired_windows_are_reclaimed_during_hits() {
        let (store, clock) = store();
        let store = store.with_sweep_threshold(100);
        let window = WindowDuration::from_secs(1);

        for round in 0..5 {
            for i in 0..1_000 {
                let key = CounterKey::new("auth", &format!("10.{round}.{}.{}", i / 256, i % 256));
                store.hit(&key, 5, window);
            }
            assert!(
                store.len() <= 2_000,
                "round {round}: {} windows tracked",
                store.len()
            );
            clock.advance(chrono::Duration::hours(1));
        }

        store.purge_expired();
        assert!(store.is_empty());
    }

    #[test]
    fn test_live_windows_survive_sweep() {
        let (store, clock) = store();
        let store = store.with_sweep_threshold(2);
        let long = CounterKey::new("long", "a");

        store.hit(&long, 5, WindowDuration::from_hours(1));
        store.hit(&CounterKey::new("short", "a"), 5, WindowDuration::from_secs(1));
        clock.advance(chrono::Duration::seconds(5));

        // Reaching the mark sweeps the expired window only.
        store.hit(&CounterKey::new("short", "b"), 5, WindowDuration::from_secs(1));
        assert_eq!(store.len(), 2);
        assert_eq!(store.current_count(&long), Some(1));
        assert_eq!(store.current_count(&CounterKey::new("short", "a")), None);
    }
}
