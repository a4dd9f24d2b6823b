//! Fixed-window counters and window durations.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{BulwarkError, Result};

/// Window used when a duration string cannot be parsed.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Length of a rate limit window.
///
/// Configured as `"<n> <unit>"` where unit is one of `s`, `m`, `h`, `d` and
/// the space is optional (`"15 m"`, `"1h"`). Malformed strings deserialize
/// to [`DEFAULT_WINDOW`] with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct WindowDuration(Duration);

impl WindowDuration {
    pub fn new(duration: Duration) -> Self {
        Self(duration)
    }

    pub fn from_secs(secs: u64) -> Self {
        Self(Duration::from_secs(secs))
    }

    pub fn from_mins(mins: u64) -> Self {
        Self::from_secs(mins * 60)
    }

    pub fn from_hours(hours: u64) -> Self {
        Self::from_secs(hours * 3600)
    }

    /// Parse a duration string strictly.
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        let split = text
            .find(|c: char| !c.is_ascii_digit())
            .ok_or_else(|| invalid(text))?;
        let (digits, unit) = text.split_at(split);

        let amount: u64 = digits.parse().map_err(|_| invalid(text))?;
        let unit_secs = match unit.trim_start() {
            "s" => 1,
            "m" => 60,
            "h" => 3600,
            "d" => 86400,
            _ => return Err(invalid(text)),
        };

        let secs = amount.checked_mul(unit_secs).ok_or_else(|| invalid(text))?;
        if secs == 0 {
            return Err(invalid(text));
        }
        Ok(Self::from_secs(secs))
    }

    /// Parse a duration string, falling back to [`DEFAULT_WINDOW`].
    pub fn parse_or_default(text: &str) -> Self {
        Self::parse(text).unwrap_or_else(|e| {
            warn!(window = %text, error = %e, "Invalid window; using default");
            Self(DEFAULT_WINDOW)
        })
    }

    pub fn as_duration(&self) -> Duration {
        self.0
    }

    pub fn as_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.0).unwrap_or(chrono::Duration::MAX)
    }
}

fn invalid(text: &str) -> BulwarkError {
    BulwarkError::Configuration(format!("invalid window duration {text:?}"))
}

impl Default for WindowDuration {
    fn default() -> Self {
        Self(DEFAULT_WINDOW)
    }
}

impl From<String> for WindowDuration {
    fn from(text: String) -> Self {
        Self::parse_or_default(&text)
    }
}

impl From<WindowDuration> for String {
    fn from(window: WindowDuration) -> Self {
        window.to_string()
    }
}

impl std::fmt::Display for WindowDuration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let secs = self.0.as_secs();
        let (amount, unit) = match secs {
            s if s != 0 && s % 86400 == 0 => (s / 86400, "d"),
            s if s != 0 && s % 3600 == 0 => (s / 3600, "h"),
            s if s != 0 && s % 60 == 0 => (s / 60, "m"),
            s => (s, "s"),
        };
        write!(f, "{amount} {unit}")
    }
}

/// A single fixed window counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedWindow {
    /// Requests observed in the current window
    pub count: u64,
    pub window_start: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
}

impl FixedWindow {
    /// Open an empty window starting at `now`.
    pub fn open(now: DateTime<Utc>, window: WindowDuration) -> Self {
        Self {
            count: 0,
            window_start: now,
            reset_at: now
                .checked_add_signed(window.as_chrono())
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    /// Roll the window if it has expired, then count one request.
    ///
    /// Returns the post-increment count.
    pub fn hit(&mut self, now: DateTime<Utc>, window: WindowDuration) -> u64 {
        if self.is_expired(now) {
            *self = Self::open(now, window);
        }
        self.count = self.count.saturating_add(1);
        self.count
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.reset_at
    }
}

/// Window state returned by a counter store after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Post-increment count
    pub count: u64,
    pub limit: u64,
    pub reset_at: DateTime<Utc>,
}

impl WindowState {
    pub fn is_over_limit(&self) -> bool {
        self.count > self.limit
    }

    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}
