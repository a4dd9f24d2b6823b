//! Admission decisions and their request/response rendering.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::counter::WindowState;

/// HTTP status for a denied request.
pub const STATUS_TOO_MANY_REQUESTS: u16 = 429;

/// Message returned to denied callers.
pub const DENIAL_MESSAGE: &str = "Rate limit exceeded. Please try again later.";

pub const HEADER_LIMIT: &str = "X-RateLimit-Limit";
pub const HEADER_REMAINING: &str = "X-RateLimit-Remaining";
pub const HEADER_RESET: &str = "X-RateLimit-Reset";
pub const HEADER_RETRY_AFTER: &str = "Retry-After";

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed {
        limit: u64,
        remaining: u64,
        reset_at: DateTime<Utc>,
    },
    Denied(Denial),
}

impl Decision {
    /// Decide from a post-increment window state.
    pub fn from_state(state: WindowState, now: DateTime<Utc>) -> Self {
        if state.is_over_limit() {
            Decision::Denied(Denial::new(state.limit, state.reset_at, now))
        } else {
            Decision::Allowed {
                limit: state.limit,
                remaining: state.remaining(),
                reset_at: state.reset_at,
            }
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allowed { .. })
    }

    pub fn remaining(&self) -> u64 {
        match self {
            Decision::Allowed { remaining, .. } => *remaining,
            Decision::Denied(denial) => denial.remaining,
        }
    }

    pub fn denial(&self) -> Option<&Denial> {
        match self {
            Decision::Allowed { .. } => None,
            Decision::Denied(denial) => Some(denial),
        }
    }
}

/// A denied admission with the fields callers need to back off.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Denial {
    pub limit: u64,
    pub remaining: u64,
    pub reset_at: DateTime<Utc>,
    /// Whole seconds until `reset_at`, rounded up, never below one
    pub retry_after_secs: u64,
}

/// JSON body of a 429 response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DenialBody {
    pub error: String,
    pub retry_after: u64,
    pub limit: u64,
    pub remaining: u64,
    /// Reset instant in epoch milliseconds
    pub reset: i64,
}

impl Denial {
    pub fn new(limit: u64, reset_at: DateTime<Utc>, now: DateTime<Utc>) -> Self {
        let millis = (reset_at - now).num_milliseconds().max(0) as u64;
        Self {
            limit,
            remaining: 0,
            reset_at,
            retry_after_secs: millis.div_ceil(1000).max(1),
        }
    }

    pub fn status(&self) -> u16 {
        STATUS_TOO_MANY_REQUESTS
    }

    pub fn message(&self) -> &'static str {
        DENIAL_MESSAGE
    }

    pub fn body(&self) -> DenialBody {
        DenialBody {
            error: DENIAL_MESSAGE.to_string(),
            retry_after: self.retry_after_secs,
            limit: self.limit,
            remaining: self.remaining,
            reset: self.reset_at.timestamp_millis(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.body())
    }

    /// Standard rate limit headers for the response.
    pub fn headers(&self) -> Vec<(&'static str, String)> {
        vec![
            (HEADER_LIMIT, self.limit.to_string()),
            (HEADER_REMAINING, self.remaining.to_string()),
            (HEADER_RESET, self.reset_at.timestamp_millis().to_string()),
            (HEADER_RETRY_AFTER, self.retry_after_secs.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_decision_from_state() {
        let reset_at = t0() + Duration::minutes(15);
        let allowed = Decision::from_state(
            WindowState {
                count: 5,
                limit: 5,
                reset_at,
            },
            t0(),
        );
        assert!(allowed.is_allowed());
        assert_eq!(allowed.remaining(), 0);

        let denied = Decision::from_state(
            WindowState {
                count: 6,
                limit: 5,
                reset_at,
            },
            t0(),
        );
        let denial = denied.denial().unwrap();
        assert_eq!(denial.retry_after_secs, 900);
        assert_eq!(denial.remaining, 0);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let denial = Denial::new(5, t0() + Duration::milliseconds(1500), t0());
        assert_eq!(denial.retry_after_secs, 2);

        let denial = Denial::new(5, t0(), t0());
        assert_eq!(denial.retry_after_secs, 1);
    }

    #[test]
    fn test_denial_rendering() {
        let reset_at = t0() + Duration::seconds(30);
        let denial = Denial::new(10, reset_at, t0());

        assert_eq!(denial.status(), 429);

        let json: serde_json::Value = serde_json::from_str(&denial.to_json().unwrap()).unwrap();
        assert_eq!(json["error"], DENIAL_MESSAGE);
        assert_eq!(json["retryAfter"], 30);
        assert_eq!(json["limit"], 10);
        assert_eq!(json["remaining"], 0);
        assert_eq!(json["reset"], reset_at.timestamp_millis());

        let headers = denial.headers();
        assert_eq!(headers[0], ("X-RateLimit-Limit", "10".to_string()));
        assert_eq!(headers[1], ("X-RateLimit-Remaining", "0".to_string()));
        assert_eq!(
            headers[2],
            ("X-RateLimit-Reset", reset_at.timestamp_millis().to_string())
        );
        assert_eq!(headers[3], ("Retry-After", "30".to_string()));
    }
}
