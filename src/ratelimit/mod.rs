//! Fixed-window admission limiting with degraded-mode fallback.

mod backend;
mod counter;
mod identity;
mod key;
mod limiter;
mod memory;
mod response;
mod rules;

pub use backend::CounterStore;
pub use counter::{FixedWindow, WindowDuration, WindowState, DEFAULT_WINDOW};
pub use identity::{client_identifier, UNKNOWN_CLIENT};
pub use key::CounterKey;
pub use limiter::AdmissionLimiter;
pub use memory::InMemoryCounterStore;
pub use response::{
    Decision, Denial, DenialBody, DENIAL_MESSAGE, HEADER_LIMIT, HEADER_REMAINING, HEADER_RESET,
    HEADER_RETRY_AFTER, STATUS_TOO_MANY_REQUESTS,
};
pub use rules::{FallbackPolicy, LimiterConfig, LimiterRegistry};
