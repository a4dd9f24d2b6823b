//! Counter key handling.

/// Identifies one fixed-window counter: a named limiter and a caller identifier.
///
/// Counters for different limiters never share state, even for the same
/// identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CounterKey {
    /// Name of the limiter, e.g. `auth`
    pub limiter: String,
    /// Caller identifier, usually a client address
    pub identifier: String,
}

impl CounterKey {
    pub fn new(limiter: &str, identifier: &str) -> Self {
        Self {
            limiter: limiter.to_string(),
            identifier: identifier.to_string(),
        }
    }

    /// Flat string form, `limiter:identifier`, for stores keyed by string.
    pub fn to_string_key(&self) -> String {
        format!("{}:{}", self.limiter, self.identifier)
    }
}

impl std::fmt::Display for CounterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_string_key())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_key_to_string() {
        let key = CounterKey::new("auth", "203.0.113.7");
        assert_eq!(key.to_string_key(), "auth:203.0.113.7");
        assert_eq!(key.to_string(), "auth:203.0.113.7");
    }

    #[test]
    fn test_counter_key_equality() {
        assert_eq!(CounterKey::new("api", "a"), CounterKey::new("api", "a"));
        assert_ne!(CounterKey::new("api", "a"), CounterKey::new("auth", "a"));
        assert_ne!(CounterKey::new("api", "a"), CounterKey::new("api", "b"));
    }
}
