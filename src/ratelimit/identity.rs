//! Caller identification for admission checks.

use std::net::IpAddr;

/// Identifier used when nothing identifies the caller.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Headers consulted for the client address, in priority order.
const CLIENT_ADDRESS_HEADERS: [&str; 3] = ["x-forwarded-for", "x-real-ip", "cf-connecting-ip"];

/// Derive the caller identifier from request headers and the peer address.
///
/// Checks `X-Forwarded-For` (first entry), `X-Real-IP`, then
/// `CF-Connecting-IP`, then the connection address. Header names match
/// case-insensitively and blank values are skipped.
pub fn client_identifier<'a, I>(headers: I, remote_addr: Option<IpAddr>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let headers: Vec<(&str, &str)> = headers.into_iter().collect();

    let lookup = |wanted: &str| {
        headers
            .iter()
            .find(|(name, _)| name.eq_ignore_ascii_case(wanted))
            .map(|(_, value)| *value)
    };

    for header in CLIENT_ADDRESS_HEADERS {
        let Some(value) = lookup(header) else {
            continue;
        };
        let candidate = if header == "x-forwarded-for" {
            value.split(',').next().unwrap_or_default().trim()
        } else {
            value.trim()
        };
        if !candidate.is_empty() {
            return candidate.to_string();
        }
    }

    remote_addr
        .map(|addr| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
