//! `retry-after` header parsing
//!
//! Providers send the header either as a number of seconds or as an RFC 7231
//! HTTP-date. The numeric form is what the major APIs actually emit, so it
//! is tried first.

use tracing::debug;

/// Seconds until a throttled request may be retried, or `None` when the
/// header value is unparseable. A date in the past reads as 0.
pub fn parse_retry_after(header_value: &str) -> Option<u64> {
    if let Ok(seconds) = header_value.trim().parse::<u64>() {
        return Some(seconds);
    }

    if let Ok(target) = chrono::DateTime::parse_from_rfc2822(header_value) {
        let delta = target.signed_duration_since(chrono::Utc::now());
        return Some(delta.num_seconds().max(0) as u64);
    }

    debug!(header_value, "unparseable retry-after header");
    None
}
