//! Blocking TCP transport carrying one JSON document per connection.
//!
//! The sender writes its request and half-closes; the receiver reads to
//! EOF, answers, and shuts the socket down. Liveness probes are bare
//! connect attempts.

pub(crate) mod client;
pub(crate) mod server;

use std::time::Duration;

/// How long a client waits for a peer's response before declaring it
/// unreachable.
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Bound on connect attempts, both for requests and liveness probes.
pub(crate) const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

/// A poor connection can leave stray bytes after the closing brace; trim
/// everything past the last `}` before parsing.
pub(crate) fn sanitize(raw: &str) -> &str {
    match raw.rfind('}') {
        Some(position) => &raw[..=position],
        None => raw,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn sanitize_trims_trailing_garbage() {
        assert_eq!(sanitize("{\"A\": 1}\0\0\u{7f}"), "{\"A\": 1}");
        assert_eq!(sanitize("{\"A\": {}}"), "{\"A\": {}}");
        assert_eq!(sanitize("no brace"), "no brace");
    }
}
