//! Transient-vs-permanent classification of remote errors

use crate::error::RemoteError;

/// HTTP statuses worth retrying: request timeout, rate limiting, and the
/// transient 5xx family.
const RETRYABLE_STATUSES: [u16; 6] = [408, 429, 500, 502, 503, 504];

/// Message fragments that indicate a connection-level failure rather than a
/// rejection by the remote.
const NETWORK_FRAGMENTS: [&str; 7] = [
    "connection reset",
    "connection refused",
    "fetch failed",
    "network",
    "aborted",
    "dns",
    "timed out",
];

/// Classify a remote error as retryable.
///
/// Total and pure: never panics, no side effects. Neutral errors
/// (cancellation, timeout, identity-not-ready) are *not* transient — the
/// engine requeues those without spending retry budget.
#[must_use]
pub fn is_transient(error: &RemoteError) -> bool {
    match error {
        RemoteError::Network(_) => true,
        RemoteError::Http { status, .. } => RETRYABLE_STATUSES.contains(status),
        RemoteError::Other(message) => {
            let message = message.to_lowercase();
            NETWORK_FRAGMENTS
                .iter()
                .any(|fragment| message.contains(fragment))
        }
        RemoteError::Validation(_)
        | RemoteError::Conflict(_)
        | RemoteError::NotFound(_)
        | RemoteError::Unauthorized(_)
        | RemoteError::Cancelled
        | RemoteError::Timeout
        | RemoteError::IdentityNotReady => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_errors_are_transient() {
        assert!(is_transient(&RemoteError::Network(
            "socket hangup".to_string()
        )));
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            let err = RemoteError::Http {
                status,
                message: "server unavailable".to_string(),
            };
            assert!(is_transient(&err), "status {status} should be transient");
        }
    }

    #[test]
    fn test_client_errors_are_permanent() {
        for status in [400, 401, 403, 404, 409, 422] {
            let err = RemoteError::Http {
                status,
                message: "rejected".to_string(),
            };
            assert!(!is_transient(&err), "status {status} should be permanent");
        }
    }

    #[test]
    fn test_opaque_message_sniffing() {
        assert!(is_transient(&RemoteError::Other(
            "TypeError: Fetch Failed".to_string()
        )));
        assert!(is_transient(&RemoteError::Other(
            "getaddrinfo DNS lookup error".to_string()
        )));
        assert!(!is_transient(&RemoteError::Other(
            "duplicate key value violates unique constraint".to_string()
        )));
    }

    #[test]
    fn test_neutral_errors_are_not_transient() {
        assert!(!is_transient(&RemoteError::Cancelled));
        assert!(!is_transient(&RemoteError::Timeout));
        assert!(!is_transient(&RemoteError::IdentityNotReady));
        assert!(RemoteError::Cancelled.is_neutral());
        assert!(RemoteError::Timeout.is_neutral());
        assert!(RemoteError::IdentityNotReady.is_neutral());
    }

    #[test]
    fn test_permanent_rejections() {
        assert!(!is_transient(&RemoteError::Validation(
            "missing name".to_string()
        )));
        assert!(!is_transient(&RemoteError::Conflict(
            "newer version on remote".to_string()
        )));
        assert!(!is_transient(&RemoteError::NotFound("p1".to_string())));
        assert!(!is_transient(&RemoteError::Unauthorized(
            "token expired".to_string()
        )));
    }
}
