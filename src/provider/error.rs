//! Error type for provider calls.

use thiserror::Error;

/// Raised when a provider call fails outright.
///
/// The remote payload is preserved verbatim so callers can log it.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
#[error("{operation} failed{}: {message}", status_suffix(.status.as_ref()))]
pub struct ProviderError {
    /// Provider operation that failed (for example `attach_volume`).
    pub operation: String,
    /// HTTP status code, when the failure came from a response.
    pub status: Option<u16>,
    /// Remote error payload or transport error message.
    pub message: String,
}

fn status_suffix(status: Option<&u16>) -> String {
    status.map(|code| format!(" with status {code}")).unwrap_or_default()
}

impl ProviderError {
    /// Builds an error for a failure without a response status.
    #[must_use]
    pub fn new(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: None,
            message: message.into(),
        }
    }

    /// Builds an error for a non-success response.
    #[must_use]
    pub fn with_status(operation: impl Into<String>, status: u16, message: impl Into<String>) -> Self {
        Self {
            operation: operation.into(),
            status: Some(status),
            message: message.into(),
        }
    }

    /// Returns `true` when the provider answered 404.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        self.status == Some(404)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_includes_status_when_present() {
        let err = ProviderError::with_status("attach_volume", 400, "Volume is busy");
        assert_eq!(
            err.to_string(),
            "attach_volume failed with status 400: Volume is busy"
        );
    }

    #[test]
    fn message_omits_status_for_transport_failures() {
        let err = ProviderError::new("get_volume", "connection reset");
        assert_eq!(err.to_string(), "get_volume failed: connection reset");
        assert!(!err.is_not_found());
    }
}
