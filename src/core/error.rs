//! Runtime error type for callbacks.

use std::error::Error;

use thiserror::Error;

/// Failure raised by an action or an entry/exit callback.
///
/// Guards cannot fail (they are pure predicates). When a callback returns
/// an `ActionError` the engine either hands it to the machine's
/// `on_action_error` hook and treats the transition as not handled, or,
/// with no hook configured, propagates it out of `process_event`.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ActionError {
    message: String,
    #[source]
    source: Option<Box<dyn Error + Send + Sync>>,
}

impl ActionError {
    /// An error with a plain message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source: None,
        }
    }

    /// An error wrapping an underlying cause.
    pub fn with_source(
        message: impl Into<String>,
        source: impl Error + Send + Sync + 'static,
    ) -> Self {
        Self {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ActionError {
    fn from(message: String) -> Self {
        Self::new(message)
    }
}

impl From<&str> for ActionError {
    fn from(message: &str) -> Self {
        Self::new(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_is_displayed() {
        let err = ActionError::new("device not ready");
        assert_eq!(err.to_string(), "device not ready");
        assert_eq!(err.message(), "device not ready");
    }

    #[test]
    fn source_is_chained() {
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
        let err = ActionError::with_source("flush failed", io);
        assert!(err.source.is_some());
        assert_eq!(err.to_string(), "flush failed");
    }
}
