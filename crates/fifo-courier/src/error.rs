//! Error types for queue client operations.

use crate::consumer::PollSummary;
use thiserror::Error;

/// Failure reported by a queue transport.
///
/// Every transport classifies its failures into one of two kinds. The poll
/// loop backs off and continues on [`TransportError::Transient`], and stops on
/// [`TransportError::Permanent`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// Network failure, timeout or throttling. Retrying later may succeed.
    #[error("Transient transport failure ({code}): {message}")]
    Transient { code: String, message: String },

    /// Missing queue, bad credentials, malformed request. Retrying will not help.
    #[error("Permanent transport failure ({code}): {message}")]
    Permanent { code: String, message: String },
}

impl TransportError {
    /// Build a transient error
    pub fn transient(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Build a permanent error
    pub fn permanent(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Permanent {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Service or client error code
    pub fn code(&self) -> &str {
        match self {
            Self::Transient { code, .. } | Self::Permanent { code, .. } => code,
        }
    }
}

/// Errors returned by the send path
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SendError {
    /// The send may have failed for a temporary reason. Re-send with the same
    /// business key to stay idempotent.
    #[error("Send failed transiently: {source}")]
    Transient {
        #[source]
        source: TransportError,
    },

    /// The message or destination was refused and re-sending will not help.
    #[error("Send rejected: {reason}")]
    Rejected { reason: String },
}

impl SendError {
    /// Check if the caller may retry the send
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

impl From<TransportError> for SendError {
    fn from(error: TransportError) -> Self {
        match error {
            TransportError::Transient { .. } => Self::Transient { source: error },
            TransportError::Permanent { .. } => Self::Rejected {
                reason: error.to_string(),
            },
        }
    }
}

impl From<ValidationError> for SendError {
    fn from(error: ValidationError) -> Self {
        Self::Rejected {
            reason: error.to_string(),
        }
    }
}

/// Opaque failure reported by a message handler.
///
/// The poll loop never inspects the inner error. It only records that the
/// message was not handled and leaves it on the queue.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct HandlerError(Box<dyn std::error::Error + Send + Sync>);

impl HandlerError {
    /// Wrap any error type
    pub fn new(error: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Self(error.into())
    }

    /// Build from a plain message
    pub fn msg(message: impl Into<String>) -> Self {
        Self(message.into().into())
    }

    /// Borrow the wrapped error
    pub fn inner(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.0.as_ref()
    }
}

/// Misuse of the acknowledgment tracker, e.g. double acknowledgment
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidStateError {
    #[error("Record for message '{message_id}' already transitioned to {current}")]
    AlreadyResolved { message_id: String, current: String },

    #[error("Record for message '{message_id}' is not tracked")]
    UnknownRecord { message_id: String },
}

/// Fatal poll loop failure
#[derive(Debug, Error)]
pub enum PollError {
    /// A permanent transport failure stopped the loop. The summary covers the
    /// cycles completed before the failure.
    #[error("Poll loop stopped after {} cycles: {source}", summary.cycles_run)]
    Fatal {
        #[source]
        source: TransportError,
        summary: PollSummary,
    },
}

impl PollError {
    /// Summary of the work done before the loop stopped
    pub fn summary(&self) -> &PollSummary {
        match self {
            Self::Fatal { summary, .. } => summary,
        }
    }
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Invalid configuration: {message}")]
    Invalid { message: String },

    #[error("Missing required configuration: {key}")]
    Missing { key: String },

    #[error("Configuration parsing failed: {message}")]
    Parsing { message: String },
}

impl From<config::ConfigError> for ConfigurationError {
    fn from(error: config::ConfigError) -> Self {
        Self::Parsing {
            message: error.to_string(),
        }
    }
}

/// Validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
