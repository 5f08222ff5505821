//! Error types for the AMI client

use thiserror::Error;

/// Result alias used throughout the crate.
pub type AmiResult<T> = Result<T, AmiError>;

/// Boxed error returned by event callbacks.
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Errors produced by the AMI client
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmiError {
    /// Transport I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation did not complete in time
    #[error("timed out after {timeout_ms}ms")]
    Timeout {
        /// Elapsed limit in milliseconds
        timeout_ms: u64,
    },

    /// The connection closed before the action resolved
    #[error("connection closed")]
    ConnectionClosed,

    /// No live connection to send on
    #[error("not connected")]
    NotConnected,

    /// The peer sent something that cannot be AMI
    #[error("protocol error: {message}")]
    ProtocolError {
        /// What went wrong
        message: String,
    },

    /// An action field would corrupt the wire format
    #[error("invalid field: {field}")]
    InvalidField {
        /// Offending field description
        field: String,
    },

    /// An event pattern failed to compile
    #[error("invalid event pattern '{pattern}': {message}")]
    InvalidPattern {
        /// Pattern as given
        pattern: String,
        /// Compiler message
        message: String,
    },

    /// The action id is already waiting for a response
    #[error("action id already pending: {action_id}")]
    DuplicateActionId {
        /// Reused id
        action_id: String,
    },

    /// An event callback returned an error
    #[error("event callback for '{pattern}' failed: {source}")]
    Callback {
        /// Pattern whose callback failed
        pattern: String,
        /// Callback error
        #[source]
        source: CallbackError,
    },

    /// TLS setup failure
    #[error("TLS error: {message}")]
    Tls {
        /// Underlying message
        message: String,
    },

    /// Built outside a tokio runtime without an explicit handle
    #[error("no tokio runtime available")]
    NoRuntime,
}

impl AmiError {
    /// Create a protocol error
    pub fn protocol_error(message: impl Into<String>) -> Self {
        Self::ProtocolError {
            message: message.into(),
        }
    }

    /// `true` for failures caused by losing the transport.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            AmiError::Io(_) | AmiError::ConnectionClosed | AmiError::NotConnected
        )
    }
}
