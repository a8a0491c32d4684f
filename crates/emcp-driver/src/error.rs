//! Driver error types.

use std::time::Duration;
use thiserror::Error;

/// Result type for driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// Errors raised by transports, protocol drivers and the facade.
#[derive(Debug, Error)]
pub enum DriverError {
    /// TCP connect or SSH handshake failed.
    #[error("Device {host} unreachable: {message}")]
    Unreachable { host: String, message: String },

    /// The device refused the credentials.
    #[error("Authentication rejected by {host} for user '{user}'")]
    AuthRejected { host: String, user: String },

    /// The device does not advertise a required capability.
    #[error("Missing required capability: {capability}")]
    MissingCapability { capability: String },

    /// An operation did not complete in time.
    #[error("Timed out after {after:?} waiting for {operation}")]
    Timeout {
        operation: String,
        after: Duration,
    },

    /// The device rejected the configuration as invalid.
    #[error("Validation failed: {message}")]
    Validation { message: String },

    /// NETCONF `rpc-error` not classified as a validation error.
    #[error("Device error '{tag}': {message}")]
    Device { tag: String, message: String },

    /// A CLI command produced output matching an error pattern.
    #[error("Command '{command}' failed: {output}")]
    CommandFailed { command: String, output: String },

    /// Malformed or unexpected protocol data.
    #[error("Protocol error: {message}")]
    Protocol { message: String },

    /// Operation requested before connect or after disconnect.
    #[error("Not connected")]
    NotConnected,

    /// The remote side closed the channel.
    #[error("Channel closed by peer")]
    Closed,

    /// Unknown CLI dialect or other unusable device parameters.
    #[error("Invalid device parameters: {message}")]
    InvalidParams { message: String },

    /// Low-level I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DriverError {
    pub fn unreachable(host: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Unreachable {
            host: host.into(),
            message: message.into(),
        }
    }

    pub fn timeout(operation: impl Into<String>, after: Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            after,
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Returns true if the device rejected the configuration content.
    pub fn is_validation(&self) -> bool {
        matches!(self, DriverError::Validation { .. })
    }

    /// Returns true if a new connection attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::Unreachable { .. } | DriverError::Timeout { .. } | DriverError::Io(_)
        )
    }
}

impl From<russh::Error> for DriverError {
    fn from(err: russh::Error) -> Self {
        match err {
            russh::Error::IO(e) => DriverError::Io(e),
            russh::Error::Disconnect | russh::Error::HUP => DriverError::Closed,
            other => DriverError::protocol(format!("ssh: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(DriverError::validation("bad mtu").is_validation());
        assert!(!DriverError::validation("bad mtu").is_retryable());
        assert!(DriverError::unreachable("10.0.0.1", "refused").is_retryable());
        assert!(DriverError::timeout("hello", Duration::from_secs(1)).is_retryable());

        let err = DriverError::AuthRejected {
            host: "10.0.0.1".to_string(),
            user: "admin".to_string(),
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Authentication rejected by 10.0.0.1 for user 'admin'"
        );
    }
}
