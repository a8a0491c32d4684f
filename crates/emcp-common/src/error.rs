//! Error types shared across the control plane.
//!
//! Request-shape and configuration errors are detected before any device
//! I/O happens, so they live here rather than in the driver or store crates.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for common operations.
pub type EmcpResult<T> = Result<T, EmcpError>;

/// Errors raised while parsing requests or loading configuration.
#[derive(Debug, Error)]
pub enum EmcpError {
    /// The change request document is malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A device section is missing from, or duplicated in, the request.
    #[error("Device '{device}' {problem}")]
    Device {
        /// The device name.
        device: String,
        /// Short description of the problem.
        problem: String,
    },

    /// Configuration validation error.
    #[error("Invalid configuration for {field}: {message}")]
    InvalidConfig {
        /// The field that failed validation.
        field: String,
        /// Error message.
        message: String,
    },

    /// Failed to read a configuration file.
    #[error("Failed to read {path}: {source}")]
    ConfigRead {
        /// The file path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: io::Error,
    },

    /// Failed to parse a configuration file.
    #[error("Failed to parse {path}: {source}")]
    ConfigParse {
        /// The file path.
        path: PathBuf,
        /// The TOML error.
        #[source]
        source: toml::de::Error,
    },

    /// JSON payload could not be decoded.
    #[error("Malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),
}

impl EmcpError {
    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a device-scoped request error.
    pub fn device(device: impl Into<String>, problem: impl Into<String>) -> Self {
        Self::Device {
            device: device.into(),
            problem: problem.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            message: message.into(),
        }
    }

    /// Returns true if this error describes the request rather than the
    /// process configuration.
    pub fn is_request_shape(&self) -> bool {
        matches!(
            self,
            EmcpError::InvalidRequest { .. } | EmcpError::Device { .. } | EmcpError::Json(_)
        )
    }
}
