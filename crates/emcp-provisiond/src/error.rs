//! Error types for the provisioning daemon.

use thiserror::Error;

use emcp_common::EmcpError;
use emcp_driver::DriverError;
use emcp_store::StoreError;

/// Result type alias for provisioning operations.
pub type WorkflowResult<T> = Result<T, WorkflowError>;

/// Errors raised while translating, dispatching or running a workflow.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The device section could not be turned into device parameters.
    #[error("Cannot translate request for '{device}': {message}")]
    Translation {
        /// The device name.
        device: String,
        /// What was wrong with the section.
        message: String,
    },

    /// No adapter is registered for the service type.
    #[error("No service adapter for '{service_type}'")]
    UnknownService {
        /// The service type.
        service_type: String,
    },

    /// The device is not in the inventory.
    #[error("Device '{device}' is not in the inventory")]
    UnknownDevice {
        /// The device name.
        device: String,
    },

    /// Request or configuration error.
    #[error(transparent)]
    Request(#[from] EmcpError),

    /// Transaction store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Device driver failure.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

impl WorkflowError {
    /// Creates a translation error.
    pub fn translation(device: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Translation {
            device: device.into(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = WorkflowError::translation("leaf-01", "'text' must be a string");
        assert_eq!(
            err.to_string(),
            "Cannot translate request for 'leaf-01': 'text' must be a string"
        );
        let err = WorkflowError::UnknownDevice {
            device: "cpe-9".to_string(),
        };
        assert_eq!(err.to_string(), "Device 'cpe-9' is not in the inventory");
    }
}
