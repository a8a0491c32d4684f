//! Audit records for provisioning activity.
//!
//! Every change the control plane pushes to a device, and every transaction
//! boundary, is recorded as a structured [`AuditRecord`] emitted on the
//! `audit` tracing target. The status/log read surface consumes these
//! records; the JSON form is stable.
//!
//! # Severity mapping
//!
//! | Outcome | Level |
//! |---------|-------|
//! | Success | info |
//! | InProgress | debug |
//! | Failure / Denied | warn |

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Category of an audited event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditCategory {
    /// Transaction accepted, split, finished
    TransactionLifecycle,
    /// Connect and disconnect of a device session
    DeviceSession,
    /// Configuration staged, committed or removed on a device
    ConfigurationChange,
    /// Automatic or requested rollback
    Rollback,
    /// Failure recorded by the subnormal handler
    ErrorCondition,
    /// Daemon start/stop and operator actions
    AdminAction,
}

impl fmt::Display for AuditCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditCategory::TransactionLifecycle => write!(f, "TRANSACTION_LIFECYCLE"),
            AuditCategory::DeviceSession => write!(f, "DEVICE_SESSION"),
            AuditCategory::ConfigurationChange => write!(f, "CONFIGURATION_CHANGE"),
            AuditCategory::Rollback => write!(f, "ROLLBACK"),
            AuditCategory::ErrorCondition => write!(f, "ERROR_CONDITION"),
            AuditCategory::AdminAction => write!(f, "ADMIN_ACTION"),
        }
    }
}

/// Outcome of an audited action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AuditOutcome {
    Success,
    Failure,
    InProgress,
    Denied,
}

impl fmt::Display for AuditOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditOutcome::Success => write!(f, "success"),
            AuditOutcome::Failure => write!(f, "failure"),
            AuditOutcome::InProgress => write!(f, "in_progress"),
            AuditOutcome::Denied => write!(f, "denied"),
        }
    }
}

/// One structured audit event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub timestamp: DateTime<Utc>,
    pub category: AuditCategory,
    /// Component that generated the event
    pub source: String,
    pub action: String,
    pub outcome: AuditOutcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl AuditRecord {
    /// Creates a record stamped now, with outcome `InProgress`.
    pub fn new(
        category: AuditCategory,
        source: impl Into<String>,
        action: impl Into<String>,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            category,
            source: source.into(),
            action: action.into(),
            outcome: AuditOutcome::InProgress,
            transaction_id: None,
            device: None,
            details: None,
            error: None,
        }
    }

    pub fn with_outcome(mut self, outcome: AuditOutcome) -> Self {
        self.outcome = outcome;
        self
    }

    pub fn with_transaction(mut self, transaction_id: impl Into<String>) -> Self {
        self.transaction_id = Some(transaction_id.into());
        self
    }

    pub fn with_device(mut self, device: impl Into<String>) -> Self {
        self.device = Some(device.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Sets the error message and marks the outcome as failure.
    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self.outcome = AuditOutcome::Failure;
        self
    }

    /// Serializes the record for the `audit_json` field.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Emits an [`AuditRecord`] on the `audit` target at a level chosen by its
/// outcome.
///
/// ```ignore
/// let record = AuditRecord::new(AuditCategory::Rollback, "workflow", "rollback")
///     .with_transaction("tx-1")
///     .with_device("leaf-01")
///     .with_outcome(AuditOutcome::Success);
/// audit_log!(record);
/// ```
#[macro_export]
macro_rules! audit_log {
    ($record:expr) => {
        let record = $record;
        match record.outcome {
            $crate::audit::AuditOutcome::Success => {
                tracing::info!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::InProgress => {
                tracing::debug!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
            $crate::audit::AuditOutcome::Failure | $crate::audit::AuditOutcome::Denied => {
                tracing::warn!(
                    target: "audit",
                    category = %record.category,
                    source = %record.source,
                    action = %record.action,
                    outcome = %record.outcome,
                    error = record.error.as_deref().unwrap_or(""),
                    audit_json = %record.to_json(),
                    "AUDIT: {} - {} - {}",
                    record.category,
                    record.action,
                    record.outcome
                );
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = AuditRecord::new(AuditCategory::ConfigurationChange, "workflow", "commit")
            .with_transaction("tx-1")
            .with_device("leaf-01")
            .with_outcome(AuditOutcome::Success);
        assert_eq!(record.transaction_id.as_deref(), Some("tx-1"));
        assert_eq!(record.outcome, AuditOutcome::Success);
    }

    #[test]
    fn test_with_error_marks_failure() {
        let record =
            AuditRecord::new(AuditCategory::Rollback, "workflow", "rollback").with_error("timeout");
        assert_eq!(record.outcome, AuditOutcome::Failure);
        assert_eq!(record.error.as_deref(), Some("timeout"));
    }

    #[test]
    fn test_json_skips_empty_fields() {
        let json = AuditRecord::new(AuditCategory::AdminAction, "provisiond", "start").to_json();
        assert!(json.contains("\"category\":\"ADMIN_ACTION\""));
        assert!(json.contains("\"outcome\":\"in_progress\""));
        assert!(!json.contains("device"));
    }

    #[test]
    fn test_audit_log_macro_compiles_for_all_outcomes() {
        for outcome in [
            AuditOutcome::Success,
            AuditOutcome::InProgress,
            AuditOutcome::Failure,
            AuditOutcome::Denied,
        ] {
            crate::audit_log!(
                AuditRecord::new(AuditCategory::AdminAction, "test", "noop").with_outcome(outcome)
            );
        }
    }
}
