//! Transaction status and order type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::EmcpError;

/// What a change request asks the devices to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderType {
    /// Provision new configuration
    Create,
    /// Change existing configuration
    Modify,
    /// Remove configuration
    Delete,
    /// Fetch and audit configuration against the last persisted snapshot
    #[serde(alias = "get", alias = "audit")]
    Read,
}

impl OrderType {
    /// Returns the order type name as stored in the transaction store.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderType::Create => "create",
            OrderType::Modify => "modify",
            OrderType::Delete => "delete",
            OrderType::Read => "read",
        }
    }

    /// Returns true if this order changes device configuration.
    pub fn is_write(&self) -> bool {
        !matches!(self, OrderType::Read)
    }
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderType {
    type Err = EmcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(OrderType::Create),
            "modify" => Ok(OrderType::Modify),
            "delete" => Ok(OrderType::Delete),
            "read" | "get" | "audit" => Ok(OrderType::Read),
            other => Err(EmcpError::invalid_request(format!(
                "unknown order type '{}'",
                other
            ))),
        }
    }
}

/// Status of one device within a transaction, also used as the aggregate
/// status of the whole transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionStatus {
    Running,
    ConfigStaged,
    CommitPending,
    Committed,
    Completed,
    RollingBack,
    RolledBack,
    RollbackFailed,
    FailedValidation,
    FailedBadRequest,
    FailedConsistency,
    FailedNoData,
    FailedTransient,
    FailedOther,
    FailedPreFetch,
    FailedApply,
    FailedPostFetch,
    FailedStoppedRetryable,
    FailedStoppedFinal,
}

impl TransactionStatus {
    /// Every status, in declaration order.
    pub const ALL: [TransactionStatus; 19] = [
        TransactionStatus::Running,
        TransactionStatus::ConfigStaged,
        TransactionStatus::CommitPending,
        TransactionStatus::Committed,
        TransactionStatus::Completed,
        TransactionStatus::RollingBack,
        TransactionStatus::RolledBack,
        TransactionStatus::RollbackFailed,
        TransactionStatus::FailedValidation,
        TransactionStatus::FailedBadRequest,
        TransactionStatus::FailedConsistency,
        TransactionStatus::FailedNoData,
        TransactionStatus::FailedTransient,
        TransactionStatus::FailedOther,
        TransactionStatus::FailedPreFetch,
        TransactionStatus::FailedApply,
        TransactionStatus::FailedPostFetch,
        TransactionStatus::FailedStoppedRetryable,
        TransactionStatus::FailedStoppedFinal,
    ];

    /// Returns the status name as written to the store.
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Running => "RUNNING",
            TransactionStatus::ConfigStaged => "CONFIG_STAGED",
            TransactionStatus::CommitPending => "COMMIT_PENDING",
            TransactionStatus::Committed => "COMMITTED",
            TransactionStatus::Completed => "COMPLETED",
            TransactionStatus::RollingBack => "ROLLING_BACK",
            TransactionStatus::RolledBack => "ROLLED_BACK",
            TransactionStatus::RollbackFailed => "ROLLBACK_FAILED",
            TransactionStatus::FailedValidation => "FAILED_VALIDATION",
            TransactionStatus::FailedBadRequest => "FAILED_BAD_REQUEST",
            TransactionStatus::FailedConsistency => "FAILED_CONSISTENCY",
            TransactionStatus::FailedNoData => "FAILED_NO_DATA",
            TransactionStatus::FailedTransient => "FAILED_TRANSIENT",
            TransactionStatus::FailedOther => "FAILED_OTHER",
            TransactionStatus::FailedPreFetch => "FAILED_PRE_FETCH",
            TransactionStatus::FailedApply => "FAILED_APPLY",
            TransactionStatus::FailedPostFetch => "FAILED_POST_FETCH",
            TransactionStatus::FailedStoppedRetryable => "FAILED_STOPPED_RETRYABLE",
            TransactionStatus::FailedStoppedFinal => "FAILED_STOPPED_FINAL",
        }
    }

    /// Returns true while the device (or transaction) is still being worked on.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            TransactionStatus::Running
                | TransactionStatus::ConfigStaged
                | TransactionStatus::CommitPending
                | TransactionStatus::Committed
                | TransactionStatus::RollingBack
        )
    }

    /// Returns true once no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        !self.is_in_progress()
    }

    /// Returns true for every terminal status other than `COMPLETED`.
    pub fn is_failure(&self) -> bool {
        self.is_terminal() && *self != TransactionStatus::Completed
    }

    /// Ordering used for "no better than" comparisons.
    ///
    /// In-progress statuses rank lowest, then `COMPLETED`, then a clean
    /// rollback, then the failure family, with a failed rollback worst of all
    /// since it may leave the device in an unknown state.
    pub fn severity(&self) -> u8 {
        match self {
            s if s.is_in_progress() => 0,
            TransactionStatus::Completed => 1,
            TransactionStatus::RolledBack => 2,
            TransactionStatus::RollbackFailed => 4,
            _ => 3,
        }
    }

    /// Returns the worse of two statuses. Ties keep `self`.
    pub fn worst(self, other: TransactionStatus) -> TransactionStatus {
        if other.severity() > self.severity() {
            other
        } else {
            self
        }
    }

    /// Returns true if a row currently holding `self` may be moved to `next`.
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        self.is_in_progress() || *self == next
    }

    /// Stable error code reported to the orchestrator for non-completed
    /// terminal statuses.
    pub fn error_code(&self) -> Option<&'static str> {
        let code = match self {
            TransactionStatus::RolledBack => "EMCP-2001",
            TransactionStatus::RollbackFailed => "EMCP-2002",
            TransactionStatus::FailedValidation => "EMCP-3001",
            TransactionStatus::FailedBadRequest => "EMCP-3002",
            TransactionStatus::FailedConsistency => "EMCP-3003",
            TransactionStatus::FailedNoData => "EMCP-3004",
            TransactionStatus::FailedTransient => "EMCP-4001",
            TransactionStatus::FailedOther => "EMCP-4002",
            TransactionStatus::FailedPreFetch => "EMCP-4003",
            TransactionStatus::FailedApply => "EMCP-4004",
            TransactionStatus::FailedPostFetch => "EMCP-4005",
            TransactionStatus::FailedStoppedRetryable => "EMCP-5001",
            TransactionStatus::FailedStoppedFinal => "EMCP-5002",
            _ => return None,
        };
        Some(code)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = EmcpError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| EmcpError::invalid_request(format!("unknown status '{}'", s)))
    }
}
