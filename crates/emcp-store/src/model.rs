//! Row types held by the transaction store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use emcp_common::{OrderType, TransactionStatus};

/// Whether a status write creates the row or updates an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteOp {
    /// Create (or replace) the row
    Insert,
    /// Change the status of an existing row; fails if it is missing
    Update,
}

/// Aggregate row, one per transaction id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub transaction_id: String,
    pub service_type: String,
    pub order_type: OrderType,
    pub status: TransactionStatus,
    /// Original request text as submitted
    pub original_text: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-device status row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceStatusRow {
    pub transaction_id: String,
    pub device: String,
    pub order_type: OrderType,
    pub status: TransactionStatus,
    pub updated_at: DateTime<Utc>,
}

/// When a configuration snapshot was taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotKind {
    PreChange,
    PostChange,
}

/// Configuration fetched from a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub device: String,
    pub transaction_id: String,
    pub kind: SnapshotKind,
    pub config: String,
    pub fetched_at: DateTime<Utc>,
}

impl ConfigSnapshot {
    pub fn new(
        device: impl Into<String>,
        transaction_id: impl Into<String>,
        kind: SnapshotKind,
        config: impl Into<String>,
    ) -> Self {
        Self {
            device: device.into(),
            transaction_id: transaction_id.into(),
            kind,
            config: config.into(),
            fetched_at: Utc::now(),
        }
    }
}

/// Line-level difference between two configurations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigDiff {
    /// Lines present after the change only, in order of appearance
    pub added: Vec<String>,
    /// Lines present before the change only, in order of appearance
    pub removed: Vec<String>,
}

impl ConfigDiff {
    /// Compares two configurations line by line, ignoring indentation and
    /// blank lines.
    pub fn between(before: &str, after: &str) -> Self {
        let before_lines: Vec<&str> = significant_lines(before).collect();
        let after_lines: Vec<&str> = significant_lines(after).collect();
        let before_set: HashSet<&str> = before_lines.iter().copied().collect();
        let after_set: HashSet<&str> = after_lines.iter().copied().collect();

        Self {
            added: after_lines
                .iter()
                .filter(|line| !before_set.contains(*line))
                .map(|line| line.to_string())
                .collect(),
            removed: before_lines
                .iter()
                .filter(|line| !after_set.contains(*line))
                .map(|line| line.to_string())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

fn significant_lines(text: &str) -> impl Iterator<Item = &str> {
    text.lines().map(str::trim).filter(|line| !line.is_empty())
}

/// Final audit row written once a device workflow finishes its steps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceRecord {
    pub transaction_id: String,
    pub device: String,
    pub order_type: OrderType,
    #[serde(default)]
    pub pre_snapshot: Option<String>,
    #[serde(default)]
    pub post_snapshot: Option<String>,
    #[serde(default)]
    pub diff: ConfigDiff,
    #[serde(default)]
    pub warnings: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_diff_between() {
        let before = "interface ge-0/0/1\n  mtu 1500\n\nvlan 10\n";
        let after = "interface ge-0/0/1\n  mtu 9000\nvlan 10\nvlan 20\n";
        let diff = ConfigDiff::between(before, after);
        assert_eq!(diff.added, vec!["mtu 9000", "vlan 20"]);
        assert_eq!(diff.removed, vec!["mtu 1500"]);
        assert!(!diff.is_empty());
    }

    #[test]
    fn test_diff_ignores_whitespace() {
        let diff = ConfigDiff::between("a\n  b\n", "  a\nb\n\n");
        assert!(diff.is_empty());
    }
}
