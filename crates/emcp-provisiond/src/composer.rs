//! Aggregate results and where they go.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

use emcp_common::{OrderType, TransactionStatus};

use crate::workflow::DeviceOutcome;

/// Final result of one change request.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionOutcome {
    pub transaction_id: String,
    pub service_type: String,
    pub order_type: OrderType,
    pub status: TransactionStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    /// Request-level reason, set when no device workflow ran
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Per-device outcomes sorted by device name
    pub devices: Vec<DeviceOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl TransactionOutcome {
    pub fn device(&self, name: &str) -> Option<&DeviceOutcome> {
        self.devices.iter().find(|d| d.device == name)
    }

    /// Devices that did not complete.
    pub fn failed_devices(&self) -> impl Iterator<Item = &DeviceOutcome> {
        self.devices.iter().filter(|d| d.status.is_failure())
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self)
            .unwrap_or_else(|e| format!(r#"{{"error":"serialization_failed","message":"{}"}}"#, e))
    }
}

/// Receives every finished transaction.
#[async_trait]
pub trait ResponseComposer: Send + Sync {
    async fn compose(&self, outcome: &TransactionOutcome);
}

/// Logs each outcome as JSON on the `response` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingComposer;

#[async_trait]
impl ResponseComposer for LoggingComposer {
    async fn compose(&self, outcome: &TransactionOutcome) {
        info!(
            target: "response",
            transaction_id = %outcome.transaction_id,
            status = %outcome.status,
            failed = outcome.failed_devices().count(),
            response = %outcome.to_json(),
            "Transaction finished"
        );
    }
}

/// Forwards each outcome to a channel.
#[derive(Debug, Clone)]
pub struct ChannelComposer {
    sender: mpsc::UnboundedSender<TransactionOutcome>,
}

impl ChannelComposer {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TransactionOutcome>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ResponseComposer for ChannelComposer {
    async fn compose(&self, outcome: &TransactionOutcome) {
        if self.sender.send(outcome.clone()).is_err() {
            warn!(transaction_id = %outcome.transaction_id, "Outcome receiver closed, dropping outcome");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome() -> TransactionOutcome {
        let now = Utc::now();
        TransactionOutcome {
            transaction_id: "tx-3".to_string(),
            service_type: "raw".to_string(),
            order_type: OrderType::Create,
            status: TransactionStatus::FailedApply,
            code: Some("EMCP-4004".to_string()),
            reason: None,
            devices: vec![
                DeviceOutcome::completed("a", vec![]),
                DeviceOutcome::failed("b", TransactionStatus::FailedApply, "commit rejected", vec![]),
            ],
            started_at: now,
            finished_at: now,
        }
    }

    #[test]
    fn test_json_lists_codes_for_failed_devices_only() {
        let value: serde_json::Value = serde_json::from_str(&outcome().to_json()).unwrap();
        assert_eq!(value["status"], "FAILED_APPLY");
        assert_eq!(value["order_type"], "create");
        assert!(value["devices"][0].get("code").is_none());
        assert_eq!(value["devices"][1]["code"], "EMCP-4004");
        assert_eq!(value["devices"][1]["reason"], "commit rejected");
        assert!(value.get("reason").is_none());
    }

    #[tokio::test]
    async fn test_channel_composer_forwards() {
        let (composer, mut receiver) = ChannelComposer::new();
        composer.compose(&outcome()).await;
        let received = receiver.recv().await.unwrap();
        assert_eq!(received.failed_devices().count(), 1);
        assert_eq!(received.device("a").unwrap().status, TransactionStatus::Completed);
    }
}
