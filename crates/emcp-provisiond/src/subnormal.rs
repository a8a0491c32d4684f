//! Failure bookkeeping shared by every workflow of a dispatcher.
//!
//! All per-device failures go through [`SubnormalHandler::report_failure`].
//! The aggregate row only moves while it is still in progress; once it holds
//! a terminal status nothing overwrites it.

use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use emcp_common::audit::{AuditCategory, AuditRecord};
use emcp_common::{audit_log, ChangeRequest, TransactionStatus};
use emcp_store::{StoreResult, TransactionStore, WriteOp};

use crate::session::DeviceSession;

pub struct SubnormalHandler {
    store: Arc<dyn TransactionStore>,
    // Serializes read-check-write of aggregate rows within this process.
    aggregate_lock: Mutex<()>,
}

impl SubnormalHandler {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self {
            store,
            aggregate_lock: Mutex::new(()),
        }
    }

    /// Records a failed device.
    ///
    /// Disconnects the session if it is connected, then, unless the store
    /// has already failed for this workflow, writes the device status and
    /// moves the aggregate if it is still in progress. Nothing here is
    /// escalated; failures are logged.
    #[instrument(
        skip(self, request, status, reason, session),
        fields(transaction_id = %request.transaction_id, status = %status)
    )]
    pub async fn report_failure(
        &self,
        request: &ChangeRequest,
        device: &str,
        status: TransactionStatus,
        reason: &str,
        session: Option<&mut DeviceSession>,
        store_already_failed: bool,
    ) {
        warn!(device, reason, "Device workflow failed");
        audit_log!(AuditRecord::new(
            AuditCategory::ErrorCondition,
            "subnormal",
            status.as_str().to_ascii_lowercase(),
        )
        .with_transaction(&request.transaction_id)
        .with_device(device)
        .with_error(reason));

        if let Some(session) = session {
            if session.is_connected() {
                if let Err(e) = session.close().await {
                    warn!(device, error = %e, "Disconnect after failure did not complete cleanly");
                }
            }
        }

        if store_already_failed {
            debug!(device, "Store already failed, skipping status writes");
            return;
        }

        if let Err(e) = self
            .store
            .write_device_status(
                WriteOp::Update,
                device,
                &request.transaction_id,
                request.order_type,
                status,
            )
            .await
        {
            error!(device, error = %e, "Failed to record device status");
        }

        if let Err(e) = self.update_aggregate(request, status).await {
            error!(error = %e, "Failed to update transaction status");
        }
    }

    /// Moves the aggregate row to `status` if it is still in progress and
    /// returns the status the row holds afterwards.
    pub async fn update_aggregate(
        &self,
        request: &ChangeRequest,
        status: TransactionStatus,
    ) -> StoreResult<TransactionStatus> {
        let _guard = self.aggregate_lock.lock().await;

        let op = match self.store.read_transaction(&request.transaction_id).await? {
            Some(record) if record.status.is_terminal() => {
                debug!(
                    transaction_id = %request.transaction_id,
                    current = %record.status,
                    attempted = %status,
                    "Aggregate already terminal, keeping it"
                );
                return Ok(record.status);
            }
            Some(_) => WriteOp::Update,
            None => WriteOp::Insert,
        };

        self.store
            .write_transaction_status(
                op,
                &request.transaction_id,
                status,
                &request.service_type,
                request.order_type,
                &request.payload,
            )
            .await?;
        Ok(status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use emcp_common::OrderType;
    use emcp_store::MemoryStore;

    fn request() -> ChangeRequest {
        ChangeRequest::new("raw", "tx-9", OrderType::Create, r#"{"devices":[]}"#)
    }

    async fn seeded() -> (Arc<MemoryStore>, SubnormalHandler) {
        let store = Arc::new(MemoryStore::new());
        let req = request();
        store
            .write_transaction_status(
                WriteOp::Insert,
                &req.transaction_id,
                TransactionStatus::Running,
                "raw",
                OrderType::Create,
                &req.payload,
            )
            .await
            .unwrap();
        store
            .write_device_status(WriteOp::Insert, "leaf-01", "tx-9", OrderType::Create, TransactionStatus::Running)
            .await
            .unwrap();
        let handler = SubnormalHandler::new(store.clone());
        (store, handler)
    }

    #[tokio::test]
    async fn test_first_failure_sets_aggregate_and_sticks() {
        let (store, handler) = seeded().await;
        let req = request();

        handler
            .report_failure(&req, "leaf-01", TransactionStatus::FailedApply, "commit failed", None, false)
            .await;
        let current = handler
            .update_aggregate(&req, TransactionStatus::Completed)
            .await
            .unwrap();

        assert_eq!(current, TransactionStatus::FailedApply);
        let record = store.read_transaction("tx-9").await.unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::FailedApply);
        let row = store.read_device_status("tx-9", "leaf-01").await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::FailedApply);
    }

    #[tokio::test]
    async fn test_store_already_failed_writes_nothing() {
        let (store, handler) = seeded().await;
        handler
            .report_failure(&request(), "leaf-01", TransactionStatus::FailedTransient, "store down", None, true)
            .await;
        let row = store.read_device_status("tx-9", "leaf-01").await.unwrap().unwrap();
        assert_eq!(row.status, TransactionStatus::Running);
        let record = store.read_transaction("tx-9").await.unwrap().unwrap();
        assert_eq!(record.status, TransactionStatus::Running);
    }

    #[tokio::test]
    async fn test_missing_aggregate_is_inserted() {
        let store = Arc::new(MemoryStore::new());
        let handler = SubnormalHandler::new(store.clone());
        let status = handler
            .update_aggregate(&request(), TransactionStatus::FailedBadRequest)
            .await
            .unwrap();
        assert_eq!(status, TransactionStatus::FailedBadRequest);
        assert_eq!(store.transaction_count(), 1);
    }
}
