//! The transaction store contract.

use async_trait::async_trait;

use emcp_common::{OrderType, TransactionStatus};

use crate::error::StoreResult;
use crate::model::{
    ConfigSnapshot, DeviceRecord, DeviceStatusRow, TransactionRecord, WriteOp,
};

/// Durable (transaction, device) → status table plus the aggregate
/// transaction record.
///
/// Implementations must make each individual write atomic. Nothing stronger
/// is assumed.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Returns the backend name (for logging).
    fn name(&self) -> &str;

    /// Reads the aggregate record for a transaction.
    async fn read_transaction(&self, transaction_id: &str)
        -> StoreResult<Option<TransactionRecord>>;

    /// Writes the aggregate status.
    ///
    /// With [`WriteOp::Insert`] the row is created with the given service type,
    /// order type and original text. With [`WriteOp::Update`] only the status
    /// and update time change; the row must exist.
    async fn write_transaction_status(
        &self,
        op: WriteOp,
        transaction_id: &str,
        status: TransactionStatus,
        service_type: &str,
        order_type: OrderType,
        original_text: &str,
    ) -> StoreResult<()>;

    /// Writes one device's status within a transaction.
    async fn write_device_status(
        &self,
        op: WriteOp,
        device: &str,
        transaction_id: &str,
        order_type: OrderType,
        status: TransactionStatus,
    ) -> StoreResult<()>;

    /// Reads one device's status row.
    async fn read_device_status(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceStatusRow>>;

    /// Lists every device row of a transaction, sorted by device name.
    async fn list_device_statuses(&self, transaction_id: &str)
        -> StoreResult<Vec<DeviceStatusRow>>;

    /// Persists a configuration snapshot as the device's latest.
    async fn save_snapshot(&self, snapshot: &ConfigSnapshot) -> StoreResult<()>;

    /// Returns the most recently saved snapshot for a device.
    async fn latest_snapshot(&self, device: &str) -> StoreResult<Option<ConfigSnapshot>>;

    /// Persists the final audit record of a device workflow.
    async fn write_device_record(&self, record: &DeviceRecord) -> StoreResult<()>;

    /// Reads a device workflow's audit record.
    async fn read_device_record(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceRecord>>;
}
