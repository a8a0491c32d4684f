//! Store wrapper that fails chosen writes.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use emcp_common::{OrderType, TransactionStatus};
use emcp_store::{
    ConfigSnapshot, DeviceRecord, DeviceStatusRow, MemoryStore, StoreError, StoreResult,
    TransactionRecord, TransactionStore, WriteOp,
};

/// [`MemoryStore`] that can be told to fail device status writes.
#[derive(Default)]
pub struct FailingStore {
    inner: MemoryStore,
    fail_device_inserts: AtomicBool,
    fail_device_status: Mutex<Option<TransactionStatus>>,
    fail_records: AtomicBool,
    fail_transaction_reads: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    /// Fails every device row insert (workflow step 1).
    pub fn fail_device_inserts(self) -> Self {
        self.fail_device_inserts.store(true, Ordering::SeqCst);
        self
    }

    /// Fails every device status write of `status`.
    pub fn fail_device_status(self, status: TransactionStatus) -> Self {
        *self.fail_device_status.lock() = Some(status);
        self
    }

    /// Fails transaction record reads.
    pub fn fail_transaction_reads(self) -> Self {
        self.fail_transaction_reads.store(true, Ordering::SeqCst);
        self
    }

    /// Fails device record writes.
    pub fn fail_records(self) -> Self {
        self.fail_records.store(true, Ordering::SeqCst);
        self
    }
}

#[async_trait]
impl TransactionStore for FailingStore {
    fn name(&self) -> &str {
        "failing-memory"
    }

    async fn read_transaction(&self, transaction_id: &str) -> StoreResult<Option<TransactionRecord>> {
        if self.fail_transaction_reads.load(Ordering::SeqCst) {
            return Err(StoreError::backend("read_transaction", "injected failure"));
        }
        self.inner.read_transaction(transaction_id).await
    }

    async fn write_transaction_status(
        &self,
        op: WriteOp,
        transaction_id: &str,
        status: TransactionStatus,
        service_type: &str,
        order_type: OrderType,
        original_text: &str,
    ) -> StoreResult<()> {
        self.inner
            .write_transaction_status(op, transaction_id, status, service_type, order_type, original_text)
            .await
    }

    async fn write_device_status(
        &self,
        op: WriteOp,
        device: &str,
        transaction_id: &str,
        order_type: OrderType,
        status: TransactionStatus,
    ) -> StoreResult<()> {
        if op == WriteOp::Insert && self.fail_device_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::backend("hset", "Connection refused"));
        }
        if *self.fail_device_status.lock() == Some(status) {
            return Err(StoreError::backend("hset", "Connection reset by peer"));
        }
        self.inner
            .write_device_status(op, device, transaction_id, order_type, status)
            .await
    }

    async fn read_device_status(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceStatusRow>> {
        self.inner.read_device_status(transaction_id, device).await
    }

    async fn list_device_statuses(&self, transaction_id: &str) -> StoreResult<Vec<DeviceStatusRow>> {
        self.inner.list_device_statuses(transaction_id).await
    }

    async fn save_snapshot(&self, snapshot: &ConfigSnapshot) -> StoreResult<()> {
        self.inner.save_snapshot(snapshot).await
    }

    async fn latest_snapshot(&self, device: &str) -> StoreResult<Option<ConfigSnapshot>> {
        self.inner.latest_snapshot(device).await
    }

    async fn write_device_record(&self, record: &DeviceRecord) -> StoreResult<()> {
        if self.fail_records.load(Ordering::SeqCst) {
            return Err(StoreError::backend("set", "Connection refused"));
        }
        self.inner.write_device_record(record).await
    }

    async fn read_device_record(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceRecord>> {
        self.inner.read_device_record(transaction_id, device).await
    }
}
