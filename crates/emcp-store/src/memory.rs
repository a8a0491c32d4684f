//! Process-local store backed by concurrent maps.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tracing::trace;

use emcp_common::{OrderType, TransactionStatus};

use crate::error::{StoreError, StoreResult};
use crate::model::{
    ConfigSnapshot, DeviceRecord, DeviceStatusRow, TransactionRecord, WriteOp,
};
use crate::store::TransactionStore;

type DeviceKey = (String, String);

/// In-memory [`TransactionStore`].
///
/// Each map entry is updated under its shard lock, so single-row writes are
/// atomic with respect to each other.
#[derive(Debug, Default)]
pub struct MemoryStore {
    transactions: DashMap<String, TransactionRecord>,
    devices: DashMap<DeviceKey, DeviceStatusRow>,
    snapshots: DashMap<String, ConfigSnapshot>,
    records: DashMap<DeviceKey, DeviceRecord>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of transactions held.
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }
}

fn device_key(transaction_id: &str, device: &str) -> DeviceKey {
    (transaction_id.to_string(), device.to_string())
}

#[async_trait]
impl TransactionStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn read_transaction(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Option<TransactionRecord>> {
        Ok(self
            .transactions
            .get(transaction_id)
            .map(|entry| entry.value().clone()))
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
        let now = Utc::now();
        match op {
            WriteOp::Insert => {
                self.transactions.insert(
                    transaction_id.to_string(),
                    TransactionRecord {
                        transaction_id: transaction_id.to_string(),
                        service_type: service_type.to_string(),
                        order_type,
                        status,
                        original_text: original_text.to_string(),
                        created_at: now,
                        updated_at: now,
                    },
                );
            }
            WriteOp::Update => {
                let mut entry =
                    self.transactions
                        .get_mut(transaction_id)
                        .ok_or_else(|| StoreError::NotFound {
                            kind: "transaction",
                            key: transaction_id.to_string(),
                        })?;
                entry.status = status;
                entry.updated_at = now;
            }
        }
        trace!(transaction_id, status = %status, ?op, "transaction status written");
        Ok(())
    }

    async fn write_device_status(
        &self,
        op: WriteOp,
        device: &str,
        transaction_id: &str,
        order_type: OrderType,
        status: TransactionStatus,
    ) -> StoreResult<()> {
        let key = device_key(transaction_id, device);
        let now = Utc::now();
        match op {
            WriteOp::Insert => {
                self.devices.insert(
                    key,
                    DeviceStatusRow {
                        transaction_id: transaction_id.to_string(),
                        device: device.to_string(),
                        order_type,
                        status,
                        updated_at: now,
                    },
                );
            }
            WriteOp::Update => {
                let mut entry = self
                    .devices
                    .get_mut(&key)
                    .ok_or_else(|| StoreError::NotFound {
                        kind: "device status",
                        key: format!("{}|{}", transaction_id, device),
                    })?;
                entry.status = status;
                entry.updated_at = now;
            }
        }
        trace!(transaction_id, device, status = %status, ?op, "device status written");
        Ok(())
    }

    async fn read_device_status(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceStatusRow>> {
        Ok(self
            .devices
            .get(&device_key(transaction_id, device))
            .map(|entry| entry.value().clone()))
    }

    async fn list_device_statuses(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Vec<DeviceStatusRow>> {
        let mut rows: Vec<DeviceStatusRow> = self
            .devices
            .iter()
            .filter(|entry| entry.key().0 == transaction_id)
            .map(|entry| entry.value().clone())
            .collect();
        rows.sort_by(|a, b| a.device.cmp(&b.device));
        Ok(rows)
    }

    async fn save_snapshot(&self, snapshot: &ConfigSnapshot) -> StoreResult<()> {
        self.snapshots
            .insert(snapshot.device.clone(), snapshot.clone());
        Ok(())
    }

    async fn latest_snapshot(&self, device: &str) -> StoreResult<Option<ConfigSnapshot>> {
        Ok(self.snapshots.get(device).map(|entry| entry.value().clone()))
    }

    async fn write_device_record(&self, record: &DeviceRecord) -> StoreResult<()> {
        self.records.insert(
            device_key(&record.transaction_id, &record.device),
            record.clone(),
        );
        Ok(())
    }

    async fn read_device_record(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceRecord>> {
        Ok(self
            .records
            .get(&device_key(transaction_id, device))
            .map(|entry| entry.value().clone()))
    }
}
