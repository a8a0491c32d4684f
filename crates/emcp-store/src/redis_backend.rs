//! Redis store backend.
//!
//! Layout (all in the configured database):
//!
//! | Key | Type | Content |
//! |-----|------|---------|
//! | `EMCP_TXN\|<id>` | hash | aggregate record fields |
//! | `EMCP_DEVICE\|<id>\|<device>` | hash | device status row fields |
//! | `EMCP_TXN_DEVICES\|<id>` | set | device names seen in the transaction |
//! | `EMCP_SNAPSHOT\|<device>` | string | latest snapshot as JSON |
//! | `EMCP_RECORD\|<id>\|<device>` | string | device record as JSON |

use std::collections::HashMap;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tracing::{debug, info};

use emcp_common::{OrderType, StoreConfig, TransactionStatus};

use crate::error::{StoreError, StoreResult};
use crate::model::{
    ConfigSnapshot, DeviceRecord, DeviceStatusRow, TransactionRecord, WriteOp,
};
use crate::store::TransactionStore;

const TXN_TABLE: &str = "EMCP_TXN";
const DEVICE_TABLE: &str = "EMCP_DEVICE";
const TXN_DEVICES_TABLE: &str = "EMCP_TXN_DEVICES";
const SNAPSHOT_TABLE: &str = "EMCP_SNAPSHOT";
const RECORD_TABLE: &str = "EMCP_RECORD";

fn txn_key(transaction_id: &str) -> String {
    format!("{}|{}", TXN_TABLE, transaction_id)
}

fn device_key(transaction_id: &str, device: &str) -> String {
    format!("{}|{}|{}", DEVICE_TABLE, transaction_id, device)
}

fn txn_devices_key(transaction_id: &str) -> String {
    format!("{}|{}", TXN_DEVICES_TABLE, transaction_id)
}

fn snapshot_key(device: &str) -> String {
    format!("{}|{}", SNAPSHOT_TABLE, device)
}

fn record_key(transaction_id: &str, device: &str) -> String {
    format!("{}|{}|{}", RECORD_TABLE, transaction_id, device)
}

fn field<'a>(key: &str, fields: &'a HashMap<String, String>, name: &str) -> StoreResult<&'a str> {
    fields
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| StoreError::corrupt(key, format!("missing field '{}'", name)))
}

fn parse_field<T: FromStr>(
    key: &str,
    fields: &HashMap<String, String>,
    name: &str,
) -> StoreResult<T>
where
    T::Err: std::fmt::Display,
{
    let raw = field(key, fields, name)?;
    raw.parse::<T>()
        .map_err(|e| StoreError::corrupt(key, format!("field '{}': {}", name, e)))
}

fn parse_time(key: &str, fields: &HashMap<String, String>, name: &str) -> StoreResult<DateTime<Utc>> {
    let raw = field(key, fields, name)?;
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::corrupt(key, format!("field '{}': {}", name, e)))
}

pub(crate) fn parse_transaction(
    key: &str,
    transaction_id: &str,
    fields: &HashMap<String, String>,
) -> StoreResult<TransactionRecord> {
    Ok(TransactionRecord {
        transaction_id: transaction_id.to_string(),
        service_type: field(key, fields, "service_type")?.to_string(),
        order_type: parse_field(key, fields, "order_type")?,
        status: parse_field(key, fields, "status")?,
        original_text: fields.get("original_text").cloned().unwrap_or_default(),
        created_at: parse_time(key, fields, "created_at")?,
        updated_at: parse_time(key, fields, "updated_at")?,
    })
}

pub(crate) fn parse_device_row(
    key: &str,
    transaction_id: &str,
    device: &str,
    fields: &HashMap<String, String>,
) -> StoreResult<DeviceStatusRow> {
    Ok(DeviceStatusRow {
        transaction_id: transaction_id.to_string(),
        device: device.to_string(),
        order_type: parse_field(key, fields, "order_type")?,
        status: parse_field(key, fields, "status")?,
        updated_at: parse_time(key, fields, "updated_at")?,
    })
}

/// [`TransactionStore`] on Redis hashes.
///
/// Updates check row existence before writing; the check and the write are
/// two commands, which is enough because a row is only ever updated by the
/// workflow that inserted it.
#[derive(Clone)]
pub struct RedisStore {
    connection: ConnectionManager,
}

impl RedisStore {
    /// Connects to the Redis instance named by the store configuration.
    pub async fn connect(config: &StoreConfig) -> StoreResult<Self> {
        let uri = config.redis_uri();
        let client = redis::Client::open(uri.clone())
            .map_err(|e| StoreError::backend("connect", format!("{}: {}", uri, e)))?;
        let connection = client
            .get_connection_manager()
            .await
            .map_err(|e| StoreError::backend("connect", e.to_string()))?;

        info!(
            host = %config.redis_host,
            port = config.redis_port,
            db = config.redis_db,
            "Connected to Redis transaction store"
        );
        Ok(Self { connection })
    }

    async fn require_exists(&self, key: &str, kind: &'static str) -> StoreResult<()> {
        let mut conn = self.connection.clone();
        let exists: bool = conn.exists(key).await?;
        if exists {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                kind,
                key: key.to_string(),
            })
        }
    }
}

#[async_trait]
impl TransactionStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn read_transaction(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Option<TransactionRecord>> {
        let key = txn_key(transaction_id);
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_transaction(&key, transaction_id, &fields).map(Some)
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
        let key = txn_key(transaction_id);
        let now = Utc::now().to_rfc3339();
        let mut conn = self.connection.clone();

        match op {
            WriteOp::Insert => {
                let fields = [
                    ("service_type", service_type.to_string()),
                    ("order_type", order_type.as_str().to_string()),
                    ("status", status.as_str().to_string()),
                    ("original_text", original_text.to_string()),
                    ("created_at", now.clone()),
                    ("updated_at", now),
                ];
                let _: () = conn.del(&key).await?;
                let _: () = conn.hset_multiple(&key, &fields).await?;
            }
            WriteOp::Update => {
                self.require_exists(&key, "transaction").await?;
                let fields = [
                    ("status", status.as_str().to_string()),
                    ("updated_at", now),
                ];
                let _: () = conn.hset_multiple(&key, &fields).await?;
            }
        }
        debug!(transaction_id, status = %status, ?op, "HSET {}", key);
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
        let now = Utc::now().to_rfc3339();
        let mut conn = self.connection.clone();

        match op {
            WriteOp::Insert => {
                let fields = [
                    ("order_type", order_type.as_str().to_string()),
                    ("status", status.as_str().to_string()),
                    ("updated_at", now),
                ];
                let _: () = conn.hset_multiple(&key, &fields).await?;
                let _: () = conn.sadd(txn_devices_key(transaction_id), device).await?;
            }
            WriteOp::Update => {
                self.require_exists(&key, "device status").await?;
                let fields = [("status", status.as_str().to_string()), ("updated_at", now)];
                let _: () = conn.hset_multiple(&key, &fields).await?;
            }
        }
        debug!(transaction_id, device, status = %status, ?op, "HSET {}", key);
        Ok(())
    }

    async fn read_device_status(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceStatusRow>> {
        let key = device_key(transaction_id, device);
        let mut conn = self.connection.clone();
        let fields: HashMap<String, String> = conn.hgetall(&key).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        parse_device_row(&key, transaction_id, device, &fields).map(Some)
    }

    async fn list_device_statuses(
        &self,
        transaction_id: &str,
    ) -> StoreResult<Vec<DeviceStatusRow>> {
        let mut conn = self.connection.clone();
        let mut devices: Vec<String> = conn.smembers(txn_devices_key(transaction_id)).await?;
        devices.sort();

        let mut rows = Vec::with_capacity(devices.len());
        for device in devices {
            if let Some(row) = self.read_device_status(transaction_id, &device).await? {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    async fn save_snapshot(&self, snapshot: &ConfigSnapshot) -> StoreResult<()> {
        let json = serde_json::to_string(snapshot)?;
        let mut conn = self.connection.clone();
        let _: () = conn.set(snapshot_key(&snapshot.device), json).await?;
        Ok(())
    }

    async fn latest_snapshot(&self, device: &str) -> StoreResult<Option<ConfigSnapshot>> {
        let key = snapshot_key(device);
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::corrupt(&key, e.to_string()))
        })
        .transpose()
    }

    async fn write_device_record(&self, record: &DeviceRecord) -> StoreResult<()> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.connection.clone();
        let _: () = conn
            .set(record_key(&record.transaction_id, &record.device), json)
            .await?;
        Ok(())
    }

    async fn read_device_record(
        &self,
        transaction_id: &str,
        device: &str,
    ) -> StoreResult<Option<DeviceRecord>> {
        let key = record_key(transaction_id, device);
        let mut conn = self.connection.clone();
        let raw: Option<String> = conn.get(&key).await?;
        raw.map(|json| {
            serde_json::from_str(&json).map_err(|e| StoreError::corrupt(&key, e.to_string()))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        assert_eq!(txn_key("tx-1"), "EMCP_TXN|tx-1");
        assert_eq!(device_key("tx-1", "leaf-01"), "EMCP_DEVICE|tx-1|leaf-01");
        assert_eq!(txn_devices_key("tx-1"), "EMCP_TXN_DEVICES|tx-1");
        assert_eq!(snapshot_key("leaf-01"), "EMCP_SNAPSHOT|leaf-01");
        assert_eq!(record_key("tx-1", "leaf-01"), "EMCP_RECORD|tx-1|leaf-01");
    }

    #[test]
    fn test_parse_transaction_fields() {
        let now = Utc::now().to_rfc3339();
        let fields: HashMap<String, String> = [
            ("service_type", "raw"),
            ("order_type", "modify"),
            ("status", "COMMIT_PENDING"),
            ("original_text", "{}"),
            ("created_at", now.as_str()),
            ("updated_at", now.as_str()),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let record = parse_transaction("EMCP_TXN|tx-1", "tx-1", &fields).unwrap();
        assert_eq!(record.order_type, OrderType::Modify);
        assert_eq!(record.status, TransactionStatus::CommitPending);
    }

    #[test]
    fn test_parse_device_row_rejects_bad_status() {
        let fields: HashMap<String, String> = [
            ("order_type", "create"),
            ("status", "SOMETHING"),
            ("updated_at", "2026-01-01T00:00:00Z"),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();

        let err = parse_device_row("k", "tx-1", "leaf-01", &fields).unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}
