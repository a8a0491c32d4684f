//! Change requests and per-device sub-requests.
//!
//! A [`ChangeRequest`] is immutable once received. The dispatcher splits it
//! exactly once into [`DeviceSubRequest`]s, one per device, each owned by that
//! device's workflow.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

use crate::error::{EmcpError, EmcpResult};
use crate::status::OrderType;

/// Top-level key listing the devices touched by a request.
pub const DEVICES_KEY: &str = "devices";

/// Key holding the device name inside each device entry.
pub const DEVICE_NAME_KEY: &str = "name";

/// Request-level flag: ignore device apply failures during delete.
pub const FORCE_KEY: &str = "force";

/// Flags that apply to every device of one request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestFlags {
    /// Downgrade apply failures on delete to warnings.
    pub force: bool,
}

/// One orchestrator-submitted change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRequest {
    /// Service type, which selects the dispatcher and service adapter
    pub service_type: String,
    /// Unique id of the logical change
    pub transaction_id: String,
    /// Create / modify / delete / read
    pub order_type: OrderType,
    /// Original request text, kept verbatim for the transaction record
    pub payload: String,
    /// When the request entered the control plane
    pub received_at: DateTime<Utc>,
}

/// Result of splitting a request by device.
#[derive(Debug, Clone)]
pub struct SplitRequest {
    /// Request-level flags
    pub flags: RequestFlags,
    /// One entry per device, in request order
    pub sub_requests: Vec<DeviceSubRequest>,
}

impl ChangeRequest {
    /// Creates a new change request stamped with the current time.
    pub fn new(
        service_type: impl Into<String>,
        transaction_id: impl Into<String>,
        order_type: OrderType,
        payload: impl Into<String>,
    ) -> Self {
        Self {
            service_type: service_type.into(),
            transaction_id: transaction_id.into(),
            order_type,
            payload: payload.into(),
            received_at: Utc::now(),
        }
    }

    /// Splits the request into per-device sub-requests.
    ///
    /// `device_tag` names the key inside each device entry holding the
    /// service-specific body. A missing body is not an error here; the
    /// service adapter rejects it for that device alone.
    pub fn split(&self, device_tag: &str) -> EmcpResult<SplitRequest> {
        if self.transaction_id.trim().is_empty() {
            return Err(EmcpError::invalid_request("transaction id is empty"));
        }

        let document: Value = serde_json::from_str(&self.payload)?;
        let object = document
            .as_object()
            .ok_or_else(|| EmcpError::invalid_request("payload must be a JSON object"))?;

        let flags = RequestFlags {
            force: object.get(FORCE_KEY).map(flag_value).unwrap_or(false),
        };

        let devices = object
            .get(DEVICES_KEY)
            .and_then(Value::as_array)
            .ok_or_else(|| EmcpError::invalid_request("payload has no 'devices' array"))?;

        if devices.is_empty() {
            return Err(EmcpError::invalid_request("request names no devices"));
        }

        let mut seen = HashSet::new();
        let mut sub_requests = Vec::with_capacity(devices.len());

        for (index, entry) in devices.iter().enumerate() {
            let name = entry
                .get(DEVICE_NAME_KEY)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .ok_or_else(|| {
                    EmcpError::invalid_request(format!("device entry {} has no name", index))
                })?;

            if !seen.insert(name.to_string()) {
                return Err(EmcpError::device(name, "appears twice in the request"));
            }

            sub_requests.push(DeviceSubRequest {
                transaction_id: self.transaction_id.clone(),
                service_type: self.service_type.clone(),
                order_type: self.order_type,
                device: name.to_string(),
                body: entry.get(device_tag).cloned().unwrap_or(Value::Null),
            });
        }

        Ok(SplitRequest {
            flags,
            sub_requests,
        })
    }
}

/// Accepts `true`, `"true"`, `"yes"` and `1` as a set flag.
fn flag_value(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => matches!(s.to_ascii_lowercase().as_str(), "true" | "yes" | "1"),
        Value::Number(n) => n.as_i64() == Some(1),
        _ => false,
    }
}

/// The slice of a change request that belongs to one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceSubRequest {
    pub transaction_id: String,
    pub service_type: String,
    pub order_type: OrderType,
    pub device: String,
    /// Service-specific body selected by the adapter's device tag
    pub body: Value,
}

impl DeviceSubRequest {
    /// Serializes the sub-request into a standalone document.
    pub fn to_document(&self) -> EmcpResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses a document produced by [`DeviceSubRequest::to_document`].
    pub fn from_document(document: &str) -> EmcpResult<Self> {
        Ok(serde_json::from_str(document)?)
    }

    /// Re-reads the serialized form and reports which device and order type
    /// it addresses.
    pub fn inspect(&self) -> EmcpResult<(String, OrderType)> {
        let parsed = Self::from_document(&self.to_document()?)?;
        Ok((parsed.device, parsed.order_type))
    }
}
