//! Passthrough adapter: the device section carries the configuration text.
//!
//! ```json
//! {"name": "leaf-01", "config": {"text": ["vlan 10", "vlan 20"], "post_fetch": true}}
//! ```
//!
//! `text` is either one string or an array of lines. `verify` optionally
//! replaces the lines checked by the post-change fetch.

use serde_json::Value;

use emcp_common::{DeviceSubRequest, OrderType};

use super::{DeviceParams, ServiceAdapter};
use crate::error::{WorkflowError, WorkflowResult};

pub const RAW_SERVICE_TYPE: &str = "raw";

#[derive(Debug, Clone, Copy, Default)]
pub struct RawAdapter;

impl RawAdapter {
    fn lines(device: &str, field: &str, value: &Value) -> WorkflowResult<Vec<String>> {
        let lines = match value {
            Value::String(text) => text.lines().map(str::to_string).collect(),
            Value::Array(items) => items
                .iter()
                .map(|item| {
                    item.as_str().map(str::to_string).ok_or_else(|| {
                        WorkflowError::translation(device, format!("'{}' entries must be strings", field))
                    })
                })
                .collect::<WorkflowResult<Vec<_>>>()?,
            _ => {
                return Err(WorkflowError::translation(
                    device,
                    format!("'{}' must be a string or an array of strings", field),
                ))
            }
        };
        Ok(lines
            .into_iter()
            .map(|line| line.trim_end().to_string())
            .filter(|line| !line.trim().is_empty())
            .collect())
    }

    fn flag(device: &str, section: &serde_json::Map<String, Value>, key: &str) -> WorkflowResult<bool> {
        match section.get(key) {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(b)) => Ok(*b),
            Some(_) => Err(WorkflowError::translation(
                device,
                format!("'{}' must be a boolean", key),
            )),
        }
    }
}

impl ServiceAdapter for RawAdapter {
    fn service_type(&self) -> &str {
        RAW_SERVICE_TYPE
    }

    fn device_tag(&self) -> &str {
        "config"
    }

    fn translate(&self, sub_request: &DeviceSubRequest) -> WorkflowResult<DeviceParams> {
        let device = sub_request.device.as_str();
        let section = match &sub_request.body {
            Value::Null if sub_request.order_type == OrderType::Read => {
                return Ok(DeviceParams::default())
            }
            Value::Null => {
                return Err(WorkflowError::translation(device, "missing 'config' section"))
            }
            Value::Object(section) => section,
            _ => {
                return Err(WorkflowError::translation(
                    device,
                    "'config' section must be an object",
                ))
            }
        };

        let lines = match section.get("text") {
            Some(value) => Self::lines(device, "text", value)?,
            None => Vec::new(),
        };
        if lines.is_empty() && sub_request.order_type.is_write() {
            return Err(WorkflowError::translation(device, "no configuration text"));
        }

        let intended = match section.get("verify") {
            Some(value) => Self::lines(device, "verify", value)?,
            None => lines.clone(),
        };

        Ok(DeviceParams {
            blob: lines.join("\n"),
            intended: intended.iter().map(|l| l.trim().to_string()).collect(),
            pre_fetch: Self::flag(device, section, "pre_fetch")?,
            post_fetch: Self::flag(device, section, "post_fetch")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn sub(order_type: OrderType, body: Value) -> DeviceSubRequest {
        DeviceSubRequest {
            transaction_id: "tx-1".to_string(),
            service_type: "raw".to_string(),
            order_type,
            device: "leaf-01".to_string(),
            body,
        }
    }

    #[test]
    fn test_translate_text_array() {
        let params = RawAdapter
            .translate(&sub(
                OrderType::Create,
                json!({"text": ["vlan 10", "", "  description uplink"], "post_fetch": true}),
            ))
            .unwrap();
        assert_eq!(params.blob, "vlan 10\n  description uplink");
        assert_eq!(params.intended, vec!["vlan 10", "description uplink"]);
        assert!(params.post_fetch);
        assert!(!params.pre_fetch);
    }

    #[test]
    fn test_translate_verify_overrides_intended() {
        let params = RawAdapter
            .translate(&sub(
                OrderType::Modify,
                json!({"text": "<vlans><vlan><id>10</id></vlan></vlans>", "verify": ["<id>10</id>"]}),
            ))
            .unwrap();
        assert_eq!(params.intended, vec!["<id>10</id>"]);
    }

    #[test]
    fn test_translate_rejects_bad_sections() {
        assert!(RawAdapter.translate(&sub(OrderType::Create, Value::Null)).is_err());
        assert!(RawAdapter.translate(&sub(OrderType::Create, json!("vlan 10"))).is_err());
        assert!(RawAdapter.translate(&sub(OrderType::Create, json!({"text": [1, 2]}))).is_err());
        assert!(RawAdapter.translate(&sub(OrderType::Delete, json!({"text": ""}))).is_err());
        assert!(RawAdapter
            .translate(&sub(OrderType::Create, json!({"text": "x", "pre_fetch": "yes"})))
            .is_err());
    }

    #[test]
    fn test_read_needs_no_section() {
        let params = RawAdapter.translate(&sub(OrderType::Read, Value::Null)).unwrap();
        assert_eq!(params, DeviceParams::default());
    }
}
