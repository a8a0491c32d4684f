//! JSON-lines inbound adapter.
//!
//! Each input line is one command:
//!
//! ```json
//! {"kind": "submit", "service_type": "raw", "transaction_id": "tx-1", "order_type": "create", "payload": {"devices": []}}
//! {"kind": "notify", "service_type": "raw", "transaction_id": "tx-1", "order_type": "create", "payload": {}}
//! ```
//!
//! and gets one [`InboundReply`] line back.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use emcp_common::OrderType;

use crate::dispatcher::Dispatchers;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum InboundCommand {
    Submit {
        service_type: String,
        transaction_id: String,
        order_type: OrderType,
        payload: Value,
    },
    Notify {
        service_type: String,
        transaction_id: String,
        order_type: OrderType,
        #[serde(default)]
        payload: Value,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InboundReply {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signalled: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InboundReply {
    fn rejected(error: impl Into<String>) -> Self {
        Self {
            accepted: false,
            transaction_id: None,
            signalled: None,
            error: Some(error.into()),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"accepted":false}"#.to_string())
    }
}

/// A payload given as a JSON string is passed through verbatim.
fn payload_text(payload: &Value) -> String {
    match payload {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub fn handle_line(dispatchers: &Dispatchers, line: &str) -> InboundReply {
    let command: InboundCommand = match serde_json::from_str(line) {
        Ok(command) => command,
        Err(e) => return InboundReply::rejected(format!("malformed command: {}", e)),
    };

    match command {
        InboundCommand::Submit {
            service_type,
            transaction_id,
            order_type,
            payload,
        } => {
            let accepted = dispatchers.submit(
                &service_type,
                &transaction_id,
                order_type,
                &payload_text(&payload),
            );
            InboundReply {
                accepted,
                transaction_id: Some(transaction_id),
                signalled: None,
                error: None,
            }
        }
        InboundCommand::Notify {
            service_type,
            transaction_id,
            order_type,
            payload,
        } => {
            let signalled =
                dispatchers.notify(&service_type, &transaction_id, order_type, &payload_text(&payload));
            InboundReply {
                accepted: signalled.is_some(),
                transaction_id: Some(transaction_id),
                signalled,
                error: None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_commands() {
        let submit: InboundCommand = serde_json::from_str(
            r#"{"kind":"submit","service_type":"raw","transaction_id":"tx-1","order_type":"delete","payload":{"force":true,"devices":[]}}"#,
        )
        .unwrap();
        assert!(matches!(
            submit,
            InboundCommand::Submit { order_type: OrderType::Delete, ref payload, .. } if payload["force"] == true
        ));

        let notify: InboundCommand = serde_json::from_str(
            r#"{"kind":"notify","service_type":"raw","transaction_id":"tx-1","order_type":"create"}"#,
        )
        .unwrap();
        assert!(matches!(notify, InboundCommand::Notify { payload: Value::Null, .. }));
    }

    #[test]
    fn test_payload_text() {
        assert_eq!(payload_text(&Value::String("{\"devices\":[]}".into())), "{\"devices\":[]}");
        assert_eq!(payload_text(&serde_json::json!({"devices": []})), "{\"devices\":[]}");
    }

    #[test]
    fn test_malformed_line_is_rejected() {
        let dispatchers = Dispatchers::default();
        let reply = handle_line(&dispatchers, "{\"kind\":\"reboot\"}");
        assert!(!reply.accepted);
        assert!(reply.error.unwrap().starts_with("malformed command"));
    }

    #[test]
    fn test_unknown_service_is_not_accepted() {
        let dispatchers = Dispatchers::default();
        let reply = handle_line(
            &dispatchers,
            r#"{"kind":"submit","service_type":"raw","transaction_id":"tx-1","order_type":"create","payload":{}}"#,
        );
        assert_eq!(reply.to_json(), r#"{"accepted":false,"transaction_id":"tx-1"}"#);
    }
}
