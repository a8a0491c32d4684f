//! NETCONF message builders and reply parsing.
//!
//! Replies are matched with regular expressions rather than a full XML
//! parser. Namespace prefixes on the NETCONF base elements are tolerated.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{DriverError, DriverResult};

pub const BASE_NS: &str = "urn:ietf:params:xml:ns:netconf:base:1.0";
pub const CAP_BASE_10: &str = "urn:ietf:params:netconf:base:1.0";
pub const CAP_BASE_11: &str = "urn:ietf:params:netconf:base:1.1";
pub const CAP_CANDIDATE: &str = "urn:ietf:params:netconf:capability:candidate:1.0";
pub const CAP_CONFIRMED_COMMIT: &str = "urn:ietf:params:netconf:capability:confirmed-commit:1.1";
pub const CAP_VALIDATE: &str = "urn:ietf:params:netconf:capability:validate:1.1";

/// `rpc-error` tags whose application-layer occurrence means the device
/// rejected the configuration content.
const VALIDATION_TAGS: &[&str] = &[
    "invalid-value",
    "bad-element",
    "unknown-element",
    "missing-element",
    "operation-failed",
];

static CAPABILITY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?capability>\s*(.*?)\s*</(?:\w+:)?capability>")
        .expect("Invalid regex pattern")
});

static SESSION_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<(?:\w+:)?session-id>\s*(\d+)\s*</(?:\w+:)?session-id>")
        .expect("Invalid regex pattern")
});

static RPC_REPLY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?rpc-reply\b([^>]*)>").expect("Invalid regex pattern"));

static MESSAGE_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"message-id\s*=\s*["']([^"']+)["']"#).expect("Invalid regex pattern"));

static RPC_ERROR: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?rpc-error>(.*?)</(?:\w+:)?rpc-error>").expect("Invalid regex pattern")
});

static OK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?ok\s*/>").expect("Invalid regex pattern"));

static DATA: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)<(?:\w+:)?data(?:\s[^>]*)?>(.*)</(?:\w+:)?data>").expect("Invalid regex pattern")
});

static EMPTY_DATA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<(?:\w+:)?data(?:\s[^>]*)?/>").expect("Invalid regex pattern"));

static FIRST_ELEMENT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"<([A-Za-z_][\w.:-]*)").expect("Invalid regex pattern"));

fn element_text(body: &str, name: &str) -> Option<String> {
    let pattern = format!(
        r"(?s)<(?:\w+:)?{name}(?:\s[^>]*)?>(.*?)</(?:\w+:)?{name}>",
        name = regex::escape(name)
    );
    Regex::new(&pattern)
        .ok()?
        .captures(body)
        .map(|c| c[1].trim().to_string())
}

/// Builds the client `<hello>` advertising `capabilities`.
pub fn hello(capabilities: &[&str]) -> String {
    let caps: String = capabilities
        .iter()
        .map(|cap| format!("<capability>{}</capability>", cap))
        .collect();
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><hello xmlns="{}"><capabilities>{}</capabilities></hello>"#,
        BASE_NS, caps
    )
}

/// Server `<hello>` contents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerHello {
    pub capabilities: Vec<String>,
    pub session_id: Option<u32>,
}

impl ServerHello {
    /// True if `capability` (optionally with `?` parameters) is advertised.
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities
            .iter()
            .any(|c| c == capability || c.split('?').next() == Some(capability))
    }
}

pub fn parse_hello(message: &str) -> DriverResult<ServerHello> {
    if !message.contains("hello") {
        return Err(DriverError::protocol("expected <hello> from server"));
    }
    let capabilities: Vec<String> = CAPABILITY
        .captures_iter(message)
        .map(|c| c[1].to_string())
        .collect();
    if capabilities.is_empty() {
        return Err(DriverError::protocol("server hello advertises no capabilities"));
    }
    let session_id = SESSION_ID
        .captures(message)
        .and_then(|c| c[1].parse().ok());
    Ok(ServerHello {
        capabilities,
        session_id,
    })
}

/// Wraps an operation into an `<rpc>` with the given message id.
pub fn rpc(message_id: u64, operation: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><rpc xmlns="{}" message-id="{}">{}</rpc>"#,
        BASE_NS, message_id, operation
    )
}

pub fn get_config(source: &str, filter: &str) -> String {
    if filter.trim().is_empty() {
        format!("<get-config><source><{}/></source></get-config>", source)
    } else {
        format!(
            r#"<get-config><source><{}/></source><filter type="subtree">{}</filter></get-config>"#,
            source, filter
        )
    }
}

pub fn edit_config(target: &str, config: &str) -> String {
    format!(
        r#"<edit-config><target><{}/></target><config xmlns:nc="{}">{}</config></edit-config>"#,
        target, BASE_NS, config
    )
}

/// Marks the outermost element of `config` with `nc:operation="delete"`.
///
/// The payload names exactly the subtree to remove.
pub fn mark_delete(config: &str) -> DriverResult<String> {
    let m = FIRST_ELEMENT
        .captures(config)
        .and_then(|c| c.get(1))
        .ok_or_else(|| DriverError::validation("removal payload contains no element"))?;
    let mut marked = String::with_capacity(config.len() + 32);
    marked.push_str(&config[..m.end()]);
    marked.push_str(r#" nc:operation="delete""#);
    marked.push_str(&config[m.end()..]);
    Ok(marked)
}

pub fn lock(target: &str) -> String {
    format!("<lock><target><{}/></target></lock>", target)
}

pub fn unlock(target: &str) -> String {
    format!("<unlock><target><{}/></target></unlock>", target)
}

pub fn discard_changes() -> String {
    "<discard-changes/>".to_string()
}

pub fn validate(source: &str) -> String {
    format!("<validate><source><{}/></source></validate>", source)
}

pub fn commit() -> String {
    "<commit/>".to_string()
}

pub fn confirmed_commit(timeout_secs: u64) -> String {
    format!(
        "<commit><confirmed/><confirm-timeout>{}</confirm-timeout></commit>",
        timeout_secs
    )
}

pub fn cancel_commit() -> String {
    "<cancel-commit/>".to_string()
}

pub fn close_session() -> String {
    "<close-session/>".to_string()
}

/// One `<rpc-error>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcError {
    pub error_type: String,
    pub tag: String,
    pub severity: String,
    pub message: String,
}

impl RpcError {
    fn parse(body: &str) -> Self {
        Self {
            error_type: element_text(body, "error-type").unwrap_or_default(),
            tag: element_text(body, "error-tag").unwrap_or_default(),
            severity: element_text(body, "error-severity").unwrap_or_else(|| "error".to_string()),
            message: element_text(body, "error-message").unwrap_or_default(),
        }
    }

    pub fn is_warning(&self) -> bool {
        self.severity == "warning"
    }

    fn is_validation(&self, request: &str) -> bool {
        request == "validate"
            || (self.error_type == "application" && VALIDATION_TAGS.contains(&self.tag.as_str()))
    }

    fn into_driver_error(self, request: &str) -> DriverError {
        let message = if self.message.is_empty() {
            self.tag.clone()
        } else {
            self.message.clone()
        };
        if self.is_validation(request) {
            DriverError::validation(format!("{}: {}", self.tag, message))
        } else {
            DriverError::Device {
                tag: self.tag,
                message,
            }
        }
    }
}

/// Parsed `<rpc-reply>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RpcReply {
    pub message_id: Option<String>,
    pub ok: bool,
    pub data: Option<String>,
    pub errors: Vec<RpcError>,
}

impl RpcReply {
    /// Returns the first error-severity `rpc-error` as a [`DriverError`],
    /// classified for the request that produced it.
    pub fn into_result(self, request: &str) -> DriverResult<RpcReply> {
        if let Some(pos) = self.errors.iter().position(|e| !e.is_warning()) {
            let mut errors = self.errors;
            return Err(errors.swap_remove(pos).into_driver_error(request));
        }
        Ok(self)
    }
}

/// Parses a message into an [`RpcReply`]. Returns `Ok(None)` for messages
/// that are not replies (notifications).
pub fn parse_reply(message: &str) -> DriverResult<Option<RpcReply>> {
    let Some(open) = RPC_REPLY.captures(message) else {
        if message.contains("<notification") {
            return Ok(None);
        }
        return Err(DriverError::protocol(format!(
            "unexpected message: {}",
            message.chars().take(120).collect::<String>()
        )));
    };

    let message_id = MESSAGE_ID.captures(&open[1]).map(|c| c[1].to_string());
    let errors = RPC_ERROR
        .captures_iter(message)
        .map(|c| RpcError::parse(&c[1]))
        .collect();
    let data = match DATA.captures(message) {
        Some(c) => Some(c[1].trim().to_string()),
        None if EMPTY_DATA.is_match(message) => Some(String::new()),
        None => None,
    };

    Ok(Some(RpcReply {
        message_id,
        ok: OK.is_match(message),
        data,
        errors,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_hello() {
        let message = r#"<hello xmlns="urn:ietf:params:xml:ns:netconf:base:1.0">
  <capabilities>
    <capability>urn:ietf:params:netconf:base:1.0</capability>
    <capability>urn:ietf:params:netconf:base:1.1</capability>
    <capability>urn:ietf:params:netconf:capability:candidate:1.0</capability>
    <capability>urn:ietf:params:netconf:capability:confirmed-commit:1.1</capability>
    <capability>http://example.com/vlan?module=vlan&amp;revision=2024-01-01</capability>
  </capabilities>
  <session-id>4711</session-id>
</hello>"#;
        let hello = parse_hello(message).unwrap();
        assert_eq!(hello.capabilities.len(), 5);
        assert_eq!(hello.session_id, Some(4711));
        assert!(hello.supports(CAP_CANDIDATE));
        assert!(hello.supports("http://example.com/vlan"));
        assert!(!hello.supports(CAP_VALIDATE));
    }

    #[test]
    fn test_parse_ok_reply() {
        let reply = parse_reply(r#"<rpc-reply message-id="7" xmlns="urn:ietf:params:xml:ns:netconf:base:1.0"><ok/></rpc-reply>"#)
            .unwrap()
            .unwrap();
        assert_eq!(reply.message_id.as_deref(), Some("7"));
        assert!(reply.ok);
        assert!(reply.errors.is_empty());
    }

    #[test]
    fn test_parse_data_reply_with_prefix() {
        let reply = parse_reply(
            r#"<nc:rpc-reply xmlns:nc="urn:ietf:params:xml:ns:netconf:base:1.0" message-id="3"><nc:data><vlans><vlan><id>10</id></vlan></vlans></nc:data></nc:rpc-reply>"#,
        )
        .unwrap()
        .unwrap();
        assert_eq!(reply.data.as_deref(), Some("<vlans><vlan><id>10</id></vlan></vlans>"));

        let empty = parse_reply(r#"<rpc-reply message-id="4"><data/></rpc-reply>"#)
            .unwrap()
            .unwrap();
        assert_eq!(empty.data.as_deref(), Some(""));
    }

    #[test]
    fn test_rpc_error_classification() {
        let message = r#"<rpc-reply message-id="5"><rpc-error>
  <error-type>application</error-type>
  <error-tag>invalid-value</error-tag>
  <error-severity>error</error-severity>
  <error-message>MTU out of range</error-message>
</rpc-error></rpc-reply>"#;
        let err = parse_reply(message)
            .unwrap()
            .unwrap()
            .into_result("edit-config")
            .unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "Validation failed: invalid-value: MTU out of range");

        let message = r#"<rpc-reply message-id="6"><rpc-error>
  <error-type>protocol</error-type>
  <error-tag>lock-denied</error-tag>
  <error-severity>error</error-severity>
</rpc-error></rpc-reply>"#;
        let err = parse_reply(message)
            .unwrap()
            .unwrap()
            .into_result("lock")
            .unwrap_err();
        assert!(matches!(err, DriverError::Device { ref tag, .. } if tag == "lock-denied"));
    }

    #[test]
    fn test_warnings_are_not_errors() {
        let message = r#"<rpc-reply message-id="8"><rpc-error><error-type>application</error-type><error-tag>operation-failed</error-tag><error-severity>warning</error-severity></rpc-error><ok/></rpc-reply>"#;
        let reply = parse_reply(message).unwrap().unwrap().into_result("commit").unwrap();
        assert!(reply.ok);
        assert_eq!(reply.errors.len(), 1);
    }

    #[test]
    fn test_notification_skipped() {
        let message = r#"<notification xmlns="urn:ietf:params:xml:ns:netconf:notification:1.0"><eventTime>now</eventTime></notification>"#;
        assert_eq!(parse_reply(message).unwrap(), None);
        assert!(parse_reply("<garbage/>").is_err());
    }

    #[test]
    fn test_builders() {
        assert_eq!(
            confirmed_commit(120),
            "<commit><confirmed/><confirm-timeout>120</confirm-timeout></commit>"
        );
        assert!(rpc(9, &commit()).contains(r#"message-id="9""#));
        assert_eq!(
            mark_delete("<vlans><vlan><id>10</id></vlan></vlans>").unwrap(),
            r#"<vlans nc:operation="delete"><vlan><id>10</id></vlan></vlans>"#
        );
        assert!(mark_delete("   ").unwrap_err().is_validation());
    }
}
