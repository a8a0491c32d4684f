//! The contract shared by the NETCONF and CLI drivers.

use std::fmt;

use async_trait::async_trait;
use regex::Regex;

use crate::error::DriverResult;

/// Operations a protocol driver understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestType {
    /// Read the running configuration; the payload is an optional filter
    GetConfig,
    /// Stage configuration (NETCONF XML or CLI lines)
    EditConfig,
    /// Stage removal of configuration
    Remove,
    /// Drop staged, uncommitted changes
    DiscardChanges,
    /// Ask the device to check staged changes
    Validate,
    Lock,
    Unlock,
    /// Commit that reverts unless confirmed; payload is the window in seconds
    ConfirmedCommit,
    /// Plain commit, or the confirming commit when one is pending
    Commit,
    /// Revert a pending confirmed commit
    CancelCommit,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::GetConfig => "get-config",
            RequestType::EditConfig => "edit-config",
            RequestType::Remove => "remove",
            RequestType::DiscardChanges => "discard-changes",
            RequestType::Validate => "validate",
            RequestType::Lock => "lock",
            RequestType::Unlock => "unlock",
            RequestType::ConfirmedCommit => "confirmed-commit",
            RequestType::Commit => "commit",
            RequestType::CancelCommit => "cancel-commit",
        }
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Successful answer to a [`ProtocolDriver::send`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    /// NETCONF `<ok/>`
    Ok,
    /// NETCONF `<data>` contents
    Data(String),
    /// CLI output with echo and prompt stripped
    Output(String),
}

impl Reply {
    /// The textual body, empty for [`Reply::Ok`].
    pub fn text(&self) -> &str {
        match self {
            Reply::Ok => "",
            Reply::Data(text) | Reply::Output(text) => text,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            Reply::Ok => String::new(),
            Reply::Data(text) | Reply::Output(text) => text,
        }
    }
}

/// One step of a scripted exchange: what to send and what to wait for.
///
/// `expect` of `None` means the session's current prompt.
#[derive(Debug, Clone)]
pub struct DriverCommand {
    pub payload: String,
    pub expect: Option<Regex>,
}

impl DriverCommand {
    pub fn new(payload: impl Into<String>) -> Self {
        Self {
            payload: payload.into(),
            expect: None,
        }
    }

    pub fn expecting(payload: impl Into<String>, expect: Regex) -> Self {
        Self {
            payload: payload.into(),
            expect: Some(expect),
        }
    }
}

/// A connected management session speaking one protocol.
#[async_trait]
pub trait ProtocolDriver: Send {
    /// Opens the transport (with the connect retry budget) and completes the
    /// protocol handshake.
    async fn connect(&mut self) -> DriverResult<()>;

    async fn send(&mut self, request: RequestType, payload: &str) -> DriverResult<Reply>;

    /// Ends the session. Safe to call more than once.
    async fn disconnect(&mut self) -> DriverResult<()>;

    fn is_connected(&self) -> bool;
}
