//! Device Driver Facade: the protocol-independent surface the provisioning
//! workflow drives.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use emcp_common::{DeviceEntry, Protocol};

use crate::cli::{CliDriver, Dialect};
use crate::error::{DriverError, DriverResult};
use crate::netconf::NetconfDriver;
use crate::protocol::{ProtocolDriver, RequestType};
use crate::retry::DriverTimers;
use crate::transport::{SshMode, SshParams, SshTransport, Transport};

/// Result of [`DeviceDriver::connect`] after the retry budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectOutcome {
    Ok,
    /// Nothing answered, or the session broke during the handshake
    NoResponse(String),
    /// The device refused the login
    Rejected(String),
    /// The device lacks a required capability
    Inconsistent(String),
}

impl ConnectOutcome {
    pub fn from_error(err: &DriverError) -> Self {
        match err {
            DriverError::AuthRejected { .. } => ConnectOutcome::Rejected(err.to_string()),
            DriverError::MissingCapability { .. } => ConnectOutcome::Inconsistent(err.to_string()),
            _ => ConnectOutcome::NoResponse(err.to_string()),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, ConnectOutcome::Ok)
    }
}

/// Result of [`DeviceDriver::commit`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A confirmed commit is in place; it reverts after the window unless
    /// [`DeviceDriver::confirm`] is called
    AwaitingConfirmation(Duration),
}

/// Result of the atomic apply and remove operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApplyOutcome {
    Ok,
    ValidationFailed(String),
    ApplyFailed(String),
}

impl ApplyOutcome {
    fn from_error(err: &DriverError) -> Self {
        if err.is_validation() {
            ApplyOutcome::ValidationFailed(err.to_string())
        } else {
            ApplyOutcome::ApplyFailed(err.to_string())
        }
    }
}

/// Everything a workflow does to one device.
#[async_trait]
pub trait DeviceDriver: Send {
    fn device(&self) -> &str;

    /// Prepares the protocol driver. No network traffic.
    async fn start(&mut self) -> DriverResult<()>;

    async fn connect(&mut self) -> ConnectOutcome;

    async fn fetch_config(&mut self) -> DriverResult<String>;

    /// Stages `blob` without committing it.
    async fn reserve(&mut self, blob: &str) -> DriverResult<()>;

    /// Commits staged changes, confirmed when a window is configured.
    async fn commit(&mut self) -> DriverResult<CommitOutcome>;

    /// Confirms a pending confirmed commit.
    async fn confirm(&mut self) -> DriverResult<()>;

    /// Reverts a pending confirmed commit.
    async fn rollback(&mut self) -> DriverResult<()>;

    /// Reserve plus plain commit.
    async fn apply_config(&mut self, blob: &str) -> ApplyOutcome;

    /// Stages removal of `blob` and commits it.
    async fn remove_config(&mut self, blob: &str) -> ApplyOutcome;

    async fn disconnect(&mut self) -> DriverResult<()>;

    fn is_connected(&self) -> bool;
}

/// [`DeviceDriver`] backed by the NETCONF or CLI protocol driver the
/// inventory names.
pub struct ProtocolFacade {
    entry: DeviceEntry,
    timers: DriverTimers,
    required_capabilities: Vec<String>,
    default_dialect: String,
    transport: Option<Box<dyn Transport>>,
    driver: Option<Box<dyn ProtocolDriver>>,
    locked: bool,
}

impl ProtocolFacade {
    /// `required_capabilities` are the protocol-wide NETCONF requirements;
    /// the device entry may add its own.
    pub fn new(
        entry: DeviceEntry,
        timers: DriverTimers,
        required_capabilities: Vec<String>,
        default_dialect: impl Into<String>,
    ) -> Self {
        Self {
            entry,
            timers,
            required_capabilities,
            default_dialect: default_dialect.into(),
            transport: None,
            driver: None,
            locked: false,
        }
    }

    /// Uses `transport` instead of opening an SSH connection.
    pub fn with_transport(mut self, transport: Box<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    fn ssh_transport(&self, mode: SshMode) -> Box<dyn Transport> {
        Box::new(SshTransport::new(SshParams {
            host: self.entry.host.clone(),
            port: self.entry.port(),
            username: self.entry.username.clone(),
            password: self.entry.password.clone(),
            mode,
            connect_timeout: self.timers.operation_timeout,
        }))
    }

    fn driver(&mut self) -> DriverResult<&mut Box<dyn ProtocolDriver>> {
        self.driver.as_mut().ok_or(DriverError::NotConnected)
    }

    async fn send(&mut self, request: RequestType, payload: &str) -> DriverResult<String> {
        let reply = self.driver()?.send(request, payload).await?;
        Ok(reply.into_text())
    }

    /// Drops staged changes and releases the lock, logging failures.
    async fn abandon(&mut self) {
        if let Err(e) = self.send(RequestType::DiscardChanges, "").await {
            warn!(device = %self.entry.name, error = %e, "discard-changes failed");
        }
        self.release_lock().await;
    }

    async fn release_lock(&mut self) {
        if !self.locked {
            return;
        }
        self.locked = false;
        if let Err(e) = self.send(RequestType::Unlock, "").await {
            warn!(device = %self.entry.name, error = %e, "unlock failed");
        }
    }

    async fn stage(&mut self, request: RequestType, blob: &str) -> DriverResult<()> {
        let staged: DriverResult<()> = async {
            self.send(RequestType::Lock, "").await?;
            self.locked = true;
            self.send(request, blob).await?;
            self.send(RequestType::Validate, "").await?;
            Ok(())
        }
        .await;

        if let Err(e) = staged {
            debug!(device = %self.entry.name, error = %e, "Staging failed, abandoning changes");
            self.abandon().await;
            return Err(e);
        }
        Ok(())
    }

    async fn plain_commit(&mut self) -> DriverResult<()> {
        let result = self.send(RequestType::Commit, "").await;
        if result.is_err() {
            self.abandon().await;
        } else {
            self.release_lock().await;
        }
        result.map(|_| ())
    }
}

#[async_trait]
impl DeviceDriver for ProtocolFacade {
    fn device(&self) -> &str {
        &self.entry.name
    }

    async fn start(&mut self) -> DriverResult<()> {
        let driver: Box<dyn ProtocolDriver> = match self.entry.protocol {
            Protocol::Netconf => {
                let transport = match self.transport.take() {
                    Some(t) => t,
                    None => self.ssh_transport(SshMode::Subsystem("netconf".to_string())),
                };
                let mut required = self.required_capabilities.clone();
                required.extend(self.entry.required_capabilities.iter().cloned());
                Box::new(NetconfDriver::new(
                    &self.entry.name,
                    transport,
                    self.timers,
                    required,
                ))
            }
            Protocol::Cli => {
                let name = self
                    .entry
                    .dialect
                    .clone()
                    .unwrap_or_else(|| self.default_dialect.clone());
                let dialect = Dialect::by_name(&name)?;
                let transport = match self.transport.take() {
                    Some(t) => t,
                    None => self.ssh_transport(SshMode::Shell),
                };
                Box::new(CliDriver::new(&self.entry.name, transport, dialect, self.timers))
            }
        };
        debug!(device = %self.entry.name, protocol = %self.entry.protocol, "Driver started");
        self.driver = Some(driver);
        Ok(())
    }

    async fn connect(&mut self) -> ConnectOutcome {
        let driver = match self.driver() {
            Ok(driver) => driver,
            Err(e) => return ConnectOutcome::NoResponse(e.to_string()),
        };
        match driver.connect().await {
            Ok(()) => {
                info!(device = %self.entry.name, host = %self.entry.host, "Connected");
                ConnectOutcome::Ok
            }
            Err(e) => {
                warn!(device = %self.entry.name, error = %e, "Connect failed");
                ConnectOutcome::from_error(&e)
            }
        }
    }

    async fn fetch_config(&mut self) -> DriverResult<String> {
        self.send(RequestType::GetConfig, "").await
    }

    async fn reserve(&mut self, blob: &str) -> DriverResult<()> {
        self.stage(RequestType::EditConfig, blob).await
    }

    async fn commit(&mut self) -> DriverResult<CommitOutcome> {
        match self.timers.confirm_window {
            Some(window) => {
                let secs = window.as_secs().to_string();
                if let Err(e) = self.send(RequestType::ConfirmedCommit, &secs).await {
                    self.abandon().await;
                    return Err(e);
                }
                Ok(CommitOutcome::AwaitingConfirmation(window))
            }
            None => {
                self.plain_commit().await?;
                Ok(CommitOutcome::Committed)
            }
        }
    }

    async fn confirm(&mut self) -> DriverResult<()> {
        let result = self.send(RequestType::Commit, "").await.map(|_| ());
        self.release_lock().await;
        result
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        let result = self.send(RequestType::CancelCommit, "").await.map(|_| ());
        self.release_lock().await;
        result
    }

    async fn apply_config(&mut self, blob: &str) -> ApplyOutcome {
        let result = match self.stage(RequestType::EditConfig, blob).await {
            Ok(()) => self.plain_commit().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => ApplyOutcome::Ok,
            Err(e) => ApplyOutcome::from_error(&e),
        }
    }

    async fn remove_config(&mut self, blob: &str) -> ApplyOutcome {
        let result = match self.stage(RequestType::Remove, blob).await {
            Ok(()) => self.plain_commit().await,
            Err(e) => Err(e),
        };
        match result {
            Ok(()) => ApplyOutcome::Ok,
            Err(e) => ApplyOutcome::from_error(&e),
        }
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        self.locked = false;
        match self.driver.as_mut() {
            Some(driver) => driver.disconnect().await,
            None => Ok(()),
        }
    }

    fn is_connected(&self) -> bool {
        self.driver.as_ref().is_some_and(|d| d.is_connected())
    }
}
