//! Device drivers for the provisioning service.
//!
//! Two protocol drivers sit behind [`ProtocolDriver`]: [`NetconfDriver`]
//! and the dialect-driven [`CliDriver`]. Workflows never see either one
//! directly; they drive a [`DeviceDriver`], normally a [`ProtocolFacade`]
//! built from the device's inventory entry.

pub mod channel;
pub mod cli;
pub mod error;
pub mod facade;
pub mod netconf;
pub mod protocol;
pub mod retry;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

pub use channel::{PatternBuffer, PromptChannel};
pub use cli::{CliDriver, Dialect};
pub use error::{DriverError, DriverResult};
pub use facade::{ApplyOutcome, CommitOutcome, ConnectOutcome, DeviceDriver, ProtocolFacade};
pub use netconf::NetconfDriver;
pub use protocol::{DriverCommand, ProtocolDriver, Reply, RequestType};
pub use retry::{connect_with_retry, DriverTimers};
pub use transport::{SshMode, SshParams, SshTransport, Transport};
