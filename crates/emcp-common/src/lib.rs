//! Common types for the element-management control plane.
//!
//! This crate holds everything the store, driver and provisioning crates
//! agree on:
//!
//! - [`status`]: per-device and aggregate transaction statuses
//! - [`request`]: change requests and their per-device slices
//! - [`config`]: the TOML configuration loaded by `provisiond`
//! - [`audit`]: structured audit records emitted on the `audit` target
//! - [`error`]: error types shared by request parsing and configuration
//!
//! # Example
//!
//! ```
//! use emcp_common::{ChangeRequest, OrderType};
//!
//! let payload = r#"{"devices": [{"name": "leaf-01", "config": {"text": "vlan 10"}}]}"#;
//! let request = ChangeRequest::new("raw", "tx-1", OrderType::Create, payload);
//! let split = request.split("config").unwrap();
//! assert_eq!(split.sub_requests[0].device, "leaf-01");
//! ```

pub mod audit;
pub mod config;
pub mod error;
pub mod request;
pub mod status;

pub use config::{
    CliSettings, DeviceEntry, DispatcherConfig, EmcpConfig, NetconfSettings, Protocol,
    StoreBackend, StoreConfig, TimerConfig,
};
pub use error::{EmcpError, EmcpResult};
pub use request::{ChangeRequest, DeviceSubRequest, RequestFlags, SplitRequest};
pub use status::{OrderType, TransactionStatus};
