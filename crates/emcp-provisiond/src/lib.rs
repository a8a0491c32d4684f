//! Provisioning daemon for the element-management control plane.
//!
//! A [`Dispatcher`] per service type takes change requests off a bounded
//! queue, splits each one by device and runs one [`DeviceWorkflow`] per
//! device. Failures go through the [`SubnormalHandler`], and every finished
//! request is handed to the context's [`ResponseComposer`].

pub mod adapter;
pub mod composer;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod inbound;
pub mod logging;
pub mod session;
pub mod subnormal;
pub mod wait;
pub mod workflow;

pub use adapter::{AdapterRegistry, ApplyVerb, DeviceParams, RawAdapter, ServiceAdapter};
pub use composer::{ChannelComposer, LoggingComposer, ResponseComposer, TransactionOutcome};
pub use context::{AppContext, DriverFactory, InventoryDriverFactory};
pub use dispatcher::{DispatchLoop, Dispatcher, Dispatchers};
pub use error::{WorkflowError, WorkflowResult};
pub use session::DeviceSession;
pub use subnormal::SubnormalHandler;
pub use wait::{ConfirmationHandle, WaitRegistry};
pub use workflow::{DeviceOutcome, DeviceWorkflow, StatusCell};
