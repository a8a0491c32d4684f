//! Test infrastructure for the element-management control plane
//!
//! Provides:
//! - Scriptable mock device drivers with call probes
//! - A store wrapper that fails chosen writes
//! - Change request payload builders and context helpers

pub mod fixtures;
mod mock_driver;
mod stores;

pub use fixtures::*;
pub use mock_driver::{DriverProbe, MockBehavior, MockDriver, MockDriverFactory, MockFailure};
pub use stores::FailingStore;
