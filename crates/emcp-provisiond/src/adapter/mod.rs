//! Service adapters.
//!
//! An adapter owns everything service specific about a request: which key
//! of a device entry holds the device's section, how that section becomes
//! a configuration blob, and which apply verb an order type maps to.

mod raw;

use std::collections::HashMap;
use std::sync::Arc;

use emcp_common::{DeviceSubRequest, OrderType};

use crate::error::WorkflowResult;

pub use raw::{RawAdapter, RAW_SERVICE_TYPE};

/// How a workflow pushes the blob to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyVerb {
    /// Stage and commit the blob
    Apply,
    /// Stage and commit the removal of the blob
    Remove,
}

/// Device-level parameters produced by translation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceParams {
    /// Configuration blob handed to the driver
    pub blob: String,
    /// Lines the post-change fetch checks for (present or absent)
    pub intended: Vec<String>,
    /// Fetch and persist the configuration before applying
    pub pre_fetch: bool,
    /// Fetch, persist and verify the configuration after applying
    pub post_fetch: bool,
}

/// Service-specific translation of device sub-requests.
pub trait ServiceAdapter: Send + Sync {
    fn service_type(&self) -> &str;

    /// Key inside each device entry holding the device's section.
    fn device_tag(&self) -> &str;

    fn translate(&self, sub_request: &DeviceSubRequest) -> WorkflowResult<DeviceParams>;

    fn apply_verb(&self, order_type: OrderType) -> ApplyVerb {
        match order_type {
            OrderType::Delete => ApplyVerb::Remove,
            _ => ApplyVerb::Apply,
        }
    }
}

/// Adapters by service type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ServiceAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in adapters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RawAdapter));
        registry
    }

    /// Registers `adapter`, replacing any adapter for the same service type.
    pub fn register(&mut self, adapter: Arc<dyn ServiceAdapter>) {
        self.adapters
            .insert(adapter.service_type().to_string(), adapter);
    }

    pub fn get(&self, service_type: &str) -> Option<Arc<dyn ServiceAdapter>> {
        self.adapters.get(service_type).cloned()
    }

    pub fn service_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.adapters.keys().cloned().collect();
        types.sort();
        types
    }
}
