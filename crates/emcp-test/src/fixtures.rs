//! Request payloads and context helpers.

use std::sync::Arc;

use serde_json::{json, Value};

use emcp_common::{ChangeRequest, OrderType};
use emcp_provisiond::{AppContext, DriverFactory};
use emcp_store::TransactionStore;

/// Builds raw-service change request payloads.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    force: bool,
    devices: Vec<Value>,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a device whose section carries `text`.
    pub fn device(self, name: &str, text: &str) -> Self {
        self.device_section(name, json!({ "text": text }))
    }

    /// Adds a device with pre- and post-change fetches enabled.
    pub fn verified_device(self, name: &str, text: &str) -> Self {
        self.device_section(
            name,
            json!({ "text": text, "pre_fetch": true, "post_fetch": true }),
        )
    }

    /// Adds a device with an arbitrary section.
    pub fn device_section(mut self, name: &str, section: Value) -> Self {
        self.devices.push(json!({ "name": name, "config": section }));
        self
    }

    /// Adds a device with no section (reads).
    pub fn bare_device(mut self, name: &str) -> Self {
        self.devices.push(json!({ "name": name }));
        self
    }

    pub fn force(mut self) -> Self {
        self.force = true;
        self
    }

    pub fn build(&self) -> String {
        json!({ "force": self.force, "devices": self.devices }).to_string()
    }

    pub fn request(&self, transaction_id: &str, order_type: OrderType) -> ChangeRequest {
        ChangeRequest::new("raw", transaction_id, order_type, self.build())
    }
}

/// Context over `store` and `drivers` with the built-in adapters.
pub fn context(
    store: Arc<dyn TransactionStore>,
    drivers: Arc<dyn DriverFactory>,
    queue_depth: usize,
) -> Arc<AppContext> {
    Arc::new(AppContext::new(store, drivers).with_queue_depth(queue_depth))
}

/// Device names `prefix-01` through `prefix-NN`.
pub fn device_names(prefix: &str, count: usize) -> Vec<String> {
    (1..=count).map(|i| format!("{}-{:02}", prefix, i)).collect()
}
