//! Application context shared by dispatchers and workflows.

use std::sync::Arc;

use tracing::debug;

use emcp_common::{EmcpConfig, Protocol};
use emcp_driver::{DeviceDriver, DriverTimers, ProtocolFacade};
use emcp_store::TransactionStore;

use crate::adapter::{AdapterRegistry, ServiceAdapter};
use crate::composer::{LoggingComposer, ResponseComposer};
use crate::subnormal::SubnormalHandler;

/// Builds the device driver for a device name.
pub trait DriverFactory: Send + Sync {
    /// Returns `None` when the device is unknown.
    fn create(&self, device: &str) -> Option<Box<dyn DeviceDriver>>;
}

/// [`DriverFactory`] over the configured device inventory.
pub struct InventoryDriverFactory {
    config: Arc<EmcpConfig>,
}

impl InventoryDriverFactory {
    pub fn new(config: Arc<EmcpConfig>) -> Self {
        Self { config }
    }
}

impl DriverFactory for InventoryDriverFactory {
    fn create(&self, device: &str) -> Option<Box<dyn DeviceDriver>> {
        let entry = self.config.device(device)?;
        let timers = DriverTimers::from(self.config.timers(entry.protocol));
        let required = match entry.protocol {
            Protocol::Netconf => self.config.netconf.required_capabilities.clone(),
            Protocol::Cli => Vec::new(),
        };
        debug!(device, protocol = %entry.protocol, host = %entry.host, "Building device driver");
        Some(Box::new(ProtocolFacade::new(
            entry.clone(),
            timers,
            required,
            self.config.cli.default_dialect.clone(),
        )))
    }
}

/// Everything a dispatcher and its workflows need.
pub struct AppContext {
    pub store: Arc<dyn TransactionStore>,
    pub drivers: Arc<dyn DriverFactory>,
    pub adapters: AdapterRegistry,
    pub composer: Arc<dyn ResponseComposer>,
    pub subnormal: Arc<SubnormalHandler>,
    pub queue_depth: usize,
}

impl AppContext {
    /// Context with the built-in adapters, a logging composer and the
    /// default queue depth.
    pub fn new(store: Arc<dyn TransactionStore>, drivers: Arc<dyn DriverFactory>) -> Self {
        Self {
            subnormal: Arc::new(SubnormalHandler::new(Arc::clone(&store))),
            store,
            drivers,
            adapters: AdapterRegistry::with_builtin(),
            composer: Arc::new(LoggingComposer),
            queue_depth: emcp_common::DispatcherConfig::default().queue_depth,
        }
    }

    /// Context for a loaded configuration, driving the inventory's devices.
    pub fn from_config(config: Arc<EmcpConfig>, store: Arc<dyn TransactionStore>) -> Self {
        let queue_depth = config.dispatcher.queue_depth;
        Self::new(store, Arc::new(InventoryDriverFactory::new(config))).with_queue_depth(queue_depth)
    }

    pub fn with_adapter(mut self, adapter: Arc<dyn ServiceAdapter>) -> Self {
        self.adapters.register(adapter);
        self
    }

    pub fn with_composer(mut self, composer: Arc<dyn ResponseComposer>) -> Self {
        self.composer = composer;
        self
    }

    pub fn with_queue_depth(mut self, depth: usize) -> Self {
        self.queue_depth = depth.max(1);
        self
    }
}
