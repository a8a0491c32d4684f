//! Configuration file support for provisiond.
//!
//! Loads and validates the control plane configuration from a TOML file.
//! Default location: /etc/emcp/provisiond.toml
//!
//! ```toml
//! [store]
//! backend = "redis"
//! redis_host = "127.0.0.1"
//!
//! [dispatcher]
//! queue_depth = 10
//! service_types = ["raw"]
//!
//! [netconf]
//! connect_retries = 5
//! confirm_window_secs = 120
//!
//! [[devices]]
//! name = "leaf-01"
//! host = "192.0.2.11"
//! protocol = "netconf"
//! username = "admin"
//! password = "secret"
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::error::{EmcpError, EmcpResult};

/// Default configuration file location.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/emcp/provisiond.toml";

/// Device management protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// NETCONF over the SSH `netconf` subsystem
    Netconf,
    /// Interactive CLI over an SSH shell
    Cli,
}

impl Protocol {
    /// Returns the well-known port for the protocol.
    pub fn default_port(&self) -> u16 {
        match self {
            Protocol::Netconf => 830,
            Protocol::Cli => 22,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Netconf => f.write_str("netconf"),
            Protocol::Cli => f.write_str("cli"),
        }
    }
}

/// Transaction store backend selection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local store, lost on restart
    #[default]
    Memory,
    /// Redis hashes
    Redis,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Backend selection
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis host
    #[serde(default = "default_redis_host")]
    pub redis_host: String,

    /// Redis port
    #[serde(default = "default_redis_port")]
    pub redis_port: u16,

    /// Redis database number
    #[serde(default = "default_redis_db")]
    pub redis_db: u32,
}

/// Dispatcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Inbound queue depth per service type
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,

    /// Service types to start a dispatcher for
    #[serde(default = "default_service_types")]
    pub service_types: Vec<String>,
}

/// Protocol timers consumed by the drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerConfig {
    /// Connection attempts after the first failure
    #[serde(default = "default_connect_retries")]
    pub connect_retries: u32,

    /// Delay between connection attempts in seconds
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,

    /// Hard timeout for any single protocol operation in seconds
    #[serde(default = "default_operation_timeout")]
    pub operation_timeout_secs: u64,

    /// Confirmed-commit window in seconds; unset means plain commit
    #[serde(default)]
    pub confirm_window_secs: Option<u64>,
}

/// NETCONF driver settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NetconfSettings {
    #[serde(flatten)]
    pub timers: TimerConfig,

    /// Capability URIs every NETCONF device must advertise
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

/// CLI driver settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliSettings {
    #[serde(flatten)]
    pub timers: TimerConfig,

    /// Dialect used when a device entry names none
    #[serde(default = "default_dialect")]
    pub default_dialect: String,
}

/// One managed device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceEntry {
    /// Device name as used in change requests
    pub name: String,

    /// Management address
    pub host: String,

    /// Management port, defaults to the protocol's well-known port
    #[serde(default)]
    pub port: Option<u16>,

    /// Management protocol
    pub protocol: Protocol,

    /// CLI dialect (CLI devices only)
    #[serde(default)]
    pub dialect: Option<String>,

    /// Login user
    pub username: String,

    /// Login password
    #[serde(default)]
    pub password: String,

    /// Extra capabilities this device must advertise (NETCONF only)
    #[serde(default)]
    pub required_capabilities: Vec<String>,
}

impl DeviceEntry {
    /// Returns the configured port or the protocol default.
    pub fn port(&self) -> u16 {
        self.port.unwrap_or_else(|| self.protocol.default_port())
    }
}

/// Complete provisiond configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmcpConfig {
    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub dispatcher: DispatcherConfig,

    #[serde(default)]
    pub netconf: NetconfSettings,

    #[serde(default)]
    pub cli: CliSettings,

    /// Device inventory
    #[serde(default)]
    pub devices: Vec<DeviceEntry>,
}

// Default functions
fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}

fn default_redis_port() -> u16 {
    6379
}

fn default_redis_db() -> u32 {
    7
}

fn default_queue_depth() -> usize {
    10
}

fn default_service_types() -> Vec<String> {
    vec!["raw".to_string()]
}

fn default_connect_retries() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    5
}

fn default_operation_timeout() -> u64 {
    60
}

fn default_dialect() -> String {
    "huawei-vrp".to_string()
}

// Default implementations
impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            redis_host: default_redis_host(),
            redis_port: default_redis_port(),
            redis_db: default_redis_db(),
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            queue_depth: default_queue_depth(),
            service_types: default_service_types(),
        }
    }
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            connect_retries: default_connect_retries(),
            retry_delay_secs: default_retry_delay(),
            operation_timeout_secs: default_operation_timeout(),
            confirm_window_secs: None,
        }
    }
}

impl Default for CliSettings {
    fn default() -> Self {
        Self {
            timers: TimerConfig::default(),
            default_dialect: default_dialect(),
        }
    }
}

impl TimerConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_secs)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }

    pub fn confirm_window(&self) -> Option<Duration> {
        self.confirm_window_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    fn validate(&self, section: &str) -> EmcpResult<()> {
        if self.operation_timeout_secs == 0 {
            return Err(EmcpError::invalid_config(
                format!("{}.operation_timeout_secs", section),
                "must be greater than 0",
            ));
        }
        Ok(())
    }
}

impl StoreConfig {
    /// Returns the Redis connection URI.
    pub fn redis_uri(&self) -> String {
        format!(
            "redis://{}:{}/{}",
            self.redis_host, self.redis_port, self.redis_db
        )
    }
}

impl EmcpConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> EmcpResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| EmcpError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EmcpConfig =
            toml::from_str(&content).map_err(|source| EmcpError::ConfigParse {
                path: path.to_path_buf(),
                source,
            })?;
        config.validate()?;
        tracing::info!(
            path = %path.display(),
            devices = config.devices.len(),
            "Loaded configuration"
        );
        Ok(config)
    }

    /// Validates cross-field constraints.
    pub fn validate(&self) -> EmcpResult<()> {
        if self.dispatcher.queue_depth == 0 {
            return Err(EmcpError::invalid_config(
                "dispatcher.queue_depth",
                "must be at least 1",
            ));
        }
        if self.dispatcher.service_types.is_empty() {
            return Err(EmcpError::invalid_config(
                "dispatcher.service_types",
                "at least one service type is required",
            ));
        }
        self.netconf.timers.validate("netconf")?;
        self.cli.timers.validate("cli")?;

        let mut names = HashSet::new();
        for device in &self.devices {
            if device.name.trim().is_empty() {
                return Err(EmcpError::invalid_config("devices.name", "must not be empty"));
            }
            if !names.insert(device.name.as_str()) {
                return Err(EmcpError::invalid_config(
                    "devices.name",
                    format!("duplicate device '{}'", device.name),
                ));
            }
            if device.host.trim().is_empty() {
                return Err(EmcpError::invalid_config(
                    format!("devices.{}.host", device.name),
                    "must not be empty",
                ));
            }
        }
        Ok(())
    }

    /// Looks up a device in the inventory.
    pub fn device(&self, name: &str) -> Option<&DeviceEntry> {
        self.devices.iter().find(|d| d.name == name)
    }

    /// Returns the timers for a protocol.
    pub fn timers(&self, protocol: Protocol) -> &TimerConfig {
        match protocol {
            Protocol::Netconf => &self.netconf.timers,
            Protocol::Cli => &self.cli.timers,
        }
    }
}
