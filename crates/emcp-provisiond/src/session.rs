//! One device session per workflow run.

use tracing::{debug, error};

use emcp_driver::{ConnectOutcome, DeviceDriver, DriverResult};

/// Owns the device driver for one workflow run and tracks whether it is
/// connected.
///
/// [`DeviceSession::close`] disconnects at most once per successful
/// connect; later calls are no-ops.
pub struct DeviceSession {
    driver: Box<dyn DeviceDriver>,
    connected: bool,
}

impl DeviceSession {
    pub fn new(driver: Box<dyn DeviceDriver>) -> Self {
        Self {
            driver,
            connected: false,
        }
    }

    pub fn device(&self) -> &str {
        self.driver.device()
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn driver_mut(&mut self) -> &mut dyn DeviceDriver {
        self.driver.as_mut()
    }

    pub async fn connect(&mut self) -> ConnectOutcome {
        let outcome = self.driver.connect().await;
        self.connected = outcome.is_ok();
        outcome
    }

    pub async fn close(&mut self) -> DriverResult<()> {
        if !self.connected {
            return Ok(());
        }
        self.connected = false;
        debug!(device = %self.driver.device(), "Closing device session");
        self.driver.disconnect().await
    }
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        if self.connected {
            error!(device = %self.driver.device(), "Device session dropped while still connected");
        }
    }
}
