//! Mock device drivers.
//!
//! Each mock device keeps its running configuration in its [`DriverProbe`],
//! so it survives across workflows and requests the way a real device does.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use emcp_driver::{
    ApplyOutcome, CommitOutcome, ConnectOutcome, DeviceDriver, DriverError, DriverResult,
};
use emcp_provisiond::DriverFactory;

/// How a staged change fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockFailure {
    Validation,
    Apply,
}

/// Scripted behavior of one mock device.
#[derive(Debug, Clone)]
pub struct MockBehavior {
    pub start_fails: bool,
    pub connect: ConnectOutcome,
    /// Fetch number (1-based, per workflow) from which fetches fail
    pub fetch_fails_from: Option<u32>,
    pub reserve: Option<MockFailure>,
    pub remove: Option<MockFailure>,
    pub commit_fails: bool,
    pub confirm_window: Option<Duration>,
    pub confirm_fails: bool,
    pub rollback_fails: bool,
    /// Accept changes without touching the running configuration
    pub drops_changes: bool,
    pub disconnect_fails: bool,
}

impl Default for MockBehavior {
    fn default() -> Self {
        Self {
            start_fails: false,
            connect: ConnectOutcome::Ok,
            fetch_fails_from: None,
            reserve: None,
            remove: None,
            commit_fails: false,
            confirm_window: None,
            confirm_fails: false,
            rollback_fails: false,
            drops_changes: false,
            disconnect_fails: false,
        }
    }
}

impl MockBehavior {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start_fails(mut self) -> Self {
        self.start_fails = true;
        self
    }

    pub fn no_response(mut self) -> Self {
        self.connect = ConnectOutcome::NoResponse("connection timed out".to_string());
        self
    }

    pub fn rejected(mut self) -> Self {
        self.connect = ConnectOutcome::Rejected("authentication rejected".to_string());
        self
    }

    pub fn inconsistent(mut self) -> Self {
        self.connect = ConnectOutcome::Inconsistent("missing :candidate".to_string());
        self
    }

    pub fn fetch_fails_from(mut self, n: u32) -> Self {
        self.fetch_fails_from = Some(n);
        self
    }

    pub fn validation_fails(mut self) -> Self {
        self.reserve = Some(MockFailure::Validation);
        self
    }

    pub fn apply_fails(mut self) -> Self {
        self.reserve = Some(MockFailure::Apply);
        self
    }

    pub fn remove_fails(mut self) -> Self {
        self.remove = Some(MockFailure::Apply);
        self
    }

    pub fn commit_fails(mut self) -> Self {
        self.commit_fails = true;
        self
    }

    pub fn confirmed(mut self, window: Duration) -> Self {
        self.confirm_window = Some(window);
        self
    }

    pub fn confirm_fails(mut self) -> Self {
        self.confirm_fails = true;
        self
    }

    pub fn rollback_fails(mut self) -> Self {
        self.rollback_fails = true;
        self
    }

    pub fn drops_changes(mut self) -> Self {
        self.drops_changes = true;
        self
    }

    pub fn disconnect_fails(mut self) -> Self {
        self.disconnect_fails = true;
        self
    }
}

/// Call counters and device state shared by every driver built for one
/// mock device.
#[derive(Debug, Default)]
pub struct DriverProbe {
    starts: AtomicU32,
    connects: AtomicU32,
    disconnects: AtomicU32,
    unpaired_disconnects: AtomicU32,
    fetches: AtomicU32,
    reserves: AtomicU32,
    commits: AtomicU32,
    confirms: AtomicU32,
    rollbacks: AtomicU32,
    removes: AtomicU32,
    running: Mutex<Vec<String>>,
    committed_at: Mutex<Option<Instant>>,
    rolled_back_at: Mutex<Option<Instant>>,
}

impl DriverProbe {
    pub fn starts(&self) -> u32 {
        self.starts.load(Ordering::SeqCst)
    }

    pub fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn disconnects(&self) -> u32 {
        self.disconnects.load(Ordering::SeqCst)
    }

    /// Disconnects issued without a connected session.
    pub fn unpaired_disconnects(&self) -> u32 {
        self.unpaired_disconnects.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> u32 {
        self.fetches.load(Ordering::SeqCst)
    }

    pub fn reserves(&self) -> u32 {
        self.reserves.load(Ordering::SeqCst)
    }

    pub fn commits(&self) -> u32 {
        self.commits.load(Ordering::SeqCst)
    }

    pub fn confirms(&self) -> u32 {
        self.confirms.load(Ordering::SeqCst)
    }

    pub fn rollbacks(&self) -> u32 {
        self.rollbacks.load(Ordering::SeqCst)
    }

    pub fn removes(&self) -> u32 {
        self.removes.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> Vec<String> {
        self.running.lock().clone()
    }

    /// Replaces the running configuration, as an out-of-band change would.
    pub fn set_running<S: AsRef<str>>(&self, lines: &[S]) {
        *self.running.lock() = lines.iter().map(|l| l.as_ref().to_string()).collect();
    }

    /// When the last commit call returned.
    pub fn committed_at(&self) -> Option<Instant> {
        *self.committed_at.lock()
    }

    /// When the last rollback call started.
    pub fn rolled_back_at(&self) -> Option<Instant> {
        *self.rolled_back_at.lock()
    }
}

fn bump(counter: &AtomicU32) -> u32 {
    counter.fetch_add(1, Ordering::SeqCst) + 1
}

fn blob_lines(blob: &str) -> Vec<String> {
    blob.lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect()
}

fn failure(kind: MockFailure, what: &str) -> DriverError {
    match kind {
        MockFailure::Validation => DriverError::validation(format!("invalid-value: {} rejected", what)),
        MockFailure::Apply => DriverError::CommandFailed {
            command: what.to_string(),
            output: "Error: device busy".to_string(),
        },
    }
}

/// Scripted [`DeviceDriver`].
pub struct MockDriver {
    device: String,
    behavior: MockBehavior,
    probe: Arc<DriverProbe>,
    connected: bool,
    fetches: u32,
    staged: Option<Vec<String>>,
    before_confirm: Option<Vec<String>>,
}

impl MockDriver {
    pub fn new(device: impl Into<String>, behavior: MockBehavior, probe: Arc<DriverProbe>) -> Self {
        Self {
            device: device.into(),
            behavior,
            probe,
            connected: false,
            fetches: 0,
            staged: None,
            before_confirm: None,
        }
    }

    fn ensure_connected(&self) -> DriverResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(DriverError::NotConnected)
        }
    }
}

#[async_trait]
impl DeviceDriver for MockDriver {
    fn device(&self) -> &str {
        &self.device
    }

    async fn start(&mut self) -> DriverResult<()> {
        bump(&self.probe.starts);
        if self.behavior.start_fails {
            return Err(DriverError::InvalidParams {
                message: "unknown dialect 'nokia-sros'".to_string(),
            });
        }
        Ok(())
    }

    async fn connect(&mut self) -> ConnectOutcome {
        bump(&self.probe.connects);
        let outcome = self.behavior.connect.clone();
        self.connected = outcome.is_ok();
        outcome
    }

    async fn fetch_config(&mut self) -> DriverResult<String> {
        self.ensure_connected()?;
        bump(&self.probe.fetches);
        self.fetches += 1;
        if self.behavior.fetch_fails_from.is_some_and(|n| self.fetches >= n) {
            return Err(DriverError::timeout("get-config", Duration::from_secs(60)));
        }
        Ok(self.probe.running.lock().join("\n"))
    }

    async fn reserve(&mut self, blob: &str) -> DriverResult<()> {
        self.ensure_connected()?;
        bump(&self.probe.reserves);
        if let Some(kind) = self.behavior.reserve {
            return Err(failure(kind, "edit-config"));
        }
        self.staged = Some(blob_lines(blob));
        Ok(())
    }

    async fn commit(&mut self) -> DriverResult<CommitOutcome> {
        self.ensure_connected()?;
        bump(&self.probe.commits);
        if self.behavior.commit_fails {
            return Err(DriverError::protocol("commit failed: operation-failed"));
        }
        let staged = self.staged.take().unwrap_or_default();
        let mut running = self.probe.running.lock();
        let previous = running.clone();
        if !self.behavior.drops_changes {
            for line in staged {
                if !running.contains(&line) {
                    running.push(line);
                }
            }
        }
        drop(running);
        *self.probe.committed_at.lock() = Some(Instant::now());

        match self.behavior.confirm_window {
            Some(window) => {
                self.before_confirm = Some(previous);
                Ok(CommitOutcome::AwaitingConfirmation(window))
            }
            None => Ok(CommitOutcome::Committed),
        }
    }

    async fn confirm(&mut self) -> DriverResult<()> {
        self.ensure_connected()?;
        bump(&self.probe.confirms);
        if self.behavior.confirm_fails {
            return Err(DriverError::protocol("confirming commit failed"));
        }
        self.before_confirm = None;
        Ok(())
    }

    async fn rollback(&mut self) -> DriverResult<()> {
        self.ensure_connected()?;
        bump(&self.probe.rollbacks);
        *self.probe.rolled_back_at.lock() = Some(Instant::now());
        if self.behavior.rollback_fails {
            return Err(DriverError::protocol("cancel-commit failed"));
        }
        if let Some(previous) = self.before_confirm.take() {
            *self.probe.running.lock() = previous;
        }
        Ok(())
    }

    async fn apply_config(&mut self, blob: &str) -> ApplyOutcome {
        if let Err(e) = self.reserve(blob).await {
            return if e.is_validation() {
                ApplyOutcome::ValidationFailed(e.to_string())
            } else {
                ApplyOutcome::ApplyFailed(e.to_string())
            };
        }
        match self.commit().await {
            Ok(_) => ApplyOutcome::Ok,
            Err(e) => ApplyOutcome::ApplyFailed(e.to_string()),
        }
    }

    async fn remove_config(&mut self, blob: &str) -> ApplyOutcome {
        if !self.connected {
            return ApplyOutcome::ApplyFailed(DriverError::NotConnected.to_string());
        }
        bump(&self.probe.removes);
        match self.behavior.remove {
            Some(MockFailure::Validation) => {
                return ApplyOutcome::ValidationFailed(failure(MockFailure::Validation, "remove").to_string())
            }
            Some(MockFailure::Apply) => {
                return ApplyOutcome::ApplyFailed(failure(MockFailure::Apply, "remove").to_string())
            }
            None => {}
        }
        if !self.behavior.drops_changes {
            let removed = blob_lines(blob);
            self.probe.running.lock().retain(|line| !removed.contains(line));
        }
        ApplyOutcome::Ok
    }

    async fn disconnect(&mut self) -> DriverResult<()> {
        bump(&self.probe.disconnects);
        if !self.connected {
            bump(&self.probe.unpaired_disconnects);
        }
        self.connected = false;
        if self.behavior.disconnect_fails {
            return Err(DriverError::protocol("close-session: session already torn down"));
        }
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

/// [`DriverFactory`] over a set of mock devices.
#[derive(Default)]
pub struct MockDriverFactory {
    devices: Mutex<HashMap<String, (MockBehavior, Arc<DriverProbe>)>>,
}

impl MockDriverFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds (or rescripts) a device and returns its probe.
    pub fn device(&self, name: &str, behavior: MockBehavior) -> Arc<DriverProbe> {
        let mut devices = self.devices.lock();
        let probe = devices
            .get(name)
            .map(|(_, probe)| Arc::clone(probe))
            .unwrap_or_default();
        devices.insert(name.to_string(), (behavior, Arc::clone(&probe)));
        probe
    }

    pub fn probe(&self, name: &str) -> Option<Arc<DriverProbe>> {
        self.devices
            .lock()
            .get(name)
            .map(|(_, probe)| Arc::clone(probe))
    }
}

impl DriverFactory for MockDriverFactory {
    fn create(&self, device: &str) -> Option<Box<dyn DeviceDriver>> {
        let devices = self.devices.lock();
        let (behavior, probe) = devices.get(device)?;
        Some(Box::new(MockDriver::new(
            device,
            behavior.clone(),
            Arc::clone(probe),
        )))
    }
}
