//! Confirmation waits for confirmed commits.
//!
//! A workflow holding a confirmed commit registers a [`ConfirmationHandle`]
//! and parks on it until the dispatcher signals it or the window elapses.
//! The dispatcher only ever sees the registry.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::debug;

struct WaitEntry {
    transaction_id: String,
    device: String,
    notify: Arc<Notify>,
}

#[derive(Default)]
struct Inner {
    waits: Mutex<HashMap<u64, WaitEntry>>,
    next_id: AtomicU64,
}

/// Registry of pending confirmation waits, shared by one dispatcher and its
/// workflows.
#[derive(Clone, Default)]
pub struct WaitRegistry {
    inner: Arc<Inner>,
}

impl WaitRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, transaction_id: &str, device: &str) -> ConfirmationHandle {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let notify = Arc::new(Notify::new());
        self.inner.waits.lock().insert(
            id,
            WaitEntry {
                transaction_id: transaction_id.to_string(),
                device: device.to_string(),
                notify: Arc::clone(&notify),
            },
        );
        ConfirmationHandle {
            id,
            notify,
            registry: self.clone(),
        }
    }

    /// Signals every registered wait whose device is in `devices`, or every
    /// wait when `devices` is empty. Returns how many were signalled.
    pub fn signal(&self, devices: &[String]) -> usize {
        let waits = self.inner.waits.lock();
        let mut signalled = 0;
        for entry in waits.values() {
            if devices.is_empty() || devices.contains(&entry.device) {
                debug!(
                    transaction_id = %entry.transaction_id,
                    device = %entry.device,
                    "Signalling confirmation wait"
                );
                entry.notify.notify_one();
                signalled += 1;
            }
        }
        signalled
    }

    pub fn len(&self) -> usize {
        self.inner.waits.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remove(&self, id: u64) {
        self.inner.waits.lock().remove(&id);
    }
}

/// A registered wait. Deregisters itself when dropped.
pub struct ConfirmationHandle {
    id: u64,
    notify: Arc<Notify>,
    registry: WaitRegistry,
}

impl ConfirmationHandle {
    /// Waits for a signal until `deadline`. Returns true if signalled.
    ///
    /// A signal sent between registration and this call is not lost.
    pub async fn wait_until(&self, deadline: Instant) -> bool {
        tokio::time::timeout_at(deadline, self.notify.notified())
            .await
            .is_ok()
    }
}

impl Drop for ConfirmationHandle {
    fn drop(&mut self) {
        self.registry.remove(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_wait_expires_at_deadline() {
        let registry = WaitRegistry::new();
        let handle = registry.register("tx-1", "leaf-01");
        let start = Instant::now();

        assert!(!handle.wait_until(start + Duration::from_secs(30)).await);
        assert_eq!(start.elapsed(), Duration::from_secs(30));
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_before_wait_is_kept() {
        let registry = WaitRegistry::new();
        let handle = registry.register("tx-1", "leaf-01");
        assert_eq!(registry.signal(&[]), 1);

        let start = Instant::now();
        assert!(handle.wait_until(start + Duration::from_secs(30)).await);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_stays_pending_until_signalled() {
        let registry = WaitRegistry::new();
        let handle = registry.register("tx-1", "leaf-01");
        let mut wait =
            tokio_test::task::spawn(handle.wait_until(Instant::now() + Duration::from_secs(30)));

        tokio_test::assert_pending!(wait.poll());
        assert_eq!(registry.signal(&[]), 1);
        assert!(wait.is_woken());
        tokio_test::assert_ready_eq!(wait.poll(), true);
    }

    #[tokio::test(start_paused = true)]
    async fn test_signal_filters_by_device() {
        let registry = WaitRegistry::new();
        let a = registry.register("tx-1", "leaf-01");
        let _b = registry.register("tx-1", "leaf-02");

        assert_eq!(registry.signal(&["leaf-01".to_string()]), 1);
        assert!(a.wait_until(Instant::now() + Duration::from_secs(1)).await);
    }

    #[test]
    fn test_handle_drop_deregisters() {
        let registry = WaitRegistry::new();
        let handle = registry.register("tx-1", "leaf-01");
        assert_eq!(registry.len(), 1);
        drop(handle);
        assert!(registry.is_empty());
        assert_eq!(registry.signal(&[]), 0);
    }
}
