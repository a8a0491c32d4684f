//! Scripted transport for driver unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

use crate::error::{DriverError, DriverResult};
use crate::transport::Transport;

/// One scripted exchange: when a write contains `trigger`, `replies` become
/// readable.
#[derive(Debug, Clone)]
struct Exchange {
    trigger: String,
    replies: Vec<String>,
}

/// Observations shared with the test after the transport is boxed.
#[derive(Debug, Default)]
pub struct TransportLog {
    pub writes: Mutex<Vec<String>>,
    pub opens: AtomicU32,
    pub closes: AtomicU32,
}

impl TransportLog {
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().map(|w| w.clone()).unwrap_or_default()
    }

    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

/// A [`Transport`] that replays a fixed script.
///
/// Writes are matched against the script in order; a write that does not
/// contain the next trigger is recorded but produces no data. Reads with
/// nothing pending wait forever, which callers observe as their own timeout.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    greeting: Vec<String>,
    script: VecDeque<Exchange>,
    pending: VecDeque<Vec<u8>>,
    failed_opens: u32,
    reject_auth: bool,
    fail_close: bool,
    open: bool,
    log: Arc<TransportLog>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Data the device sends right after the channel opens.
    pub fn greeting(mut self, text: &str) -> Self {
        self.greeting.push(text.to_string());
        self
    }

    /// Replies sent after a write containing `trigger`.
    pub fn expect(mut self, trigger: &str, reply: &str) -> Self {
        self.script.push_back(Exchange {
            trigger: trigger.to_string(),
            replies: vec![reply.to_string()],
        });
        self
    }

    /// The first `n` opens fail as unreachable.
    pub fn fail_opens(mut self, n: u32) -> Self {
        self.failed_opens = n;
        self
    }

    pub fn reject_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    /// Closing tears the channel down but reports an error.
    pub fn fail_close(mut self) -> Self {
        self.fail_close = true;
        self
    }

    pub fn log(&self) -> Arc<TransportLog> {
        self.log.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&mut self) -> DriverResult<()> {
        self.log.opens.fetch_add(1, Ordering::SeqCst);
        if self.failed_opens > 0 {
            self.failed_opens -= 1;
            return Err(DriverError::unreachable("scripted", "connection refused"));
        }
        if self.reject_auth {
            return Err(DriverError::AuthRejected {
                host: "scripted".to_string(),
                user: "admin".to_string(),
            });
        }
        self.open = true;
        for chunk in self.greeting.drain(..) {
            self.pending.push_back(chunk.into_bytes());
        }
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> DriverResult<()> {
        if !self.open {
            return Err(DriverError::NotConnected);
        }
        let text = String::from_utf8_lossy(data).to_string();
        if let Ok(mut writes) = self.log.writes.lock() {
            writes.push(text.clone());
        }
        let matched = self
            .script
            .front()
            .is_some_and(|exchange| text.contains(&exchange.trigger));
        if matched {
            if let Some(exchange) = self.script.pop_front() {
                for reply in exchange.replies {
                    self.pending.push_back(reply.into_bytes());
                }
            }
        }
        Ok(())
    }

    async fn read(&mut self) -> DriverResult<Vec<u8>> {
        if !self.open {
            return Err(DriverError::Closed);
        }
        match self.pending.pop_front() {
            Some(chunk) => Ok(chunk),
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> DriverResult<()> {
        if self.open {
            self.open = false;
            self.log.closes.fetch_add(1, Ordering::SeqCst);
        }
        if self.fail_close {
            return Err(DriverError::Closed);
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.open
    }
}
