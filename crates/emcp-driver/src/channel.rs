//! Prompt-driven reading on top of a [`Transport`].
//!
//! Incoming data accumulates in a [`PatternBuffer`]. After each chunk only the
//! tail of the buffer is searched for the pattern, so long outputs (full
//! configurations) do not make every read quadratic.

use std::time::Duration;

use regex::Regex;
use tokio::time::Instant;
use tracing::trace;

use crate::error::{DriverError, DriverResult};
use crate::transport::Transport;

/// Bytes from the end of the buffer that are searched for a prompt.
pub const DEFAULT_SEARCH_DEPTH: usize = 1000;

/// Accumulates output and finds patterns near its end.
#[derive(Debug, Default)]
pub struct PatternBuffer {
    data: String,
    search_depth: usize,
}

impl PatternBuffer {
    pub fn new(search_depth: usize) -> Self {
        Self {
            data: String::new(),
            search_depth,
        }
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.data.push_str(&String::from_utf8_lossy(bytes));
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// If `pattern` matches within the searched tail, removes and returns
    /// everything up to the end of the match.
    pub fn take_through(&mut self, pattern: &Regex) -> Option<String> {
        let mut start = self.data.len().saturating_sub(self.search_depth);
        while !self.data.is_char_boundary(start) {
            start -= 1;
        }
        let end = pattern.find(&self.data[start..])?.end() + start;
        let rest = self.data.split_off(end);
        Some(std::mem::replace(&mut self.data, rest))
    }

    /// Removes and returns the whole buffer.
    pub fn drain(&mut self) -> String {
        std::mem::take(&mut self.data)
    }
}

/// A transport plus its pattern buffer.
pub struct PromptChannel {
    transport: Box<dyn Transport>,
    buffer: PatternBuffer,
}

impl PromptChannel {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            transport,
            buffer: PatternBuffer::new(DEFAULT_SEARCH_DEPTH),
        }
    }

    pub fn transport_mut(&mut self) -> &mut dyn Transport {
        self.transport.as_mut()
    }

    pub async fn write_line(&mut self, line: &str) -> DriverResult<()> {
        trace!(line, "write");
        let mut data = Vec::with_capacity(line.len() + 1);
        data.extend_from_slice(line.as_bytes());
        data.push(b'\n');
        self.transport.write(&data).await
    }

    /// Reads until `pattern` appears, returning the output through the match.
    ///
    /// `timeout` bounds the whole wait, not each chunk.
    pub async fn read_until(&mut self, pattern: &Regex, timeout: Duration) -> DriverResult<String> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(output) = self.buffer.take_through(pattern) {
                return Ok(output);
            }
            match tokio::time::timeout_at(deadline, self.transport.read()).await {
                Ok(chunk) => self.buffer.push(&chunk?),
                Err(_) => {
                    return Err(DriverError::timeout(
                        format!("pattern '{}'", pattern.as_str()),
                        timeout,
                    ))
                }
            }
        }
    }

    /// Discards anything buffered but not yet consumed.
    pub fn clear(&mut self) -> String {
        self.buffer.drain()
    }
}
