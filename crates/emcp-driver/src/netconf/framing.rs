//! NETCONF message framing.
//!
//! base:1.0 ends each message with `]]>]]>`. base:1.1 (RFC 6242) sends one or
//! more `\n#<len>\n<bytes>` chunks terminated by `\n##\n`.

use crate::error::{DriverError, DriverResult};

pub const EOM: &str = "]]>]]>";

/// Largest chunk size RFC 6242 allows.
const MAX_CHUNK: usize = 4_294_967_295;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Framing {
    EndOfMessage,
    Chunked,
}

impl Framing {
    pub fn encode(&self, message: &str) -> Vec<u8> {
        match self {
            Framing::EndOfMessage => format!("{}{}", message, EOM).into_bytes(),
            Framing::Chunked => format!("\n#{}\n{}\n##\n", message.len(), message).into_bytes(),
        }
    }
}

/// Incremental decoder; feed bytes with [`push`](Self::push) and pull whole
/// messages with [`next_message`](Self::next_message).
#[derive(Debug)]
pub struct FrameDecoder {
    framing: Framing,
    buf: Vec<u8>,
}

impl FrameDecoder {
    pub fn new(framing: Framing) -> Self {
        Self {
            framing,
            buf: Vec::new(),
        }
    }

    /// Switches framing after the hello exchange. Buffered bytes are kept.
    pub fn set_framing(&mut self, framing: Framing) {
        self.framing = framing;
    }

    pub fn framing(&self) -> Framing {
        self.framing
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns the next complete message, or `None` if more bytes are needed.
    pub fn next_message(&mut self) -> DriverResult<Option<String>> {
        match self.framing {
            Framing::EndOfMessage => Ok(self.next_eom()),
            Framing::Chunked => self.next_chunked(),
        }
    }

    fn next_eom(&mut self) -> Option<String> {
        let marker = EOM.as_bytes();
        let pos = self
            .buf
            .windows(marker.len())
            .position(|window| window == marker)?;
        let message = String::from_utf8_lossy(&self.buf[..pos]).trim().to_string();
        self.buf.drain(..pos + marker.len());
        Some(message)
    }

    fn next_chunked(&mut self) -> DriverResult<Option<String>> {
        let mut pos = 0;
        let mut message = Vec::new();

        loop {
            // Leading whitespace between messages is tolerated.
            while pos < self.buf.len() && self.buf[pos] != b'\n' && message.is_empty() {
                if !self.buf[pos].is_ascii_whitespace() {
                    return Err(DriverError::protocol("chunk header must start with LF"));
                }
                pos += 1;
            }
            if self.buf.len() < pos + 3 {
                return Ok(None);
            }
            if self.buf[pos] != b'\n' || self.buf[pos + 1] != b'#' {
                return Err(DriverError::protocol("malformed chunk header"));
            }

            if self.buf[pos + 2] == b'#' {
                if self.buf.len() < pos + 4 {
                    return Ok(None);
                }
                if self.buf[pos + 3] != b'\n' {
                    return Err(DriverError::protocol("malformed end-of-chunks marker"));
                }
                self.buf.drain(..pos + 4);
                return Ok(Some(String::from_utf8_lossy(&message).to_string()));
            }

            let digits_start = pos + 2;
            let Some(lf) = self.buf[digits_start..].iter().position(|b| *b == b'\n') else {
                if self.buf.len() - digits_start > 10 {
                    return Err(DriverError::protocol("chunk size too long"));
                }
                return Ok(None);
            };
            let digits = &self.buf[digits_start..digits_start + lf];
            let size: usize = std::str::from_utf8(digits)
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0 && *n <= MAX_CHUNK)
                .ok_or_else(|| DriverError::protocol("invalid chunk size"))?;

            let data_start = digits_start + lf + 1;
            if self.buf.len() < data_start + size {
                return Ok(None);
            }
            message.extend_from_slice(&self.buf[data_start..data_start + size]);
            pos = data_start + size;
        }
    }
}
