//! NETCONF 1.0/1.1 over SSH.

pub mod driver;
pub mod framing;
pub mod rpc;

pub use driver::NetconfDriver;
pub use framing::{FrameDecoder, Framing};
