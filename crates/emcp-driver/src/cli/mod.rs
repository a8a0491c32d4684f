//! Interactive CLI over an SSH shell, parameterized by vendor dialect.

pub mod dialect;
pub mod driver;
pub mod session;

pub use dialect::{ConfirmUnit, ConfirmedCommit, Dialect};
pub use driver::CliDriver;
pub use session::{CliMode, CliSession};
