//! Transaction store for the element-management control plane.
//!
//! The store holds one aggregate [`TransactionRecord`] per transaction and
//! one [`DeviceStatusRow`] per (transaction, device), plus audit data the
//! workflows persist along the way (configuration snapshots and final
//! [`DeviceRecord`]s).
//!
//! Every write is a single-row upsert. There are no cross-row transactions;
//! callers that need "read then conditionally write" semantics (the
//! aggregate monotonicity rule) implement them on top of
//! [`TransactionStore::read_transaction`].
//!
//! Backends:
//!
//! - [`MemoryStore`]: process-local, used by tests and single-node setups
//! - [`RedisStore`]: Redis hashes (feature `redis`, enabled by default)

mod error;
mod memory;
mod model;
#[cfg(feature = "redis")]
mod redis_backend;
mod store;

use std::sync::Arc;

use emcp_common::{StoreBackend, StoreConfig};

pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use model::{
    ConfigDiff, ConfigSnapshot, DeviceRecord, DeviceStatusRow, SnapshotKind, TransactionRecord,
    WriteOp,
};
#[cfg(feature = "redis")]
pub use redis_backend::RedisStore;
pub use store::TransactionStore;

/// Opens the backend selected by configuration.
pub async fn open(config: &StoreConfig) -> StoreResult<Arc<dyn TransactionStore>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        #[cfg(feature = "redis")]
        StoreBackend::Redis => Ok(Arc::new(RedisStore::connect(config).await?)),
        #[cfg(not(feature = "redis"))]
        StoreBackend::Redis => Err(StoreError::backend(
            "open",
            "built without the 'redis' feature",
        )),
    }
}
