//! Infrastructure layer: configuration, snapshot storage, locking and the
//! transactional service facade.

pub mod config;
pub mod locks;
pub mod service;
pub mod snapshot_store;

pub use config::{ConfigError, InventoryConfig};
pub use locks::KeyedLocks;
pub use service::{
    InventoryService, IssueStock, ReceiveStock, ReceivedStock, ServiceError, ServiceResult,
};
pub use snapshot_store::{InMemorySnapshotStore, SnapshotStore};
