//! Visitor-scoped targeting storage with pluggable backends.
//!
//! - [`SessionStorage`]: process-local DashMap buckets.
//! - [`SqliteStorage`]: durable SQLite table.
//!
//! Both implement [`TargetingStorage`], so a visitor's session state can be
//! migrated into durable storage once they are identified.

#![warn(clippy::unwrap_used)]

pub mod error;
pub mod recorder;
pub mod session;
pub mod sqlite;
pub mod storage;
pub mod timestamps;

pub use error::{StorageError, StorageResult};
pub use recorder::{record_matches, recorded_match};
pub use session::SessionStorage;
pub use sqlite::SqliteStorage;
pub use storage::{TargetingStorage, META_KEY};
pub use timestamps::BucketTimestamps;

use targeting_core::{StorageBackend, StorageConfig};

/// Build the backend selected in the configuration.
pub fn open_storage(config: &StorageConfig) -> StorageResult<Box<dyn TargetingStorage>> {
    Ok(match config.backend {
        StorageBackend::Session => Box::new(SessionStorage::new()),
        StorageBackend::Sqlite => Box::new(SqliteStorage::open(config)?),
    })
}
