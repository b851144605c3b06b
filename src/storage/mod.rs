//! Sample stores
//!
//! This module provides a trait-based abstraction over the persistence of
//! probe samples and pre-aggregated minute buckets.
//!
//! ## Design
//!
//! - **Trait-based**: `SampleStore` allows swapping implementations
//! - **Async**: All operations are async for compatibility with Tokio tasks
//! - **Append-only**: Samples are inserted in per-cycle batches and never
//!   updated, so concurrent readers and writers need no extra locking
//!
//! ## Backends
//!
//! - **SQLite** (default): Embedded database
//! - **In-Memory**: No persistence, for tests or throwaway runs
//!
//! ## Usage
//!
//! ```no_run
//! use netwatch::storage::{SampleStore, sqlite::SqliteBackend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = SqliteBackend::new("./netwatch.db").await?;
//!     backend.close().await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use crate::config::StorageConfig;

pub use backend::{BucketQuery, HealthStatus, SampleQuery, SampleStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemoryBackend;
pub use schema::{Sample, WindowBucket};

/// Open the store described by the configuration
///
/// For SQLite this creates the file if needed and runs migrations.
pub async fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn SampleStore>> {
    match config {
        StorageConfig::Memory => Ok(Arc::new(memory::MemoryBackend::new())),
        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite { path } => Ok(Arc::new(sqlite::SqliteBackend::new(path).await?)),
        #[cfg(not(feature = "storage-sqlite"))]
        StorageConfig::Sqlite { .. } => Err(StorageError::ConnectionFailed(
            "sqlite support not compiled in (enable the storage-sqlite feature)".to_string(),
        )),
    }
}
