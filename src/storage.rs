//! Archive storage layer
//!
//! DuckDB-backed key/value store for archive records, keyed by timestamp:
//! - **Writer**: Dedicated thread owning the write connection, fed over a bounded channel
//! - **Reader**: Connections cloned from the writer's database for concurrent reads
//!
//! # Components
//!
//! - [`ArchiveWriter`]: Upsert archive records, one committed transaction each
//! - [`ArchiveReader`]: Descending range queries and [`RecordStream`]s
//! - [`StorageAdmin`]: Checkpoint and shutdown
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod actor;
mod builder;
mod error;
mod facades;
mod pool;
mod schema;
mod types;

pub use actor::MEMORY_PATH;
pub use builder::{
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL, StorageBuilder, StorageHandles,
};
pub use error::StorageError;
pub use facades::{ArchiveReader, ArchiveWriter, RecordStream, StorageAdmin};
pub use types::{archive_key, parse_archive_key};
