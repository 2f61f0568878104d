//! wxstation - Weather Station Ingestion Library
//!
//! Core of the weather station service. It can be used as a library by other
//! Rust projects, or run as a standalone binary with the `wxstation` executable.
//!
//! # Architecture
//!
//! - **Station**: Driver interface emitting archive records and loop samples
//! - **Ingest**: Quality control, sequencing, persistence and publishing
//! - **Storage**: DuckDB-backed archive keyed by timestamp
//! - **Loop buffer**: Fixed-capacity window of recent accepted samples
//! - **Events**: Broker fanning events out to live subscribers
//! - **Server**: HTTP API over the above
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use wxstation::{Broker, Ingestor, LoopBuffer, StorageBuilder, NullStation};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handles = StorageBuilder::new("weather.db").build()?;
//!     let loops = Arc::new(LoopBuffer::default());
//!     let ingestor = Ingestor::new(
//!         handles.writer.clone(),
//!         handles.reader.clone(),
//!         loops,
//!         Broker::default_sized(),
//!     );
//!     let mut station = NullStation::default();
//!     ingestor.run(&mut station, CancellationToken::new()).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod events;
pub mod ingest;
pub mod logging;
pub mod loop_buffer;
pub mod qc;
pub mod server;
pub mod station;
pub mod storage;

pub use events::{Broker, BrokerError, Event, Subscription};
pub use ingest::{IngestError, IngestStats, Ingestor};
pub use logging::{LogSinks, LogTap};
pub use loop_buffer::{LoopBuffer, RingBuffer};
pub use qc::{QualityControl, RangeViolation, validity_check};
pub use station::{NullStation, Station, StationError, StationEvent};
pub use storage::{ArchiveReader, ArchiveWriter, StorageBuilder, StorageError, StorageHandles};
