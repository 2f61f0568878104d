//! Core station driver traits and types.

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::mpsc;

use crate::station::types::{ArchiveRecord, Loop};

/// Errors that can occur while opening a station.
#[derive(Debug, Error)]
pub enum StationError {
    /// No driver handles the configured device.
    #[error("unsupported station device: {0}")]
    Unsupported(String),

    /// Device I/O error.
    #[error("station i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The station was already opened.
    #[error("station already opened")]
    AlreadyOpen,
}

/// An event emitted by a station driver.
#[derive(Debug, Clone, PartialEq)]
pub enum StationEvent {
    /// A record read back from the console's archive memory.
    Archive(ArchiveRecord),
    /// Current conditions.
    Loop(Loop),
}

/// A source of station events.
///
/// Drivers run on their own task or thread and push events into the returned
/// channel. The channel closing means the driver has stopped for good.
pub trait Station: Send + 'static {
    /// Human-readable driver name for logs.
    fn name(&self) -> &str;

    /// Start the driver.
    ///
    /// `resume_from` is the timestamp of the newest archived record, if any.
    /// Drivers only deliver archive records newer than it.
    fn open(
        &mut self,
        resume_from: Option<DateTime<Utc>>,
    ) -> Result<mpsc::Receiver<StationEvent>, StationError>;
}
