//! Station Layer
//!
//! Weather station drivers emit [`StationEvent`]s over a channel: archive
//! records read back from the console and live loop samples. The physical
//! console protocol lives outside this crate; drivers here are the
//! [`NullStation`] used for `/dev/null` and the hand-fed [`ChannelStation`].

mod channel;
mod null;
mod traits;
pub mod types;

pub use channel::{ChannelStation, channel};
pub use null::{DEFAULT_NULL_INTERVAL, NullStation};
pub use traits::{Station, StationError, StationEvent};
pub use types::{ArchiveRecord, Loop, LoopSample};

use crate::config::StationConfig;

/// Device name that selects the [`NullStation`].
pub const NULL_DEVICE: &str = "/dev/null";

/// Open the driver for the configured device.
pub fn open(config: &StationConfig) -> Result<Box<dyn Station>, StationError> {
    if config.device.eq_ignore_ascii_case(NULL_DEVICE) {
        return Ok(Box::new(NullStation::new(config.null_interval)));
    }
    Err(StationError::Unsupported(config.device.clone()))
}
