//! Null station.
//!
//! Stands in for a console when the device is `/dev/null`: emits a loop with
//! the barometer at its quality control minimums on a fixed interval and never
//! produces archive records.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::station::traits::{Station, StationError, StationEvent};
use crate::station::types::Loop;

/// Default interval between emitted loops (2 seconds).
pub const DEFAULT_NULL_INTERVAL: Duration = Duration::from_secs(2);

/// Buffered events between the null station and its reader.
const CHANNEL_CAPACITY: usize = 16;

/// Station that emits a constant, valid loop.
#[derive(Debug, Clone)]
pub struct NullStation {
    interval: Duration,
}

impl NullStation {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for NullStation {
    fn default() -> Self {
        Self::new(DEFAULT_NULL_INTERVAL)
    }
}

impl Station for NullStation {
    fn name(&self) -> &str {
        "null"
    }

    fn open(
        &mut self,
        _resume_from: Option<DateTime<Utc>>,
    ) -> Result<mpsc::Receiver<StationEvent>, StationError> {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if tx.send(StationEvent::Loop(Loop::qc_minimum())).await.is_err() {
                    tracing::debug!("Null station reader closed, stopping");
                    break;
                }
            }
        });

        tracing::info!(interval = ?interval, "Null station started");
        Ok(rx)
    }
}
