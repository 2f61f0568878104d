//! Channel-backed station.
//!
//! Lets an embedding program (or a test) feed events into the pipeline by
//! hand. Dropping every sender ends the station's event stream.

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::station::traits::{Station, StationError, StationEvent};

/// Station whose events come from a [`mpsc::Sender`] held by the caller.
#[derive(Debug)]
pub struct ChannelStation {
    rx: Option<mpsc::Receiver<StationEvent>>,
    resumed_from: Option<DateTime<Utc>>,
}

impl ChannelStation {
    /// The resume timestamp passed to [`Station::open`], once opened.
    pub fn resumed_from(&self) -> Option<DateTime<Utc>> {
        self.resumed_from
    }
}

/// Create a channel station and the sender that feeds it.
pub fn channel(capacity: usize) -> (mpsc::Sender<StationEvent>, ChannelStation) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    (
        tx,
        ChannelStation {
            rx: Some(rx),
            resumed_from: None,
        },
    )
}

impl Station for ChannelStation {
    fn name(&self) -> &str {
        "channel"
    }

    fn open(
        &mut self,
        resume_from: Option<DateTime<Utc>>,
    ) -> Result<mpsc::Receiver<StationEvent>, StationError> {
        self.resumed_from = resume_from;
        self.rx.take().ok_or(StationError::AlreadyOpen)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::station::types::Loop;

    #[tokio::test]
    async fn test_channel_station_opens_once() {
        let (tx, mut station) = channel(4);
        let mut rx = station.open(None).unwrap();
        assert!(matches!(station.open(None), Err(StationError::AlreadyOpen)));

        tx.send(StationEvent::Loop(Loop::default())).await.unwrap();
        drop(tx);
        assert!(rx.recv().await.is_some());
        assert!(rx.recv().await.is_none());
    }
}
