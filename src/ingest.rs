//! Ingestion pipeline.
//!
//! Drains a station's event stream: archive records are persisted then
//! published, loop samples are quality checked, sequenced, buffered and
//! published. Runs until cancelled or until the driver stops.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::events::{Broker, Event};
use crate::loop_buffer::LoopBuffer;
use crate::qc::validity_check;
use crate::station::types::{ArchiveRecord, Loop, LoopSample};
use crate::station::{Station, StationError, StationEvent};
use crate::storage::{ArchiveReader, ArchiveWriter, StorageError};

/// Errors that end an ingestion run.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The station's event stream ended.
    #[error("station driver terminated")]
    DriverTerminated,

    /// The station could not be opened.
    #[error("station error: {0}")]
    Station(#[from] StationError),

    /// The archive could not be read at startup.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Counters for one ingestion run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Archive records stored.
    pub archived: u64,
    /// Archive records that failed to store.
    pub archive_failures: u64,
    /// Loop samples accepted and sequenced.
    pub accepted: u64,
    /// Loop samples discarded by quality control.
    pub rejected: u64,
}

/// Connects a station to the archive, the loop buffer and the broker.
pub struct Ingestor {
    writer: ArchiveWriter,
    reader: ArchiveReader,
    loops: Arc<LoopBuffer>,
    broker: Broker,
}

impl std::fmt::Debug for Ingestor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingestor")
            .field("loops", &self.loops.len())
            .finish_non_exhaustive()
    }
}

/// Outcome of handling one event.
enum Step {
    Continue,
    Cancelled,
}

impl Ingestor {
    pub fn new(
        writer: ArchiveWriter,
        reader: ArchiveReader,
        loops: Arc<LoopBuffer>,
        broker: Broker,
    ) -> Self {
        Self {
            writer,
            reader,
            loops,
            broker,
        }
    }

    /// Open `station` and process its events until `cancel` fires.
    ///
    /// Sequence numbers start at 0 for each run and advance only for accepted
    /// loop samples.
    ///
    /// # Errors
    /// [`IngestError::DriverTerminated`] when the station's stream ends;
    /// open failures are passed through.
    pub async fn run(
        &self,
        station: &mut dyn Station,
        cancel: CancellationToken,
    ) -> Result<IngestStats, IngestError> {
        let resume_from = self.reader.last()?;
        let mut events = station.open(resume_from)?;
        tracing::info!(
            station = station.name(),
            resume_from = ?resume_from,
            "Ingestion started"
        );

        let mut stats = IngestStats::default();
        let mut next_sequence: u64 = 0;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => break,
                event = events.recv() => event,
            };

            let step = match event {
                Some(StationEvent::Archive(record)) => {
                    self.handle_archive(record, &mut stats, &cancel).await
                }
                Some(StationEvent::Loop(current)) => {
                    self.handle_loop(current, &mut next_sequence, &mut stats, &cancel)
                        .await
                }
                None => {
                    tracing::error!(
                        station = station.name(),
                        archived = stats.archived,
                        accepted = stats.accepted,
                        "Station event stream ended"
                    );
                    return Err(IngestError::DriverTerminated);
                }
            };

            if matches!(step, Step::Cancelled) {
                break;
            }
        }

        tracing::info!(
            archived = stats.archived,
            archive_failures = stats.archive_failures,
            accepted = stats.accepted,
            rejected = stats.rejected,
            "Ingestion stopped"
        );
        Ok(stats)
    }

    async fn handle_archive(
        &self,
        record: ArchiveRecord,
        stats: &mut IngestStats,
        cancel: &CancellationToken,
    ) -> Step {
        let timestamp = record.timestamp;
        if let Err(e) = self.writer.add(record.clone()).await {
            stats.archive_failures += 1;
            tracing::error!(error = %e, timestamp = %timestamp, "Failed to store archive record");
            return Step::Continue;
        }
        stats.archived += 1;
        tracing::debug!(timestamp = %timestamp, "Archive record stored");
        self.publish(Event::Archive(record), cancel).await
    }

    async fn handle_loop(
        &self,
        current: Loop,
        next_sequence: &mut u64,
        stats: &mut IngestStats,
        cancel: &CancellationToken,
    ) -> Step {
        let qc = validity_check(&current);
        if !qc.passed() {
            stats.rejected += 1;
            tracing::warn!(violations = %qc, "Loop sample failed quality control");
            return Step::Continue;
        }

        let sample = LoopSample {
            sequence: *next_sequence,
            timestamp: Utc::now(),
            current,
        };
        *next_sequence += 1;
        stats.accepted += 1;

        tracing::trace!(sequence = sample.sequence, "Loop sample accepted");
        self.loops.add(sample.clone());
        self.publish(Event::Loop(sample), cancel).await
    }

    /// Publish, waiting for queue space unless cancelled first.
    async fn publish(&self, event: Event, cancel: &CancellationToken) -> Step {
        tokio::select! {
            _ = cancel.cancelled() => Step::Cancelled,
            result = self.broker.publish(event) => {
                if let Err(e) = result {
                    tracing::warn!(error = %e, "Event not published");
                }
                Step::Continue
            }
        }
    }
}
