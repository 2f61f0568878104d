//! User-facing storage facades.
//!
//! - `ArchiveWriter`: Upserts through the writer actor, one result per record
//! - `ArchiveReader`: Latest key, descending range queries and streams
//! - `StorageAdmin`: Checkpoint and shutdown

use std::pin::Pin;
use std::sync::Arc;
use std::sync::mpsc::{SyncSender, TrySendError};
use std::task::{Context, Poll};
use std::thread::JoinHandle;

use chrono::{DateTime, Utc};
use duckdb::{Connection, params};
use futures::Stream;
use tokio::sync::{mpsc, oneshot};

use crate::station::types::ArchiveRecord;
use crate::storage::StorageError;
use crate::storage::actor::Command;
use crate::storage::pool::ReadPool;
use crate::storage::types::{archive_key, parse_archive_key};

// =============================================================================
// Constants
// =============================================================================

/// Records buffered between the scan thread and a stream consumer.
const STREAM_BUFFER: usize = 64;

const RANGE_SQL: &str =
    "SELECT ts, record FROM archive WHERE ts >= ? AND ts <= ? ORDER BY ts DESC";

// =============================================================================
// Writer
// =============================================================================

/// Archive writer.
///
/// Uses `try_send` to reach the actor; a full queue is reported as an error
/// rather than blocking the caller.
#[derive(Clone)]
pub struct ArchiveWriter {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for ArchiveWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveWriter").finish_non_exhaustive()
    }
}

impl ArchiveWriter {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Store a record under its timestamp key, replacing any existing record.
    ///
    /// Resolves once the write transaction has committed or failed.
    pub async fn add(&self, record: ArchiveRecord) -> Result<(), StorageError> {
        let (reply, rx) = oneshot::channel();
        match self.tx.try_send(Command::Add { record, reply }) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Writer queue full, archive record not stored");
                return Err(StorageError::ChannelSend);
            }
            Err(TrySendError::Disconnected(_)) => return Err(StorageError::ChannelSend),
        }
        rx.await
            .map_err(|_| StorageError::Internal("writer dropped reply".to_string()))?
    }
}

// =============================================================================
// Reader
// =============================================================================

/// Archive reader.
#[derive(Clone)]
pub struct ArchiveReader {
    pool: Arc<ReadPool>,
}

impl std::fmt::Debug for ArchiveReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveReader").finish_non_exhaustive()
    }
}

impl ArchiveReader {
    pub(crate) fn new(pool: Arc<ReadPool>) -> Self {
        Self { pool }
    }

    /// Timestamp of the newest stored record, if any.
    pub fn last(&self) -> Result<Option<DateTime<Utc>>, StorageError> {
        let conn = self.pool.get()?;
        let key: Option<String> =
            conn.query_row("SELECT MAX(ts) FROM archive", [], |row| row.get(0))?;
        key.as_deref().map(parse_archive_key).transpose()
    }

    /// Records with `begin <= timestamp <= end`, newest first.
    ///
    /// Bounds are inclusive at second precision. An inverted range yields
    /// nothing. Rows that fail to decode are skipped.
    pub fn query(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<ArchiveRecord>, StorageError> {
        let mut records = Vec::new();
        if begin > end {
            return Ok(records);
        }
        let conn = self.pool.get()?;
        scan(&conn, begin, end, |record| {
            records.push(record);
            true
        })?;
        Ok(records)
    }

    /// Same traversal as [`query`](Self::query), delivered incrementally.
    ///
    /// The scan runs on its own thread and stops once the stream is dropped.
    pub fn stream(
        &self,
        begin: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<RecordStream, StorageError> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        if begin > end {
            return Ok(RecordStream { rx, scan: None });
        }
        let conn = self.pool.get()?;
        let worker = std::thread::Builder::new()
            .name("archive-stream".to_string())
            .spawn(move || {
                let result = scan(&conn, begin, end, |record| tx.blocking_send(record).is_ok());
                if let Err(e) = result {
                    tracing::error!(error = %e, "Archive stream scan failed");
                }
            })
            .map_err(|e| StorageError::Internal(format!("failed to spawn stream thread: {e}")))?;
        Ok(RecordStream {
            rx,
            scan: Some(worker),
        })
    }
}

/// Walk `[begin, end]` newest first, handing each decoded record to `visit`
/// until it returns `false`.
fn scan(
    conn: &Connection,
    begin: DateTime<Utc>,
    end: DateTime<Utc>,
    mut visit: impl FnMut(ArchiveRecord) -> bool,
) -> Result<(), StorageError> {
    let mut stmt = conn.prepare(RANGE_SQL)?;
    let mut rows = stmt.query(params![archive_key(&begin), archive_key(&end)])?;
    while let Some(row) = rows.next()? {
        let key: String = row.get(0)?;
        let raw: String = row.get(1)?;
        let record = match serde_json::from_str::<ArchiveRecord>(&raw) {
            Ok(record) => record,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "Skipping undecodable archive record");
                continue;
            }
        };
        if !visit(record) {
            tracing::trace!(key = %key, "Archive scan stopped by consumer");
            break;
        }
    }
    Ok(())
}

/// Incremental archive range results, newest first.
///
/// Ends after the oldest matching record. Dropping it cancels the scan.
#[derive(Debug)]
pub struct RecordStream {
    rx: mpsc::Receiver<ArchiveRecord>,
    /// Scan thread; detached when the stream is dropped.
    scan: Option<JoinHandle<()>>,
}

impl RecordStream {
    /// Next record, or `None` once the range is exhausted.
    pub async fn next_record(&mut self) -> Option<ArchiveRecord> {
        self.rx.recv().await
    }

    /// True once the background scan has stopped producing records.
    ///
    /// Records it produced may still be buffered.
    pub fn scan_finished(&self) -> bool {
        self.scan.as_ref().is_none_or(|worker| worker.is_finished())
    }
}

impl Stream for RecordStream {
    type Item = ArchiveRecord;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

// =============================================================================
// Admin
// =============================================================================

/// Storage administration operations.
#[derive(Clone)]
pub struct StorageAdmin {
    tx: SyncSender<Command>,
}

impl std::fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdmin").finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(tx: SyncSender<Command>) -> Self {
        Self { tx }
    }

    /// Force WAL checkpoint.
    pub fn checkpoint(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Checkpoint)
            .map_err(|_| StorageError::ChannelSend)
    }

    /// Graceful shutdown.
    pub fn shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Shutdown)
            .map_err(|_| StorageError::ChannelSend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::StorageBuilder;
    use chrono::{Duration, TimeZone};
    use futures::StreamExt;
    use tempfile::{TempDir, tempdir};

    fn open() -> (crate::storage::StorageHandles, TempDir) {
        let dir = tempdir().unwrap();
        let handles = StorageBuilder::new(dir.path().join("archive.db"))
            .build()
            .unwrap();
        (handles, dir)
    }

    fn base() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap()
    }

    fn record_at(ts: DateTime<Utc>, out_temp: f64) -> ArchiveRecord {
        let mut record = ArchiveRecord::new(ts);
        record.out_temp = out_temp;
        record
    }

    async fn fill_hours(writer: &ArchiveWriter, hours: i64) {
        for h in 0..=hours {
            writer
                .add(record_at(base() + Duration::hours(h), h as f64))
                .await
                .unwrap();
        }
    }

    fn timestamps(records: &[ArchiveRecord]) -> Vec<DateTime<Utc>> {
        records.iter().map(|r| r.timestamp).collect()
    }

    #[tokio::test]
    async fn test_add_then_query_roundtrip() {
        let (handles, _dir) = open();
        let record = record_at(base(), 55.25);
        handles.writer.add(record.clone()).await.unwrap();

        let found = handles.reader.query(base(), base()).unwrap();
        assert_eq!(found, vec![record]);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_query_is_descending_and_inclusive() {
        let (handles, _dir) = open();
        fill_hours(&handles.writer, 4).await;

        let found = handles
            .reader
            .query(base() + Duration::hours(1), base() + Duration::hours(3))
            .unwrap();
        assert_eq!(
            timestamps(&found),
            vec![
                base() + Duration::hours(3),
                base() + Duration::hours(2),
                base() + Duration::hours(1),
            ]
        );
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_query_clamps_to_stored_keys() {
        let (handles, _dir) = open();
        fill_hours(&handles.writer, 4).await;

        // Bounds well outside what is stored.
        let all = handles
            .reader
            .query(base() - Duration::days(1), base() + Duration::days(1))
            .unwrap();
        assert_eq!(all.len(), 5);
        assert_eq!(all[0].timestamp, base() + Duration::hours(4));
        assert_eq!(all[4].timestamp, base());

        // Bounds between stored keys.
        let middle = handles
            .reader
            .query(
                base() + Duration::minutes(30),
                base() + Duration::minutes(150),
            )
            .unwrap();
        assert_eq!(
            timestamps(&middle),
            vec![base() + Duration::hours(2), base() + Duration::hours(1)]
        );

        // Entirely before the first key.
        let none = handles
            .reader
            .query(base() - Duration::days(2), base() - Duration::days(1))
            .unwrap();
        assert!(none.is_empty());
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_query_inverted_range_is_empty() {
        let (handles, _dir) = open();
        fill_hours(&handles.writer, 2).await;

        let found = handles
            .reader
            .query(base() + Duration::hours(2), base())
            .unwrap();
        assert!(found.is_empty());
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_add_is_upsert() {
        let (handles, _dir) = open();
        handles.writer.add(record_at(base(), 10.0)).await.unwrap();
        handles.writer.add(record_at(base(), 20.0)).await.unwrap();

        let found = handles.reader.query(base(), base()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].out_temp, 20.0);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_undecodable_rows_are_skipped() {
        let (handles, _dir) = open();
        fill_hours(&handles.writer, 2).await;

        let conn = handles.reader.pool.get().unwrap();
        conn.execute(
            "INSERT INTO archive (ts, record) VALUES (?, ?)",
            params![archive_key(&(base() + Duration::minutes(90))), "not json"],
        )
        .unwrap();

        let found = handles
            .reader
            .query(base(), base() + Duration::hours(2))
            .unwrap();
        assert_eq!(found.len(), 3);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_last_timestamp() {
        let (handles, _dir) = open();
        assert_eq!(handles.reader.last().unwrap(), None);

        fill_hours(&handles.writer, 3).await;
        assert_eq!(
            handles.reader.last().unwrap(),
            Some(base() + Duration::hours(3))
        );
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_stream_matches_query() {
        let (handles, _dir) = open();
        fill_hours(&handles.writer, 6).await;

        let begin = base() + Duration::hours(1);
        let end = base() + Duration::hours(5);
        let expected = handles.reader.query(begin, end).unwrap();
        let streamed: Vec<ArchiveRecord> =
            handles.reader.stream(begin, end).unwrap().collect().await;
        assert_eq!(streamed, expected);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_stream_can_be_abandoned() {
        let (handles, _dir) = open();
        let hours = STREAM_BUFFER as i64 * 3;
        fill_hours(&handles.writer, hours).await;

        let mut stream = handles
            .reader
            .stream(base(), base() + Duration::hours(hours))
            .unwrap();
        let first = stream.next_record().await.unwrap();
        assert_eq!(first.timestamp, base() + Duration::hours(hours));

        // The scan is parked on a full buffer; dropping the receiver must end it.
        let RecordStream { rx, scan } = stream;
        let scan = scan.expect("scan thread spawned");
        drop(rx);
        let joined = tokio::time::timeout(
            std::time::Duration::from_secs(5),
            tokio::task::spawn_blocking(move || scan.join()),
        )
        .await
        .expect("scan thread still running after the stream was dropped");
        assert!(joined.unwrap().is_ok());

        // Storage remains usable after the consumer walks away.
        assert_eq!(handles.reader.query(base(), base()).unwrap().len(), 1);
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_stream_inverted_range_ends_immediately() {
        let (handles, _dir) = open();
        fill_hours(&handles.writer, 1).await;

        let mut stream = handles
            .reader
            .stream(base() + Duration::hours(1), base())
            .unwrap();
        assert!(stream.scan_finished());
        assert!(stream.next_record().await.is_none());
        handles.shutdown().unwrap();
    }

    #[tokio::test]
    async fn test_add_after_shutdown_fails() {
        let (handles, _dir) = open();
        let writer = handles.writer.clone();
        handles.shutdown().unwrap();

        let err = writer.add(record_at(base(), 1.0)).await.unwrap_err();
        assert!(matches!(
            err,
            StorageError::ChannelSend | StorageError::Internal(_)
        ));
    }
}
