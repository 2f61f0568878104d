//! Writer actor with dedicated connection and MPSC channel.
//!
//! Single-writer pattern: one thread owns the write connection and applies
//! commands in arrival order, so archive upserts never race each other.
//! Each add replies with its commit result.

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use duckdb::{Connection, params};
use tokio::sync::oneshot;

use crate::station::types::ArchiveRecord;
use crate::storage::StorageError;
use crate::storage::schema::init_schema;
use crate::storage::types::archive_key;

/// Path that opens an in-memory database.
pub const MEMORY_PATH: &str = ":memory:";

const UPSERT_SQL: &str = "INSERT INTO archive (ts, record) VALUES (?, ?)
     ON CONFLICT (ts) DO UPDATE SET record = EXCLUDED.record";

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Upsert an archive record and report the commit result.
    Add {
        record: ArchiveRecord,
        reply: oneshot::Sender<Result<(), StorageError>>,
    },
    /// Force WAL checkpoint.
    Checkpoint,
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Actor
// =============================================================================

/// Database writer actor.
pub struct DbActor {
    conn: Connection,
    rx: Receiver<Command>,
    last_checkpoint: Instant,
    checkpoint_interval: Duration,
}

impl DbActor {
    /// Spawn the writer actor thread.
    ///
    /// Returns a tuple of:
    /// - `JoinHandle<()>`: Handle to the actor thread
    /// - `SyncSender<Command>`: Channel sender for commands
    /// - `Connection`: A connection to the same database for building reader connections
    pub fn spawn(
        db_path: &Path,
        channel_capacity: usize,
        checkpoint_interval: Duration,
    ) -> Result<(JoinHandle<()>, SyncSender<Command>, Connection), StorageError> {
        let (tx, rx) = mpsc::sync_channel(channel_capacity);
        let conn = if db_path == Path::new(MEMORY_PATH) {
            Connection::open_in_memory()?
        } else {
            Connection::open(db_path)?
        };
        init_schema(&conn)?;

        // Clones share the same database instance, so readers see committed
        // writes without waiting for a checkpoint.
        let reader_conn = conn.try_clone()?;

        let mut actor = DbActor {
            conn,
            rx,
            last_checkpoint: Instant::now(),
            checkpoint_interval,
        };
        let handle = thread::Builder::new()
            .name("archive-writer".to_string())
            .spawn(move || actor.run())
            .map_err(|e| StorageError::Internal(format!("failed to spawn writer thread: {e}")))?;

        Ok((handle, tx, reader_conn))
    }

    fn run(&mut self) {
        tracing::info!("DbActor started");

        loop {
            let deadline = self.last_checkpoint + self.checkpoint_interval;
            let timeout = deadline.saturating_duration_since(Instant::now());

            match self.rx.recv_timeout(timeout) {
                Ok(cmd) => {
                    if self.handle_command(cmd) {
                        break; // Shutdown requested
                    }
                }
                Err(RecvTimeoutError::Timeout) => {
                    // Checkpoint overdue
                }
                Err(RecvTimeoutError::Disconnected) => {
                    tracing::warn!("Channel disconnected, shutting down");
                    let _ = self.checkpoint();
                    break;
                }
            }

            if self.last_checkpoint.elapsed() >= self.checkpoint_interval {
                if let Err(e) = self.checkpoint() {
                    tracing::error!(error = %e, "Periodic checkpoint failed");
                }
                self.last_checkpoint = Instant::now();
            }
        }

        tracing::info!("DbActor stopped");
    }

    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::Add { record, reply } => {
                let result = self.upsert(&record);
                if let Err(e) = &result {
                    tracing::debug!(error = %e, timestamp = %record.timestamp, "Archive upsert failed");
                }
                // The caller may have given up waiting; the write stands either way.
                let _ = reply.send(result);
            }
            Command::Checkpoint => {
                if let Err(e) = self.checkpoint() {
                    tracing::error!(error = %e, "Checkpoint failed");
                }
            }
            Command::Shutdown => {
                tracing::info!("DbActor shutting down");
                let _ = self.checkpoint();
                return true;
            }
        }
        false
    }

    /// Upsert one record in its own transaction.
    fn upsert(&mut self, record: &ArchiveRecord) -> Result<(), StorageError> {
        let key = archive_key(&record.timestamp);
        let encoded = serde_json::to_string(record)?;

        let tx = self.conn.transaction()?;
        tx.execute(UPSERT_SQL, params![key, encoded])?;
        tx.commit()?;

        tracing::trace!(key = %key, "Archive record stored");
        Ok(())
    }

    fn checkpoint(&self) -> Result<(), StorageError> {
        self.conn.execute_batch("CHECKPOINT;")?;
        tracing::trace!("WAL checkpoint completed");
        Ok(())
    }
}
