//! Reader connections.
//!
//! Readers get their own connection cloned from one that shares the writer's
//! database instance, so committed archive writes are visible immediately.

use std::sync::{Arc, Mutex, PoisonError};

use duckdb::Connection;

use crate::storage::StorageError;

/// Source of read connections.
pub struct ReadPool {
    base: Mutex<Connection>,
}

impl ReadPool {
    /// Create a read pool from a connection to the writer's database.
    ///
    /// Schema is expected to be initialized by the writer actor before this is called.
    pub fn new(conn: Connection) -> Arc<Self> {
        Arc::new(Self {
            base: Mutex::new(conn),
        })
    }

    /// Get a fresh connection for one read operation.
    pub fn get(&self) -> Result<Connection, StorageError> {
        let base = self.base.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(base.try_clone()?)
    }
}

impl std::fmt::Debug for ReadPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadPool").finish_non_exhaustive()
    }
}
