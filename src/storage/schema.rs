//! Database schema definitions.

use duckdb::Connection;

use crate::storage::StorageError;

/// SQL statement for creating the archive table.
///
/// `ts` is the archive key (RFC 3339 UTC, seconds precision) and `record` the
/// JSON-encoded record. The primary key makes re-adding a timestamp an upsert.
pub const ARCHIVE_TABLE_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS archive (
    ts     VARCHAR PRIMARY KEY,
    record VARCHAR NOT NULL
);
"#;

/// Initialize the database schema.
pub fn init_schema(conn: &Connection) -> Result<(), StorageError> {
    conn.execute_batch(ARCHIVE_TABLE_DDL)?;

    tracing::info!("Database schema initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        // Idempotent
        init_schema(&conn).unwrap();

        let count: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = 'archive'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_archive_upsert() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let upsert = "INSERT INTO archive (ts, record) VALUES (?, ?)
                      ON CONFLICT (ts) DO UPDATE SET record = EXCLUDED.record";
        conn.execute(upsert, ["2020-01-01T00:00:00Z", "first"])
            .unwrap();
        conn.execute(upsert, ["2020-01-01T00:00:00Z", "second"])
            .unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM archive", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        let record: String = conn
            .query_row("SELECT record FROM archive", [], |row| row.get(0))
            .unwrap();
        assert_eq!(record, "second");
    }
}
