//! Archive key encoding.
//!
//! Keys are RFC 3339 timestamps in UTC with whole seconds and a `Z` suffix,
//! e.g. `2020-01-01T00:00:00Z`. Fixed width makes byte order equal to
//! chronological order, so range scans are plain key comparisons.

use chrono::{DateTime, SecondsFormat, Utc};

use crate::storage::StorageError;

/// Render a timestamp as an archive key.
pub fn archive_key(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Parse an archive key back into a timestamp.
pub fn parse_archive_key(key: &str) -> Result<DateTime<Utc>, StorageError> {
    DateTime::parse_from_rfc3339(key)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StorageError::InvalidData(format!("archive key '{key}': {e}")))
}
