//! Local analytics store retention.
//!
//! Grounded on a `LifestatsProcessor::run_retention_cleanup`-style pass:
//! time-bounded deletes in one transaction, best-effort and non-fatal on
//! failure. This crate adds a size-bounded half that a plain SQLite store
//! wouldn't need (time-only retention);
//! `max_size_gb` is checked against the database file's size on disk, since
//! `duckdb` has no `dbstat`-equivalent pragma this codebase can rely on.

use std::path::Path;
use std::time::Duration;

use duckdb::Connection;
use tracing::{debug, info, warn};

/// Bytes assumed per event when the store holds too few rows to estimate a
/// real average (a deliberate simplification).
const FALLBACK_BYTES_PER_EVENT: f64 = 1024.0;
/// Trim to 90% of the configured max so a cleanup isn't immediately re-triggered
/// by the next tick (a deliberate simplification).
const SIZE_TARGET_RATIO: f64 = 0.9;

#[derive(Debug, Default)]
pub struct RetentionReport {
    pub deleted_by_age: u64,
    pub deleted_by_size: u64,
    pub vacuumed: bool,
}

/// Run one retention pass: age-based delete, then size-based delete if the
/// database file still exceeds `max_size_gb`, then a best-effort `VACUUM`.
pub fn run_retention(
    conn: &Connection,
    db_path: &Path,
    retention_days: i64,
    max_size_gb: f64,
) -> RetentionReport {
    let mut report = RetentionReport::default();

    if retention_days > 0 {
        match delete_older_than(conn, retention_days) {
            Ok(deleted) => {
                report.deleted_by_age = deleted;
                if deleted > 0 {
                    info!(deleted, retention_days, "analytics retention: age-based cleanup");
                }
            }
            Err(e) => warn!("analytics retention age-based cleanup failed: {e}"),
        }
    }

    if max_size_gb > 0.0 {
        match delete_to_fit_size(conn, db_path, max_size_gb) {
            Ok(deleted) => {
                report.deleted_by_size = deleted;
                if deleted > 0 {
                    info!(deleted, max_size_gb, "analytics retention: size-based cleanup");
                }
            }
            Err(e) => warn!("analytics retention size-based cleanup failed: {e}"),
        }
    }

    if report.deleted_by_age > 0 || report.deleted_by_size > 0 {
        match conn.execute_batch("VACUUM") {
            Ok(()) => report.vacuumed = true,
            Err(e) => warn!("analytics VACUUM failed (non-fatal): {e}"),
        }
    }

    report
}

fn delete_older_than(conn: &Connection, retention_days: i64) -> Result<u64, duckdb::Error> {
    let cutoff = chrono::Utc::now() - chrono::Duration::days(retention_days);
    let cutoff_str = cutoff.to_rfc3339();
    let deleted = conn.execute(
        "DELETE FROM events WHERE timestamp < ?1",
        duckdb::params![cutoff_str],
    )?;
    Ok(deleted as u64)
}

fn delete_to_fit_size(
    conn: &Connection,
    db_path: &Path,
    max_size_gb: f64,
) -> Result<u64, duckdb::Error> {
    let max_bytes = max_size_gb * 1024.0 * 1024.0 * 1024.0;
    let current_bytes = std::fs::metadata(db_path).map(|m| m.len()).unwrap_or(0) as f64;

    if current_bytes <= max_bytes {
        return Ok(0);
    }

    let row_count: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))?;
    if row_count == 0 {
        return Ok(0);
    }

    let bytes_per_event = if row_count > 0 {
        (current_bytes / row_count as f64).max(1.0)
    } else {
        FALLBACK_BYTES_PER_EVENT
    };

    let target_bytes = max_bytes * SIZE_TARGET_RATIO;
    let overage_bytes = (current_bytes - target_bytes).max(0.0);
    let rows_to_delete = (overage_bytes / bytes_per_event).ceil() as i64;
    let rows_to_delete = rows_to_delete.min(row_count);

    if rows_to_delete <= 0 {
        return Ok(0);
    }

    debug!(
        rows_to_delete,
        bytes_per_event, current_bytes, max_bytes, "analytics retention: trimming oldest events"
    );

    let deleted = conn.execute(
        "DELETE FROM events WHERE event_id IN (
            SELECT event_id FROM events ORDER BY timestamp ASC LIMIT ?1
        )",
        duckdb::params![rows_to_delete],
    )?;
    Ok(deleted as u64)
}

/// How often the writer thread should run a retention pass.
pub const RETENTION_INTERVAL: Duration = Duration::from_secs(24 * 3600);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Event, Level};

    fn temp_db() -> (std::path::PathBuf, Connection) {
        let mut path = std::env::temp_dir();
        path.push(format!("sidecar-retention-test-{}.db", uuid::Uuid::new_v4()));
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE events (
                event_id TEXT PRIMARY KEY,
                organization_id TEXT, service_name TEXT, environment TEXT,
                event_type TEXT, timestamp TEXT, received_at TEXT, tags_json TEXT,
                level TEXT, message TEXT, stacktrace TEXT,
                trace_id TEXT, span_id TEXT, parent_span_id TEXT, operation TEXT,
                duration_ms DOUBLE, status_code USMALLINT,
                metric_name TEXT, metric_value DOUBLE
            )",
        )
        .unwrap();
        (path, conn)
    }

    fn insert_with_timestamp(conn: &Connection, ts: chrono::DateTime<chrono::Utc>) {
        let mut event = Event::new_log("svc", "prod", Level::Info, "x");
        event.header.timestamp = ts;
        conn.execute(
            "INSERT INTO events (event_id, organization_id, service_name, environment, event_type, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            duckdb::params![
                event.header.event_id.to_string(),
                event.header.organization_id,
                event.header.service_name,
                event.header.environment,
                "log",
                ts.to_rfc3339(),
            ],
        )
        .unwrap();
    }

    #[test]
    fn age_based_cleanup_deletes_only_old_rows() {
        let (path, conn) = temp_db();
        insert_with_timestamp(&conn, chrono::Utc::now() - chrono::Duration::days(10));
        insert_with_timestamp(&conn, chrono::Utc::now());

        let report = run_retention(&conn, &path, 5, 0.0);
        assert_eq!(report.deleted_by_age, 1);

        let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0)).unwrap();
        assert_eq!(remaining, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn retention_disabled_when_non_positive() {
        let (path, conn) = temp_db();
        insert_with_timestamp(&conn, chrono::Utc::now() - chrono::Duration::days(1000));
        let report = run_retention(&conn, &path, 0, 0.0);
        assert_eq!(report.deleted_by_age, 0);
        let remaining: i64 = conn.query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0)).unwrap();
        assert_eq!(remaining, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn size_based_cleanup_is_a_no_op_under_the_cap() {
        let (path, conn) = temp_db();
        insert_with_timestamp(&conn, chrono::Utc::now());
        let report = run_retention(&conn, &path, 0, 1000.0);
        assert_eq!(report.deleted_by_size, 0);
        let _ = std::fs::remove_file(&path);
    }
}
