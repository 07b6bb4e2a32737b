//! Embedded local analytical store.
//!
//! The direct model is a `pipeline::lifestats`-style processor: a
//! dedicated writer thread (not a tokio task -- the database handle is not
//! `Sync`) fed by a bounded channel, batching inserts into one transaction,
//! with a `metadata`/schema-version table driving incremental migrations.
//! This crate swaps `rusqlite` for `duckdb` (recorded in DESIGN.md) to get a
//! columnar local store; `duckdb`'s Rust API mirrors `rusqlite`'s closely
//! enough that the connection/transaction/migration shape here translates
//! almost directly.

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use duckdb::{params, Connection};
use tracing::{debug, error, info, warn};

use crate::error::AnalyticsError;
use crate::event::{Event, EventBody};
use crate::retention::{self, RETENTION_INTERVAL};

/// Channel depth before `write()` starts dropping whole batches: writes are
/// non-blocking, so a full channel drops the batch and counts it.
const CHANNEL_DEPTH: usize = 10;
const FLUSH_INTERVAL: Duration = Duration::from_secs(1);
const BATCH_SIZE: usize = 500;
const MAX_WRITE_ATTEMPTS: u32 = 3;
const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct AnalyticsWriterConfig {
    pub database_path: PathBuf,
    /// `<= 0` disables age-based retention.
    pub retention_days: i64,
    /// `<= 0` disables size-based retention.
    pub max_size_gb: f64,
}

/// Counters exposed through [`crate::diagnostics::Diagnostics`] / the health
/// endpoint.
#[derive(Debug, Default)]
pub struct AnalyticsCounters {
    pub total_written: AtomicU64,
    pub total_dropped: AtomicU64,
    pub queue_depth: AtomicU64,
    last_write_time_nanos: AtomicU64,
}

impl AnalyticsCounters {
    pub fn total_written(&self) -> u64 {
        self.total_written.load(Ordering::Relaxed)
    }

    pub fn total_dropped(&self) -> u64 {
        self.total_dropped.load(Ordering::Relaxed)
    }

    pub fn queue_depth(&self) -> u64 {
        self.queue_depth.load(Ordering::Relaxed)
    }

    /// Seconds since the Unix epoch of the last successful batch write, if any.
    pub fn last_write_time(&self) -> Option<u64> {
        match self.last_write_time_nanos.load(Ordering::Relaxed) {
            0 => None,
            nanos => Some(nanos / 1_000_000_000),
        }
    }

    fn record_write_time(&self) {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default();
        self.last_write_time_nanos
            .store(now.as_nanos() as u64, Ordering::Relaxed);
    }
}

enum WriterCommand {
    Write(Vec<Event>),
    Shutdown,
}

/// Non-blocking writer to the embedded analytical store.
pub struct AnalyticsWriter {
    tx: SyncSender<WriterCommand>,
    handle: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<AnalyticsCounters>,
}

impl AnalyticsWriter {
    /// Opens (creating if needed) the database, runs pending migrations, and
    /// spawns the dedicated writer thread.
    pub fn open(config: AnalyticsWriterConfig) -> Result<Self, AnalyticsError> {
        if let Some(parent) = config.database_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AnalyticsError::Database(e.to_string()))?;
        }

        let (tx, rx) = mpsc::sync_channel::<WriterCommand>(CHANNEL_DEPTH);
        let counters = Arc::new(AnalyticsCounters::default());
        let thread_counters = counters.clone();
        let db_path = config.database_path.clone();
        let retention_days = config.retention_days;
        let max_size_gb = config.max_size_gb;

        let handle = thread::Builder::new()
            .name("analytics-writer".into())
            .spawn(move || {
                if let Err(e) =
                    writer_thread(rx, &db_path, thread_counters, retention_days, max_size_gb)
                {
                    error!("analytics writer thread exited with error: {e}");
                }
            })
            .map_err(|e| AnalyticsError::Database(e.to_string()))?;

        Ok(Self {
            tx,
            handle: Mutex::new(Some(handle)),
            counters,
        })
    }

    pub fn counters(&self) -> &AnalyticsCounters {
        &self.counters
    }

    /// Enqueue a batch for writing. Non-blocking: if the channel is full the
    /// whole batch is dropped and counted, never partially written.
    pub fn write(&self, events: Vec<Event>) -> Result<(), AnalyticsError> {
        if events.is_empty() {
            return Ok(());
        }
        let len = events.len() as u64;
        match self.tx.try_send(WriterCommand::Write(events)) {
            Ok(()) => {
                self.counters.queue_depth.fetch_add(1, Ordering::Relaxed);
                Ok(())
            }
            Err(mpsc::TrySendError::Full(_)) => {
                self.counters
                    .total_dropped
                    .fetch_add(len, Ordering::Relaxed);
                warn!(dropped = len, "analytics write queue full, batch dropped");
                Err(AnalyticsError::QueueFull)
            }
            Err(mpsc::TrySendError::Disconnected(_)) => {
                Err(AnalyticsError::ConnectionClosed)
            }
        }
    }

    /// Drains in-flight work and closes the connection. Best-effort: the
    /// final flush is attempted but shutdown proceeds regardless.
    pub fn close(&self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            if handle.join().is_err() {
                error!("analytics writer thread panicked during shutdown");
            }
        }
    }
}

impl Drop for AnalyticsWriter {
    fn drop(&mut self) {
        let _ = self.tx.send(WriterCommand::Shutdown);
        if let Some(handle) = self.handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

fn writer_thread(
    rx: mpsc::Receiver<WriterCommand>,
    db_path: &std::path::Path,
    counters: Arc<AnalyticsCounters>,
    retention_days: i64,
    max_size_gb: f64,
) -> Result<(), AnalyticsError> {
    let conn = Connection::open(db_path).map_err(|e| AnalyticsError::Database(e.to_string()))?;
    init_schema(&conn)?;

    // Run once at startup, then on RETENTION_INTERVAL, mirroring the same
    // lifestats writer's CLEANUP_INTERVAL tracking.
    let mut last_retention = Instant::now() - RETENTION_INTERVAL;
    let mut batch: Vec<Event> = Vec::with_capacity(BATCH_SIZE);
    let mut last_flush = Instant::now();

    loop {
        match rx.recv_timeout(FLUSH_INTERVAL) {
            Ok(WriterCommand::Write(events)) => {
                counters.queue_depth.fetch_sub(1, Ordering::Relaxed);
                batch.extend(events);
                if batch.len() >= BATCH_SIZE {
                    flush_batch(&conn, &mut batch, &counters);
                    last_flush = Instant::now();
                }
            }
            Ok(WriterCommand::Shutdown) => {
                if !batch.is_empty() {
                    flush_batch(&conn, &mut batch, &counters);
                }
                debug!("analytics writer thread shutting down");
                break;
            }
            Err(RecvTimeoutError::Timeout) => {
                if !batch.is_empty() && last_flush.elapsed() >= FLUSH_INTERVAL {
                    flush_batch(&conn, &mut batch, &counters);
                    last_flush = Instant::now();
                }
                if last_retention.elapsed() >= RETENTION_INTERVAL {
                    retention::run_retention(&conn, db_path, retention_days, max_size_gb);
                    last_retention = Instant::now();
                }
            }
            Err(RecvTimeoutError::Disconnected) => {
                if !batch.is_empty() {
                    flush_batch(&conn, &mut batch, &counters);
                }
                break;
            }
        }
    }

    Ok(())
}

/// Insert `batch` in one transaction, retrying up to [`MAX_WRITE_ATTEMPTS`]
/// times with doubling backoff. A connection-closed failure is terminal and
/// the batch is counted as dropped rather than retried forever.
fn flush_batch(conn: &Connection, batch: &mut Vec<Event>, counters: &AnalyticsCounters) {
    if batch.is_empty() {
        return;
    }
    let count = batch.len() as u64;
    let mut delay = RETRY_BASE_DELAY;

    for attempt in 1..=MAX_WRITE_ATTEMPTS {
        match insert_batch(conn, batch) {
            Ok(()) => {
                counters.total_written.fetch_add(count, Ordering::Relaxed);
                counters.record_write_time();
                batch.clear();
                return;
            }
            Err(e) if is_connection_closed(&e) => {
                error!("analytics connection closed, dropping batch of {count}: {e}");
                counters.total_dropped.fetch_add(count, Ordering::Relaxed);
                batch.clear();
                return;
            }
            Err(e) if attempt < MAX_WRITE_ATTEMPTS => {
                warn!(attempt, "analytics batch write failed, retrying: {e}");
                thread::sleep(delay);
                delay *= 2;
            }
            Err(e) => {
                error!("analytics batch write failed after {MAX_WRITE_ATTEMPTS} attempts, dropping {count}: {e}");
                counters.total_dropped.fetch_add(count, Ordering::Relaxed);
                batch.clear();
            }
        }
    }
}

fn is_connection_closed(err: &duckdb::Error) -> bool {
    matches!(err, duckdb::Error::ConnectionClosed) || err.to_string().contains("closed")
}

fn insert_batch(conn: &Connection, batch: &[Event]) -> Result<(), duckdb::Error> {
    let tx = conn.unchecked_transaction()?;
    {
        let mut stmt = tx.prepare(INSERT_SQL)?;
        for event in batch {
            bind_event(&mut stmt, event)?;
        }
    }
    tx.commit()?;
    Ok(())
}

const INSERT_SQL: &str = r#"
INSERT INTO events (
    event_id, organization_id, service_name, environment, event_type,
    timestamp, received_at, tags_json,
    level, message, stacktrace,
    trace_id, span_id, parent_span_id, operation, duration_ms, status_code,
    metric_name, metric_value
) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)
"#;

fn bind_event(stmt: &mut duckdb::Statement<'_>, event: &Event) -> Result<(), duckdb::Error> {
    let tags_json = serde_json::to_string(&event.header.tags).unwrap_or_default();
    let received_at = event.header.received_at.map(|t| t.to_rfc3339());

    let (level, message, stacktrace, trace_id, span_id, parent_span_id, operation, duration_ms,
        status_code, metric_name, metric_value): (
        Option<&str>,
        Option<&str>,
        Option<&str>,
        Option<&str>,
        Option<&str>,
        Option<&str>,
        Option<&str>,
        Option<f64>,
        Option<u16>,
        Option<&str>,
        Option<f64>,
    ) = match &event.body {
        EventBody::Log {
            level,
            message,
            stacktrace,
        } => (
            Some(level.as_str()),
            Some(message.as_str()),
            stacktrace.as_deref(),
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            None,
        ),
        EventBody::Span {
            trace_id,
            span_id,
            parent_span_id,
            operation,
            duration_ms,
            status_code,
        } => (
            None,
            None,
            None,
            Some(trace_id.as_str()),
            Some(span_id.as_str()),
            parent_span_id.as_deref(),
            Some(operation.as_str()),
            Some(*duration_ms),
            *status_code,
            None,
            None,
        ),
        EventBody::Metric {
            metric_name,
            metric_value,
        } => (
            None, None, None, None, None, None, None, None, None,
            Some(metric_name.as_str()),
            Some(*metric_value),
        ),
    };

    stmt.execute(params![
        event.header.event_id.to_string(),
        event.header.organization_id,
        event.header.service_name,
        event.header.environment,
        event.event_type().as_str(),
        event.header.timestamp.to_rfc3339(),
        received_at,
        tags_json,
        level,
        message,
        stacktrace,
        trace_id,
        span_id,
        parent_span_id,
        operation,
        duration_ms,
        status_code,
        metric_name,
        metric_value,
    ])?;
    Ok(())
}

fn init_schema(conn: &Connection) -> Result<(), AnalyticsError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER NOT NULL
        );
        "#,
    )
    .map_err(|e| AnalyticsError::Database(e.to_string()))?;

    let current: i64 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |r| {
            r.get(0)
        })
        .unwrap_or(0);

    if current < 1 {
        apply_schema_v1(conn)?;
    }

    Ok(())
}

fn apply_schema_v1(conn: &Connection) -> Result<(), AnalyticsError> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS events (
            event_id TEXT PRIMARY KEY,
            organization_id TEXT NOT NULL,
            service_name TEXT NOT NULL,
            environment TEXT NOT NULL,
            event_type TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            received_at TEXT,
            tags_json TEXT,
            level TEXT,
            message TEXT,
            stacktrace TEXT,
            trace_id TEXT,
            span_id TEXT,
            parent_span_id TEXT,
            operation TEXT,
            duration_ms DOUBLE,
            status_code USMALLINT,
            metric_name TEXT,
            metric_value DOUBLE
        );
        CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
        CREATE INDEX IF NOT EXISTS idx_events_service ON events(service_name);
        CREATE INDEX IF NOT EXISTS idx_events_type ON events(event_type);
        "#,
    )
    .map_err(|e| AnalyticsError::Database(e.to_string()))?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])
        .map_err(|e| AnalyticsError::Database(e.to_string()))?;

    info!("analytics database schema initialized at v1");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventHeader, Level};
    use std::thread::sleep;

    fn temp_path() -> PathBuf {
        let mut p = std::env::temp_dir();
        p.push(format!("sidecar-analytics-test-{}.db", uuid::Uuid::new_v4()));
        p
    }

    #[test]
    fn open_creates_schema_and_accepts_writes() {
        let path = temp_path();
        let writer = AnalyticsWriter::open(AnalyticsWriterConfig {
            database_path: path.clone(),
            retention_days: 14,
            max_size_gb: 2.0,
        })
        .unwrap();

        let mut log = Event::new_log("svc", "prod", Level::Info, "hello");
        log.normalize().unwrap();
        writer.write(vec![log]).unwrap();

        // give the writer thread time to flush on the 1s timeout path
        sleep(Duration::from_millis(1200));
        writer.close();

        let conn = Connection::open(&path).unwrap();
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM events", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn metric_event_round_trips_through_schema() {
        let path = temp_path();
        let writer = AnalyticsWriter::open(AnalyticsWriterConfig {
            database_path: path.clone(),
            retention_days: 14,
            max_size_gb: 2.0,
        })
        .unwrap();

        let metric = Event {
            header: EventHeader::new("svc", "prod"),
            body: EventBody::Metric {
                metric_name: "cpu.pct".to_string(),
                metric_value: 42.5,
            },
        };
        writer.write(vec![metric]).unwrap();
        sleep(Duration::from_millis(1200));
        writer.close();

        let conn = Connection::open(&path).unwrap();
        let value: f64 = conn
            .query_row(
                "SELECT metric_value FROM events WHERE metric_name = 'cpu.pct'",
                [],
                |r| r.get(0),
            )
            .unwrap();
        assert!((value - 42.5).abs() < f64::EPSILON);
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn empty_write_is_a_no_op() {
        let path = temp_path();
        let writer = AnalyticsWriter::open(AnalyticsWriterConfig {
            database_path: path.clone(),
            retention_days: 14,
            max_size_gb: 2.0,
        })
        .unwrap();
        writer.write(vec![]).unwrap();
        assert_eq!(writer.counters().total_written(), 0);
        writer.close();
        let _ = std::fs::remove_file(&path);
    }
}
