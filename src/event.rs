//! The normalized event model.
//!
//! The source system models events as an open string-keyed map; this crate
//! uses the closed, tagged representation suggested by the design notes
//!: one header shared by every event plus a body variant per
//! `event_type`. Unknown/extra fields a parser wants to carry are pushed into
//! `header.tags` rather than living on an untyped map.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::util::{truncate_with_marker, TRUNCATION_MARKER};

/// Cap on `message`/`stacktrace`, in bytes, before truncation with a marker.
pub const MAX_MESSAGE_BYTES: usize = 100 * 1024;
pub const MAX_STACKTRACE_BYTES: usize = 50 * 1024;

/// Log level, `log` events only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl Level {
    /// Map a raw level string (as seen in log lines) to a canonical [`Level`].
    /// Unknown strings default to `Info`, matching every line parser.
    pub fn from_alias(raw: &str) -> Level {
        match raw.to_ascii_lowercase().as_str() {
            "debug" => Level::Debug,
            "info" | "information" => Level::Info,
            "warn" | "warning" => Level::Warning,
            "error" | "err" => Level::Error,
            "fatal" | "critical" => Level::Critical,
            _ => Level::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warning => "warning",
            Level::Error => "error",
            Level::Critical => "critical",
        }
    }
}

/// Discriminant mirrored onto the wire/table `event_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Log,
    Span,
    Metric,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Log => "log",
            EventType::Span => "span",
            EventType::Metric => "metric",
        }
    }
}

/// Fields shared by every event, regardless of body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHeader {
    pub organization_id: String,
    pub service_name: String,
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// Set by forwarder normalization; absent until then.
    pub received_at: Option<DateTime<Utc>>,
    pub environment: String,
    pub tags: HashMap<String, String>,
}

impl EventHeader {
    pub fn new(service_name: impl Into<String>, environment: impl Into<String>) -> Self {
        Self {
            organization_id: "local".to_string(),
            service_name: service_name.into(),
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            received_at: None,
            environment: environment.into(),
            tags: HashMap::new(),
        }
    }
}

/// The type-specific payload: one field group per `event_type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "lowercase")]
pub enum EventBody {
    Log {
        level: Level,
        message: String,
        stacktrace: Option<String>,
    },
    Span {
        trace_id: String,
        span_id: String,
        parent_span_id: Option<String>,
        operation: String,
        duration_ms: f64,
        status_code: Option<u16>,
    },
    Metric {
        metric_name: String,
        metric_value: f64,
    },
}

impl EventBody {
    pub fn event_type(&self) -> EventType {
        match self {
            EventBody::Log { .. } => EventType::Log,
            EventBody::Span { .. } => EventType::Span,
            EventBody::Metric { .. } => EventType::Metric,
        }
    }
}

/// A single normalized telemetry record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    #[serde(flatten)]
    pub header: EventHeader,
    #[serde(flatten)]
    pub body: EventBody,
}

impl Event {
    pub fn new_log(
        service_name: impl Into<String>,
        environment: impl Into<String>,
        level: Level,
        message: impl Into<String>,
    ) -> Self {
        Self {
            header: EventHeader::new(service_name, environment),
            body: EventBody::Log {
                level,
                message: message.into(),
                stacktrace: None,
            },
        }
    }

    pub fn new_span(
        service_name: impl Into<String>,
        environment: impl Into<String>,
        operation: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self {
            header: EventHeader::new(service_name, environment),
            body: EventBody::Span {
                trace_id: Uuid::new_v4().to_string(),
                span_id: Uuid::new_v4().to_string(),
                parent_span_id: None,
                operation: operation.into(),
                duration_ms: 0.0,
                status_code,
            },
        }
    }

    pub fn event_type(&self) -> EventType {
        self.body.event_type()
    }

    /// Apply size caps to `message`/`stacktrace`, appending [`TRUNCATION_MARKER`]
    /// when a field was cut. A no-op for span/metric events.
    pub fn enforce_size_caps(&mut self) {
        if let EventBody::Log {
            message,
            stacktrace,
            ..
        } = &mut self.body
        {
            if message.len() > MAX_MESSAGE_BYTES {
                *message = truncate_with_marker(message, MAX_MESSAGE_BYTES);
            }
            if let Some(st) = stacktrace {
                if st.len() > MAX_STACKTRACE_BYTES {
                    *st = truncate_with_marker(st, MAX_STACKTRACE_BYTES);
                }
            }
        }
    }

    /// Attach a stacktrace to a log event (no-op for span/metric). Used by
    /// [`crate::producers::log_tailer`]'s multi-line traceback capture.
    pub fn attach_stacktrace(&mut self, trace: String) {
        if let EventBody::Log { stacktrace, .. } = &mut self.body {
            *stacktrace = Some(trace);
        }
    }

    /// Enforce the forwarder normalization invariants: non-empty
    /// `service_name`, `received_at` set, size caps applied.
    /// `event_id`/`timestamp`/`event_type`/`tags` are enforced structurally by
    /// this crate's closed `Event` type and never need runtime validation.
    ///
    /// Idempotent: calling this twice on an already-valid event is a no-op
    /// beyond re-truncating already-truncated strings.
    pub fn normalize(&mut self) -> Result<(), crate::error::ForwarderError> {
        if self.header.service_name.trim().is_empty() {
            return Err(crate::error::ForwarderError::InvalidEvent(
                "service_name must be non-empty".to_string(),
            ));
        }
        if self.header.received_at.is_none() {
            self.header.received_at = Some(Utc::now());
        }
        self.enforce_size_caps();
        Ok(())
    }

    pub fn is_error_or_critical(&self) -> bool {
        matches!(
            &self.body,
            EventBody::Log {
                level: Level::Error | Level::Critical,
                ..
            }
        )
    }
}

/// Marker string confirming the truncation helper is wired to the right constant.
#[allow(dead_code)]
const _: &str = TRUNCATION_MARKER;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_aliases_map_as_specified() {
        assert_eq!(Level::from_alias("warn"), Level::Warning);
        assert_eq!(Level::from_alias("WARNING"), Level::Warning);
        assert_eq!(Level::from_alias("err"), Level::Error);
        assert_eq!(Level::from_alias("fatal"), Level::Critical);
        assert_eq!(Level::from_alias("whatever"), Level::Info);
    }

    #[test]
    fn size_caps_append_marker() {
        let mut e = Event::new_log("svc", "prod", Level::Error, "x".repeat(200_000));
        e.enforce_size_caps();
        if let EventBody::Log { message, .. } = &e.body {
            assert!(message.len() <= MAX_MESSAGE_BYTES);
            assert!(message.ends_with("...[TRUNCATED]"));
        } else {
            panic!("expected log body");
        }
    }

    #[test]
    fn normalize_rejects_empty_service_name() {
        let mut e = Event::new_log("", "prod", Level::Info, "x");
        assert!(e.normalize().is_err());
    }

    #[test]
    fn normalize_is_idempotent() {
        let mut e = Event::new_log("svc", "prod", Level::Info, "x");
        e.normalize().unwrap();
        let first_received_at = e.header.received_at;
        e.normalize().unwrap();
        assert_eq!(e.header.received_at, first_received_at);
    }

    #[test]
    fn short_fields_untouched() {
        let mut e = Event::new_log("svc", "prod", Level::Info, "short message");
        e.enforce_size_caps();
        if let EventBody::Log { message, .. } = &e.body {
            assert_eq!(message, "short message");
        } else {
            panic!("expected log body");
        }
    }
}
