//! JSON line parser. Field-name fallback chains pick level,
//! message, timestamp and stacktrace out of whatever shape the object has;
//! everything left over becomes a tag.

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

use crate::event::{Event, Level};

use super::ParserContext;

const LEVEL_KEYS: &[&str] = &["level", "severity", "log_level"];
const MESSAGE_KEYS: &[&str] = &["message", "msg", "text", "log"];
const TIMESTAMP_KEYS: &[&str] = &["timestamp", "time", "@timestamp", "ts"];
const STACKTRACE_KEYS: &[&str] = &["stacktrace", "stack_trace", "stack", "trace"];

const TIMESTAMP_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S"];

fn take_str(obj: &serde_json::Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Some(Value::String(s)) = obj.get(*key) {
            return Some(s.clone());
        }
    }
    None
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in TIMESTAMP_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

/// Coerce a non-string JSON value to its tag string form: numbers use their
/// shortest decimal representation, bools render as `"true"`/`"false"`.
fn coerce_tag_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null => None,
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

/// Parse an already-decoded JSON object into an [`Event`]. Exposed so the
/// docker parser can delegate after unwrapping its envelope.
pub fn parse_object(obj: serde_json::Map<String, Value>, ctx: &ParserContext) -> Event {
    let level = take_str(&obj, LEVEL_KEYS)
        .map(|s| Level::from_alias(&s))
        .unwrap_or(Level::Info);
    let message = take_str(&obj, MESSAGE_KEYS).unwrap_or_default();
    let stacktrace = take_str(&obj, STACKTRACE_KEYS);
    let timestamp = take_str(&obj, TIMESTAMP_KEYS).and_then(|s| parse_timestamp(&s));

    let mut event = Event::new_log(&ctx.service_name, &ctx.environment, level, message);
    if let Some(ts) = timestamp {
        event.header.timestamp = ts;
    }
    if let Some(st) = stacktrace {
        event.attach_stacktrace(st);
    }

    let consumed: std::collections::HashSet<&str> = LEVEL_KEYS
        .iter()
        .chain(MESSAGE_KEYS)
        .chain(TIMESTAMP_KEYS)
        .chain(STACKTRACE_KEYS)
        .copied()
        .collect();
    for (key, value) in obj.iter() {
        if consumed.contains(key.as_str()) {
            continue;
        }
        if let Some(tag_value) = coerce_tag_value(value) {
            event.header.tags.insert(key.clone(), tag_value);
        }
    }

    event
}

/// Parse one line as JSON; non-JSON input falls back to a generic log event.
pub fn parse(line: &str, ctx: &ParserContext) -> Event {
    match serde_json::from_str::<Value>(line) {
        Ok(Value::Object(obj)) => parse_object(obj, ctx),
        _ => super::generic::parse(line, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;
    use crate::parsers::test_ctx;

    #[test]
    fn extracts_level_message_and_extra_tags() {
        let line = r#"{"level":"error","message":"boom","request_id":"abc","retries":3,"ok":false}"#;
        let ev = parse(line, &test_ctx());
        if let EventBody::Log { level, message, .. } = &ev.body {
            assert_eq!(*level, Level::Error);
            assert_eq!(message, "boom");
        } else {
            panic!("expected log body");
        }
        assert_eq!(ev.header.tags.get("request_id").unwrap(), "abc");
        assert_eq!(ev.header.tags.get("retries").unwrap(), "3");
        assert_eq!(ev.header.tags.get("ok").unwrap(), "false");
    }

    #[test]
    fn falls_back_to_alternate_field_names() {
        let line = r#"{"severity":"warn","msg":"careful","@timestamp":"2024-10-26T10:30:15Z"}"#;
        let ev = parse(line, &test_ctx());
        if let EventBody::Log { level, message, .. } = &ev.body {
            assert_eq!(*level, Level::Warning);
            assert_eq!(message, "careful");
        } else {
            panic!("expected log body");
        }
    }

    #[test]
    fn non_json_falls_back_to_generic() {
        let ev = parse("not json at all", &test_ctx());
        if let EventBody::Log { level, message, .. } = &ev.body {
            assert_eq!(*level, Level::Info);
            assert_eq!(message, "not json at all");
        } else {
            panic!("expected log body");
        }
    }
}
