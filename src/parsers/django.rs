//! Django-style log line parser.
//!
//! Format: `[TS] LEVEL [LOGGER] MSG`. Non-matching lines still produce a
//! generic `log` event carrying the raw line, rather than `None` -- this is
//! the one format that never drops a line.

use std::sync::LazyLock;

use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use regex::Regex;

use crate::event::{Event, Level};

use super::ParserContext;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(?P<ts>[^\]]+)\]\s+(?P<level>\w+)\s+\[(?P<logger>[^\]]+)\]\s+(?P<msg>.*)$")
        .unwrap()
})
;

/// Timestamp formats accepted inside the `[TS]` bracket, tried in order.
const TS_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S,%3f", "%Y-%m-%d %H:%M:%S"];

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    for fmt in TS_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    None
}

pub fn parse(line: &str, ctx: &ParserContext) -> Event {
    let Some(caps) = LINE_RE.captures(line) else {
        return Event::new_log(&ctx.service_name, &ctx.environment, Level::Info, line);
    };

    let level = Level::from_alias(&caps["level"]);
    let message = caps["msg"].to_string();
    let logger = caps["logger"].to_string();

    let mut event = Event::new_log(&ctx.service_name, &ctx.environment, level, message);
    if let Some(ts) = parse_timestamp(&caps["ts"]) {
        event.header.timestamp = ts;
    }
    event.header.tags.insert("logger".to_string(), logger);
    event
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;
    use crate::parsers::test_ctx;

    #[test]
    fn scenario_s1_parses_matching_line() {
        let line = "[2024-10-26 10:30:15,123] ERROR [django.request] Internal server error";
        let ev = parse(line, &test_ctx());
        if let EventBody::Log { level, message, .. } = &ev.body {
            assert_eq!(*level, Level::Error);
            assert_eq!(message, "Internal server error");
        } else {
            panic!("expected log body");
        }
        assert_eq!(ev.header.tags.get("logger").unwrap(), "django.request");
    }

    #[test]
    fn non_matching_line_becomes_generic_info_log() {
        let ev = parse("totally unstructured output", &test_ctx());
        if let EventBody::Log { level, message, .. } = &ev.body {
            assert_eq!(*level, Level::Info);
            assert_eq!(message, "totally unstructured output");
        } else {
            panic!("expected log body");
        }
    }

    #[test]
    fn level_aliases_resolve_through_full_line() {
        let line = "[2024-10-26 10:30:15,123] WARN [app] careful";
        let ev = parse(line, &test_ctx());
        if let EventBody::Log { level, .. } = &ev.body {
            assert_eq!(*level, Level::Warning);
        }
    }
}
