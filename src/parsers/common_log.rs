//! Shared NCSA common/combined log line regex for the nginx and apache
//! parsers. Both wire formats parse identically; only the `Format` tag they're registered
//! under differs, so the regex and field extraction live here once.

use std::sync::LazyLock;

use regex::Regex;

use crate::event::Event;

use super::ParserContext;

static LINE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"^(?P<ip>\S+) \S+ \S+ \[(?P<ts>[^\]]+)\] "(?P<method>\S+) (?P<path>\S+)(?: \S+)?" (?P<status>\d{3}) (?P<size>\S+)(?: "(?P<referer>[^"]*)" "(?P<agent>[^"]*)")?\s*$"#,
    )
    .unwrap()
});

/// Parse one common/combined-log line into a span [`Event`]. `None` for
/// anything that doesn't match -- the only parser family allowed to drop a
/// line outright.
pub fn parse(line: &str, ctx: &ParserContext) -> Option<Event> {
    let caps = LINE_RE.captures(line)?;

    let method = &caps["method"];
    let path = &caps["path"];
    let status: u16 = caps["status"].parse().ok()?;

    let mut event = Event::new_span(
        &ctx.service_name,
        &ctx.environment,
        format!("{method} {path}"),
        Some(status),
    );

    event.header.tags.insert("method".to_string(), method.to_string());
    event.header.tags.insert("path".to_string(), path.to_string());
    event
        .header
        .tags
        .insert("client_ip".to_string(), caps["ip"].to_string());
    event
        .header
        .tags
        .insert("content_size".to_string(), caps["size"].to_string());
    if let Some(referer) = caps.name("referer") {
        if !referer.as_str().is_empty() {
            event
                .header
                .tags
                .insert("referer".to_string(), referer.as_str().to_string());
        }
    }
    if let Some(agent) = caps.name("agent") {
        if !agent.as_str().is_empty() {
            event
                .header
                .tags
                .insert("user_agent".to_string(), agent.as_str().to_string());
        }
    }

    Some(event)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::EventBody;
    use crate::parsers::test_ctx;

    #[test]
    fn scenario_s2_parses_common_log_line() {
        let line = r#"192.168.1.1 - - [26/Oct/2024:10:30:15 +0000] "GET /api/users HTTP/1.1" 200 1234"#;
        let ev = parse(line, &test_ctx()).expect("should parse");
        if let EventBody::Span {
            operation,
            status_code,
            ..
        } = &ev.body
        {
            assert_eq!(operation, "GET /api/users");
            assert_eq!(*status_code, Some(200));
        } else {
            panic!("expected span body");
        }
        assert_eq!(ev.header.tags.get("method").unwrap(), "GET");
        assert_eq!(ev.header.tags.get("path").unwrap(), "/api/users");
        assert_eq!(ev.header.tags.get("client_ip").unwrap(), "192.168.1.1");
        assert_eq!(ev.header.tags.get("content_size").unwrap(), "1234");
    }

    #[test]
    fn combined_log_captures_referer_and_user_agent() {
        let line = r#"10.0.0.1 - - [26/Oct/2024:10:30:15 +0000] "GET / HTTP/1.1" 200 512 "https://example.com" "curl/8.0""#;
        let ev = parse(line, &test_ctx()).expect("should parse");
        assert_eq!(ev.header.tags.get("referer").unwrap(), "https://example.com");
        assert_eq!(ev.header.tags.get("user_agent").unwrap(), "curl/8.0");
    }

    #[test]
    fn unparseable_line_returns_none() {
        assert!(parse("not a log line", &test_ctx()).is_none());
    }
}
