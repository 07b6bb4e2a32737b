//! Line parsers: one well-formed [`Event`] per input line.
//!
//! Each submodule owns one wire format. `parse_line` dispatches by
//! [`Format`] the way requests get dispatched by route in
//! `proxy/server.rs`'s router -- one function per format, composed by a
//! single entry point.

mod apache;
mod common_log;
mod django;
mod docker;
mod generic;
mod json;
mod nginx;

use crate::event::Event;

/// Line formats recognized by `logs[].format`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Django,
    Nginx,
    Apache,
    Json,
    Docker,
    Generic,
}

impl Format {
    pub fn from_config_str(s: &str) -> Option<Format> {
        match s {
            "django" => Some(Format::Django),
            "nginx" => Some(Format::Nginx),
            "apache" => Some(Format::Apache),
            "json" => Some(Format::Json),
            "docker" => Some(Format::Docker),
            "generic" => Some(Format::Generic),
            // journald is a producer (JournaldTailer), not a line format.
            _ => None,
        }
    }
}

/// Identity fields every parser stamps onto the events it produces.
#[derive(Debug, Clone)]
pub struct ParserContext {
    pub service_name: String,
    pub environment: String,
}

/// Parse one line into zero or one events. Only the nginx/apache parsers
/// ever return `None` (unparseable line); every other format falls back to
/// a generic log event 
pub fn parse_line(format: Format, line: &str, ctx: &ParserContext) -> Option<Event> {
    match format {
        Format::Django => Some(django::parse(line, ctx)),
        Format::Nginx => nginx::parse(line, ctx),
        Format::Apache => apache::parse(line, ctx),
        Format::Json => Some(json::parse(line, ctx)),
        Format::Docker => Some(docker::parse(line, ctx)),
        Format::Generic => Some(generic::parse(line, ctx)),
    }
}

#[cfg(test)]
pub(crate) fn test_ctx() -> ParserContext {
    ParserContext {
        service_name: "svc".to_string(),
        environment: "test".to_string(),
    }
}
