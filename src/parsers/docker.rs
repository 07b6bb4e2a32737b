//! Docker JSON-log-driver envelope parser.
//!
//! Envelope: `{log, stream, time, timeNano, source, containerID}`. When the
//! inner `log` line itself looks like JSON, parsing delegates to the json
//! parser and the envelope's fields are merged in as `container.*` tags,
//! losing to any event-specific tag of the same name.

use serde::Deserialize;
use serde_json::Value;

use crate::event::{Event, Level};

use super::{json, ParserContext};

#[derive(Deserialize)]
struct Envelope {
    log: String,
    #[serde(default)]
    stream: String,
    #[serde(default)]
    source: String,
    #[serde(rename = "containerID", default)]
    container_id: String,
}

pub fn parse(line: &str, ctx: &ParserContext) -> Event {
    let Ok(env) = serde_json::from_str::<Envelope>(line) else {
        return super::generic::parse(line, ctx);
    };

    let trimmed = env.log.trim_end_matches('\n');
    let default_level = if env.stream == "stderr" {
        Level::Error
    } else {
        Level::Info
    };

    let mut event = if trimmed.trim_start().starts_with('{') {
        match serde_json::from_str::<Value>(trimmed) {
            Ok(Value::Object(obj)) => json::parse_object(obj, ctx),
            _ => Event::new_log(&ctx.service_name, &ctx.environment, default_level, trimmed),
        }
    } else {
        Event::new_log(&ctx.service_name, &ctx.environment, default_level, trimmed)
    };

    let container_tags = [
        ("container.stream", env.stream.clone()),
        ("container.runtime", "docker".to_string()),
        ("container.id", env.container_id.clone()),
        ("container.source", env.source.clone()),
    ];
    for (key, value) in container_tags {
        event.header.tags.entry(key.to_string()).or_insert(value);
    }

    event
}
