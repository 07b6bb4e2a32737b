//! Generic fallback parser: level `info`, message = raw line.

use crate::event::{Event, Level};

use super::ParserContext;

pub fn parse(line: &str, ctx: &ParserContext) -> Event {
    Event::new_log(&ctx.service_name, &ctx.environment, Level::Info, line)
}
