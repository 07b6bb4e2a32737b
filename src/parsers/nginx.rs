//! nginx access-log parser.

use crate::event::Event;

use super::{common_log, ParserContext};

pub fn parse(line: &str, ctx: &ParserContext) -> Option<Event> {
    common_log::parse(line, ctx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsers::test_ctx;

    #[test]
    fn delegates_to_common_log() {
        let line = r#"192.168.1.1 - - [26/Oct/2024:10:30:15 +0000] "GET /api/users HTTP/1.1" 200 1234"#;
        assert!(parse(line, &test_ctx()).is_some());
    }
}
