//! Apache access-log parser. Same wire format as nginx, shared
//! via [`super::common_log`].

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
        let line = r#"10.1.1.1 - - [26/Oct/2024:11:00:00 +0000] "POST /login HTTP/1.1" 401 0"#;
        assert!(parse(line, &test_ctx()).is_some());
    }
}
