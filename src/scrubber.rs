//! Pre-send regex redaction/drop stage.
//!
//! Grounded in this codebase's pervasive use of `std::sync::RwLock` for
//! rarely-written, frequently-read shared state (e.g. `ContextState` in
//! `main.rs`) and `regex::Regex` for line matching elsewhere in the pack.

use std::sync::RwLock;

use regex::Regex;

use crate::event::{Event, EventBody};

/// Which fields a [`ScrubRule`] inspects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldSelector {
    /// A top-level field, e.g. `message` or `stacktrace`.
    Field(String),
    /// A single tag, `tags.<name>`.
    Tag(String),
    /// Every tag value, `tags.*`.
    AllTags,
}

impl FieldSelector {
    pub fn parse(raw: &str) -> FieldSelector {
        if raw == "tags.*" {
            FieldSelector::AllTags
        } else if let Some(name) = raw.strip_prefix("tags.") {
            FieldSelector::Tag(name.to_string())
        } else {
            FieldSelector::Field(raw.to_string())
        }
    }
}

/// One redaction/drop rule.
pub struct ScrubRule {
    pub name: String,
    pub pattern: Regex,
    pub replacement: String,
    pub selectors: Vec<FieldSelector>,
    pub drop: bool,
}

impl ScrubRule {
    /// Compile one `scrubbing.rules[]` entry into a [`ScrubRule`],
    /// failing if its pattern isn't a valid regex.
    pub fn from_config(config: &crate::config::ScrubRuleConfig) -> Result<ScrubRule, regex::Error> {
        Ok(ScrubRule {
            name: config.name.clone(),
            pattern: Regex::new(&config.pattern)?,
            replacement: config.replacement.clone(),
            selectors: config.fields.iter().map(|f| FieldSelector::parse(f)).collect(),
            drop: config.drop,
        })
    }

    /// Selectors actually in effect: the configured list, or the default of
    /// `message` + `stacktrace` when none were given.
    fn effective_selectors(&self) -> Vec<FieldSelector> {
        if self.selectors.is_empty() {
            vec![
                FieldSelector::Field("message".to_string()),
                FieldSelector::Field("stacktrace".to_string()),
            ]
        } else {
            self.selectors.clone()
        }
    }

    /// Run this rule against `event`, mutating string fields in place for
    /// replace rules. Returns `false` if the event should be dropped.
    fn apply(&self, event: &mut Event) -> bool {
        for selector in self.effective_selectors() {
            match &selector {
                FieldSelector::Field(name) => {
                    if let Some(value) = field_mut(event, name) {
                        if self.pattern.is_match(value) {
                            if self.drop {
                                return false;
                            }
                            *value = self
                                .pattern
                                .replace_all(value, self.replacement.as_str())
                                .into_owned();
                        }
                    }
                }
                FieldSelector::Tag(name) => {
                    if let Some(value) = event.header.tags.get_mut(name) {
                        if self.pattern.is_match(value) {
                            if self.drop {
                                return false;
                            }
                            *value = self
                                .pattern
                                .replace_all(value, self.replacement.as_str())
                                .into_owned();
                        }
                    }
                }
                FieldSelector::AllTags => {
                    for value in event.header.tags.values_mut() {
                        if self.pattern.is_match(value) {
                            if self.drop {
                                return false;
                            }
                            *value = self
                                .pattern
                                .replace_all(value, self.replacement.as_str())
                                .into_owned();
                        }
                    }
                }
            }
        }
        true
    }
}

/// Borrow `message`/`stacktrace` mutably by name; `None` for fields that
/// don't exist on this event's body (e.g. `message` on a `Metric` event, or
/// an unrecognized top-level field name).
fn field_mut<'a>(event: &'a mut Event, name: &str) -> Option<&'a mut String> {
    match (&mut event.body, name) {
        (EventBody::Log { message, .. }, "message") => Some(message),
        (EventBody::Log { stacktrace: Some(s), .. }, "stacktrace") => Some(s),
        _ => None,
    }
}

/// Per-`Pipeline` scrubbing ruleset, shared by every producer.
/// Readers take a read-lock snapshot; reconfiguration takes a write lock.
pub struct Scrubber {
    rules: RwLock<Vec<ScrubRule>>,
}

impl Scrubber {
    pub fn new(rules: Vec<ScrubRule>) -> Self {
        Self {
            rules: RwLock::new(rules),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn reconfigure(&self, rules: Vec<ScrubRule>) {
        *self.rules.write().unwrap() = rules;
    }

    /// Apply every rule in order. Returns `true` if the event should still be
    /// forwarded; `false` once any drop rule matches (short-circuits: no
    /// further rules run).
    pub fn apply(&self, event: &mut Event) -> bool {
        let rules = self.rules.read().unwrap();
        for rule in rules.iter() {
            if !rule.apply(event) {
                return false;
            }
        }
        true
    }
}

impl Default for Scrubber {
    fn default() -> Self {
        Self::empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::Level;

    fn rule(pattern: &str, replacement: &str, selectors: &[&str], drop: bool) -> ScrubRule {
        ScrubRule {
            name: "test".to_string(),
            pattern: Regex::new(pattern).unwrap(),
            replacement: replacement.to_string(),
            selectors: selectors.iter().map(|s| FieldSelector::parse(s)).collect(),
            drop,
        }
    }

    #[test]
    fn non_matching_rule_leaves_event_unchanged() {
        let scrubber = Scrubber::new(vec![rule(r"secret-\d+", "[REDACTED]", &[], false)]);
        let mut event = Event::new_log("svc", "prod", Level::Info, "nothing to see here");
        let before = event.clone();
        assert!(scrubber.apply(&mut event));
        if let (EventBody::Log { message: a, .. }, EventBody::Log { message: b, .. }) =
            (&before.body, &event.body)
        {
            assert_eq!(a, b);
        }
    }

    #[test]
    fn replace_rule_redacts_in_place() {
        let scrubber = Scrubber::new(vec![rule(r"secret-\d+", "[REDACTED]", &[], false)]);
        let mut event = Event::new_log("svc", "prod", Level::Info, "token secret-123 leaked");
        assert!(scrubber.apply(&mut event));
        if let EventBody::Log { message, .. } = &event.body {
            assert_eq!(message, "token [REDACTED] leaked");
        }
    }

    #[test]
    fn drop_rule_short_circuits() {
        let scrubber = Scrubber::new(vec![
            rule(r"drop-me", "", &[], true),
            rule(r".*", "SHOULD-NOT-RUN", &[], false),
        ]);
        let mut event = Event::new_log("svc", "prod", Level::Info, "drop-me please");
        assert!(!scrubber.apply(&mut event));
        if let EventBody::Log { message, .. } = &event.body {
            assert_eq!(message, "drop-me please");
        }
    }

    #[test]
    fn tag_wildcard_selector_scrubs_all_tags() {
        let scrubber = Scrubber::new(vec![rule(r"\d+", "N", &["tags.*"], false)]);
        let mut event = Event::new_log("svc", "prod", Level::Info, "msg");
        event.header.tags.insert("a".to_string(), "x123".to_string());
        event.header.tags.insert("b".to_string(), "y456".to_string());
        assert!(scrubber.apply(&mut event));
        assert_eq!(event.header.tags.get("a").unwrap(), "xN");
        assert_eq!(event.header.tags.get("b").unwrap(), "yN");
    }
}
