//! Hand-rolled `"10s"`/`"24h"`-style duration parsing for config values.
//!
//! No duration-parsing crate exists anywhere in this codebase's dependency
//! stack (and none in the pack's other example repos either), so this is
//! the smallest thing that reads the suffixed durations the config format
//! uses (`flush_interval: 10s`, `queue_retention: 24h`, ...).

use std::time::Duration;

/// Parse a string like `"10s"`, `"30s"`, `"24h"`, `"168h"`, `"5m"` into a
/// [`Duration`]. Bare integers are treated as seconds. Returns `None` for
/// anything else.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let (digits, suffix) = match raw.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => (&raw[..idx], &raw[idx..]),
        None => (raw, ""),
    };
    let value: u64 = digits.parse().ok()?;
    let secs = match suffix {
        "" | "s" => value,
        "m" => value.checked_mul(60)?,
        "h" => value.checked_mul(3600)?,
        "d" => value.checked_mul(86_400)?,
        "ms" => return Some(Duration::from_millis(value)),
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}
