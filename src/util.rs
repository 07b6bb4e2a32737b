//! Shared utility functions

/// Safely truncate a string to at most `max_bytes` while respecting UTF-8 boundaries.
///
/// If the string is already shorter than `max_bytes`, returns it unchanged.
/// Otherwise, finds the last valid UTF-8 character boundary at or before `max_bytes`
/// and returns a slice up to that point.
///
/// # Examples
///
/// ```
/// use sidecar_agent::util::truncate_utf8_safe;
///
/// // ASCII: straightforward truncation
/// assert_eq!(truncate_utf8_safe("hello world", 5), "hello");
///
/// // UTF-8: respects character boundaries
/// // "cafe\u{0301}" is "café" where the accent is a combining character
/// let s = "cafe\u{0301}";  // 6 bytes total
/// let truncated = truncate_utf8_safe(s, 5);
/// assert!(truncated.len() <= 5);
/// assert!(truncated.is_char_boundary(truncated.len()));
/// ```
pub fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_shorter_than_max() {
        assert_eq!(truncate_utf8_safe("hello", 10), "hello");
    }

    #[test]
    fn test_truncate_at_ascii_boundary() {
        assert_eq!(truncate_utf8_safe("hello world", 5), "hello");
    }

    #[test]
    fn test_truncate_at_utf8_boundary() {
        // 3-byte UTF-8 character: "日" = 0xE6 0x97 0xA5
        let s = "日本語";
        // Each character is 3 bytes, so 9 bytes total
        // Truncating at 4 should give us just "日" (3 bytes)
        assert_eq!(truncate_utf8_safe(s, 4), "日");
        assert_eq!(truncate_utf8_safe(s, 6), "日本");
    }

    #[test]
    fn test_truncate_empty_string() {
        assert_eq!(truncate_utf8_safe("", 5), "");
    }

    #[test]
    fn test_truncate_to_zero() {
        assert_eq!(truncate_utf8_safe("hello", 0), "");
    }
}

/// Marker appended to a field truncated by [`truncate_with_marker`].
pub const TRUNCATION_MARKER: &str = "...[TRUNCATED]";

/// Truncate `s` to at most `max_bytes` total (including the marker), appending
/// [`TRUNCATION_MARKER`] when truncation occurred. Leaves `s` untouched otherwise.
pub fn truncate_with_marker(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_string();
    }
    let budget = max_bytes.saturating_sub(TRUNCATION_MARKER.len());
    let mut out = String::with_capacity(max_bytes);
    out.push_str(truncate_utf8_safe(s, budget));
    out.push_str(TRUNCATION_MARKER);
    out
}

#[cfg(test)]
mod truncate_with_marker_tests {
    use super::*;

    #[test]
    fn leaves_short_strings_unchanged() {
        assert_eq!(truncate_with_marker("hello", 100), "hello");
    }

    #[test]
    fn appends_marker_when_truncated() {
        let long = "x".repeat(200);
        let out = truncate_with_marker(&long, 100);
        assert_eq!(out.len(), 100);
        assert!(out.ends_with(TRUNCATION_MARKER));
    }
}
