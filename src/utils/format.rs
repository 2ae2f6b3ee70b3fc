// === UTF-8 safe string slicing utilities ===

use std::time::Duration;

use chrono::{DateTime, Local, Utc};

/// Round a byte index down to the nearest char boundary
pub fn floor_char_boundary(s: &str, index: usize) -> usize {
    if index >= s.len() {
        return s.len();
    }
    let mut i = index;
    while i > 0 && !s.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Leading part of `s` no longer than `max_bytes`, cut at a char boundary
pub fn safe_prefix(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let boundary = floor_char_boundary(s, max_bytes);
    &s[..boundary]
}

/// `safe_prefix` plus a trailing "..." when something was cut
pub fn truncate_id(s: &str, max_bytes: usize) -> String {
    let prefix = safe_prefix(s, max_bytes);
    if prefix.len() < s.len() {
        format!("{}...", prefix)
    } else {
        prefix.to_string()
    }
}

/// Human-readable local time for chat messages
pub fn format_local_time(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Interval rendered in whole minutes, or seconds when shorter than a minute
pub fn format_interval(interval: Duration) -> String {
    let secs = interval.as_secs();
    if secs < 60 {
        format!("{} seconds", secs)
    } else {
        let minutes = (secs as f64 / 60.0).round() as u64;
        if minutes == 1 {
            "1 minute".to_string()
        } else {
            format!("{} minutes", minutes)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_safe_prefix_respects_char_boundaries() {
        assert_eq!(safe_prefix("abcdef", 3), "abc");
        assert_eq!(safe_prefix("ab", 8), "ab");
        // "é" is two bytes; cutting inside it must back off
        assert_eq!(safe_prefix("aé", 2), "a");
    }

    #[test]
    fn test_truncate_id() {
        assert_eq!(truncate_id("1BxiMVs0XRA5nFMdKv", 12), "1BxiMVs0XRA5...");
        assert_eq!(truncate_id("short", 12), "short");
    }

    #[test]
    fn test_format_interval() {
        assert_eq!(format_interval(Duration::from_millis(300_000)), "5 minutes");
        assert_eq!(format_interval(Duration::from_secs(60)), "1 minute");
        assert_eq!(format_interval(Duration::from_secs(30)), "30 seconds");
    }
}
