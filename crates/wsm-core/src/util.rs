//! Helpers shared by the store, the sync engine and both binaries.

use std::time::Duration;

const SUMMARY_MAX_CHARS: usize = 180;

/// Current Unix timestamp in milliseconds.
pub fn unix_millis_now() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Whole milliseconds in `duration`, saturating at `i64::MAX`.
pub fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Trimmed text, or `None` when nothing is left.
pub fn trimmed_non_empty(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

/// API base URL in canonical form: http(s) only, no surrounding whitespace
/// and no trailing slash. `None` for anything else.
pub fn canonical_api_url(raw: &str) -> Option<String> {
    let url = raw.trim().trim_end_matches('/');
    let has_host = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .is_some_and(|rest| !rest.is_empty());
    has_host.then(|| url.to_string())
}

/// Free text folded onto one line for recovery point descriptions and
/// error bodies: whitespace runs become one space, long text is cut with `…`.
pub fn one_line_summary(text: &str) -> String {
    let folded = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if folded.chars().count() <= SUMMARY_MAX_CHARS {
        return folded;
    }
    let mut cut: String = folded.chars().take(SUMMARY_MAX_CHARS - 1).collect();
    cut.push('…');
    cut
}
