//! Content heuristics scan (gate 7): substring match for a small fixed set
//! of script/SQL-injection tokens, plus embedded-null-byte detection.
//!
//! Matches are warnings, never hard errors, per §4.4.

const SCRIPT_TOKENS: &[&str] = &["<script", "javascript:", "onerror=", "onload=", "eval("];

const SQL_TOKENS: &[&str] = &["union select", "drop table", "delete from", "insert into", "'; --"];

/// Scans the first `max_scan_bytes` of `content` for injection heuristics
/// and embedded null bytes, returning human-readable warnings.
#[must_use]
pub fn scan(content: &[u8], max_scan_bytes: usize) -> Vec<String> {
    let window = &content[..content.len().min(max_scan_bytes)];
    let mut warnings = Vec::new();

    if window.contains(&0u8) {
        warnings.push("content contains embedded null bytes".to_string());
    }

    let lowercase = String::from_utf8_lossy(window).to_ascii_lowercase();
    for token in SCRIPT_TOKENS {
        if lowercase.contains(token) {
            warnings.push(format!("content matched script-injection token '{token}'"));
        }
    }
    for token in SQL_TOKENS {
        if lowercase.contains(token) {
            warnings.push(format!("content matched sql-injection token '{token}'"));
        }
    }

    warnings
}
