//! IRC reply splitting and truncation utilities
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.0.0: Initial release

/// Conservative payload limit for one PRIVMSG; the 512-byte IRC line also
/// carries the command, target, and sender prefix
pub const LINE_LIMIT: usize = 400;

/// Split reply text into PRIVMSG-sized lines (UTF-8 safe)
///
/// IRC messages cannot contain newlines, so each line of the input becomes
/// its own message; lines longer than [`LINE_LIMIT`] are split at character
/// boundaries. Blank lines are dropped.
pub fn split_for_irc(text: &str) -> Vec<String> {
    let mut messages = Vec::new();

    for line in text.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        if line.len() <= LINE_LIMIT {
            messages.push(line.to_string());
        } else {
            messages.extend(split_long_line(line, LINE_LIMIT));
        }
    }

    messages
}

/// Split a single long line into chunks respecting UTF-8 boundaries
fn split_long_line(line: &str, max_size: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();

    for ch in line.chars() {
        if current.len() + ch.len_utf8() > max_size && !current.is_empty() {
            result.push(current);
            current = String::new();
        }
        current.push(ch);
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Truncate a line to the PRIVMSG limit, adding ellipsis if needed
pub fn truncate_line(text: &str) -> String {
    if text.len() <= LINE_LIMIT {
        text.to_string()
    } else {
        // Find a safe UTF-8 boundary
        let mut end = LINE_LIMIT - 3; // Room for "..."
        while !text.is_char_boundary(end) && end > 0 {
            end -= 1;
        }
        format!("{}...", &text[..end])
    }
}
