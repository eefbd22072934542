//! Shared utility functions used across the codebase.

use crate::artifacts::HistoryEntry;

/// Build a truncated context string from conversation history.
///
/// Walks `history` from most-recent to oldest, accumulating entries until
/// `max_chars` is reached. The most-recent entry is always included.
pub fn build_history_context(history: &[HistoryEntry], max_chars: usize) -> String {
    let mut result = String::new();
    let mut total_chars = 0;
    for entry in history.iter().rev() {
        let line = format!("{}: {}\n\n", entry.role.to_uppercase(), entry.content);
        if total_chars + line.len() > max_chars && !result.is_empty() {
            break;
        }
        result = format!("{}{}", line, result);
        total_chars += line.len();
    }
    result
}

/// Shorten `text` to at most `max_chars` characters, marking the cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let head: String = text.chars().take(max_chars).collect();
    format!("{}...", head)
}
