//! crates/rag_agent_core/src/title.rs
//!
//! Derives a short session label from a user message. Deterministic,
//! no side effects.

/// Fallback label when the message is blank.
pub const DEFAULT_TITLE: &str = "New Conversation";

/// Maximum derived title length, in characters.
pub const MAX_TITLE_LEN: usize = 50;

/// Derives a session title: trims the message, truncates it to
/// [`MAX_TITLE_LEN`] characters and marks the truncation with an ellipsis.
pub fn derive_title(message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }

    // Character-based, not byte-based, so multi-byte input never splits
    // a code point.
    if trimmed.chars().count() > MAX_TITLE_LEN {
        let mut title: String = trimmed.chars().take(MAX_TITLE_LEN).collect();
        title.push_str("...");
        title
    } else {
        trimmed.to_string()
    }
}
