//! Caption length limits and truncation.
//!
//! Telegram counts caption length in UTF-16 code units, so that is what the
//! limits here are measured in.

use std::borrow::Cow;

/// Maximum caption length for media messages.
pub const MAX_MEDIA_CAPTION_LENGTH: usize = 1024;

/// Maximum length of a plain text message.
pub const MAX_TEXT_MESSAGE_LENGTH: usize = 4096;

/// Maximum story caption length.
pub const MAX_STORY_CAPTION_LENGTH: usize = 200;

const ELLIPSIS: &str = "...";

/// Length as Telegram counts it.
pub fn utf16_len(text: &str) -> usize {
    text.encode_utf16().count()
}

/// Truncates `text` to at most `limit` UTF-16 units, ending with `...` when cut.
pub fn truncate_caption(text: &str, limit: usize) -> Cow<'_, str> {
    if utf16_len(text) <= limit {
        return Cow::Borrowed(text);
    }

    let budget = limit.saturating_sub(ELLIPSIS.len());
    let mut used = 0;
    let end = text
        .char_indices()
        .find(|(_, c)| {
            used += c.len_utf16();
            used > budget
        })
        .map_or(text.len(), |(idx, _)| idx);

    let mut truncated = String::with_capacity(end + ELLIPSIS.len());
    truncated.push_str(&text[..end]);
    truncated.push_str(ELLIPSIS);
    Cow::Owned(truncated)
}

/// Shortens text for log lines.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_owned()
    } else {
        format!("{}...", s.chars().take(max_len).collect::<String>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_text_is_borrowed() {
        assert!(matches!(truncate_caption("hello", 10), Cow::Borrowed("hello")));
        assert_eq!(truncate_caption("exactly", 7), "exactly");
    }

    #[test]
    fn test_truncates_with_ellipsis() {
        let text = "a".repeat(1600);
        let caption = truncate_caption(&text, MAX_MEDIA_CAPTION_LENGTH);
        assert_eq!(utf16_len(&caption), MAX_MEDIA_CAPTION_LENGTH);
        assert!(caption.ends_with("..."));

        let story = truncate_caption(&text, MAX_STORY_CAPTION_LENGTH);
        assert_eq!(story.len(), 200);
        assert_eq!(&story[..197], &text[..197]);
    }

    #[test]
    fn test_counts_utf16_units() {
        // Each emoji is two UTF-16 units.
        let text = "😀".repeat(10);
        let caption = truncate_caption(&text, 9);
        assert_eq!(caption, "😀😀😀...");
        assert!(utf16_len(&caption) <= 9);
    }

    #[test]
    fn test_truncate_for_log() {
        assert_eq!(truncate_for_log("Hello", 10), "Hello");
        assert_eq!(truncate_for_log("Hello, World!", 5), "Hello...");
    }
}
