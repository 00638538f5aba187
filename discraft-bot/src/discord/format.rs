//! Discord plain-text helpers.
//!
//! Discord rejects messages over 2000 characters, so long replies (such as
//! the help listing) are split at line boundaries.

/// Maximum message length for Discord.
pub const MAX_MESSAGE_LENGTH: usize = 2000;

/// Mention markup for a user.
pub fn mention(user_id: u64) -> String {
    format!("<@{user_id}>")
}

/// Split a message into chunks that fit Discord's character limit.
///
/// Attempts to split at newlines, then spaces.
pub fn split_message(text: &str) -> Vec<String> {
    if text.len() <= MAX_MESSAGE_LENGTH {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current_chunk = String::new();

    for line in text.lines() {
        let separator = usize::from(!current_chunk.is_empty());

        if current_chunk.len() + separator + line.len() > MAX_MESSAGE_LENGTH {
            if !current_chunk.is_empty() {
                chunks.push(std::mem::take(&mut current_chunk));
            }

            let mut remaining = line;
            while remaining.len() > MAX_MESSAGE_LENGTH {
                let split_point = find_split_point(remaining, MAX_MESSAGE_LENGTH);
                chunks.push(remaining[..split_point].to_string());
                remaining = &remaining[split_point..];
            }
            current_chunk.push_str(remaining);
        } else {
            if separator == 1 {
                current_chunk.push('\n');
            }
            current_chunk.push_str(line);
        }
    }

    if !current_chunk.is_empty() {
        chunks.push(current_chunk);
    }

    chunks
}

/// Find a split point at or before `max_len` that lies on a char boundary,
/// preferring the last space.
fn find_split_point(text: &str, max_len: usize) -> usize {
    let mut boundary = max_len.min(text.len());
    while !text.is_char_boundary(boundary) {
        boundary -= 1;
    }

    match text[..boundary].rfind(' ') {
        Some(pos) if pos > 0 => pos + 1,
        _ => boundary,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mention() {
        assert_eq!(mention(42), "<@42>");
    }

    #[test]
    fn test_short_message_untouched() {
        assert_eq!(split_message("hello"), vec!["hello".to_string()]);
    }

    #[test]
    fn test_split_at_lines() {
        let line = "a".repeat(1500);
        let text = format!("{line}\n{line}");
        let chunks = split_message(&text);
        assert_eq!(chunks.len(), 2);
        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_LENGTH));
    }

    #[test]
    fn test_split_long_line_on_char_boundary() {
        let text = "é".repeat(1500);
        let chunks = split_message(&text);
        assert!(chunks.len() >= 2);
        assert!(chunks.iter().all(|c| c.len() <= MAX_MESSAGE_LENGTH));
        assert_eq!(chunks.concat(), text);
    }
}
