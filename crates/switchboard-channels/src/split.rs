//! Message splitting and thread naming.
//!
//! Splitting prefers paragraph boundaries, falls back to line boundaries,
//! and hard-cuts only when a single line exceeds the platform limit.

/// Split `text` into pieces of at most `limit` characters.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.chars().count() <= limit {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut current = String::new();

    for paragraph in text.split("\n\n") {
        let candidate_len = if current.is_empty() {
            paragraph.chars().count()
        } else {
            current.chars().count() + 2 + paragraph.chars().count()
        };

        if candidate_len <= limit {
            if !current.is_empty() {
                current.push_str("\n\n");
            }
            current.push_str(paragraph);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(&mut current));
        }

        if paragraph.chars().count() <= limit {
            current = paragraph.to_string();
        } else {
            split_by_lines(paragraph, limit, &mut pieces, &mut current);
        }
    }

    if !current.is_empty() {
        pieces.push(current);
    }
    pieces
}

fn split_by_lines(paragraph: &str, limit: usize, pieces: &mut Vec<String>, current: &mut String) {
    for line in paragraph.split('\n') {
        let candidate_len = if current.is_empty() {
            line.chars().count()
        } else {
            current.chars().count() + 1 + line.chars().count()
        };

        if candidate_len <= limit {
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(line);
            continue;
        }

        if !current.is_empty() {
            pieces.push(std::mem::take(current));
        }

        if line.chars().count() <= limit {
            *current = line.to_string();
        } else {
            // A single oversized line: hard-cut on char boundaries.
            let mut rest: Vec<char> = line.chars().collect();
            while rest.len() > limit {
                let head: String = rest.drain(..limit).collect();
                pieces.push(head);
            }
            *current = rest.into_iter().collect();
        }
    }
}

/// Maximum thread name length (Discord's limit).
pub const THREAD_NAME_MAX: usize = 100;

/// Derive a thread name from the triggering message: first line, truncated
/// to [`THREAD_NAME_MAX`] with a trailing ellipsis.
pub fn thread_name_from(message: &str) -> String {
    let first_line = message.lines().next().unwrap_or("").trim();
    let name = if first_line.is_empty() { "Conversation" } else { first_line };

    if name.chars().count() <= THREAD_NAME_MAX {
        return name.to_string();
    }
    let cut: String = name.chars().take(THREAD_NAME_MAX - 3).collect();
    format!("{cut}...")
}
