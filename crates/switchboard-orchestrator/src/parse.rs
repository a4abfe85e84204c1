//! Slash-command grammar: `^/[a-z-]+(\s+("[^"]*"|'[^']*'|\S+))*$`.
//!
//! A leading `/` alone doesn't make a command — `/path/to/file` is plain
//! text. Only `/[a-z-]+` as the whole first token enters command dispatch.

/// A parsed slash command: lowercase name (no slash) and its arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub name: String,
    pub args: Vec<String>,
}

/// Parse `text` as a slash command, or `None` when it isn't one.
pub fn parse_slash_command(text: &str) -> Option<ParsedCommand> {
    let trimmed = text.trim();
    let rest = trimmed.strip_prefix('/')?;

    let first_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
    let name = &rest[..first_end];
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_lowercase() || c == '-') {
        return None;
    }

    let args = tokenize(&rest[first_end..]);
    Some(ParsedCommand {
        name: name.to_string(),
        args,
    })
}

/// Split arguments on whitespace, honoring single and double quotes.
/// Quotes group, they are not kept. An unterminated quote runs to the end.
fn tokenize(input: &str) -> Vec<String> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_token = false;
    let mut chars = input.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' | '\'' => {
                in_token = true;
                let quote = c;
                for inner in chars.by_ref() {
                    if inner == quote {
                        break;
                    }
                    current.push(inner);
                }
            }
            c if c.is_whitespace() => {
                if in_token {
                    args.push(std::mem::take(&mut current));
                    in_token = false;
                }
            }
            other => {
                in_token = true;
                current.push(other);
            }
        }
    }
    if in_token {
        args.push(current);
    }

    args
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn simple_command() {
        let parsed = parse_slash_command("/status").unwrap();
        assert_eq!(parsed.name, "status");
        assert!(parsed.args.is_empty());
    }

    #[test]
    fn args_with_double_quotes() {
        let parsed =
            parse_slash_command("/command-set plan .claude/plan.md \"Task: $1\"").unwrap();
        assert_eq!(parsed.name, "command-set");
        assert_eq!(parsed.args, vec!["plan", ".claude/plan.md", "Task: $1"]);
    }

    #[test]
    fn args_with_single_quotes() {
        let parsed = parse_slash_command("/plan 'Add dark mode'").unwrap();
        assert_eq!(parsed.args, vec!["Add dark mode"]);
    }

    #[test]
    fn quoted_empty_argument_survives() {
        let parsed = parse_slash_command("/x \"\" b").unwrap();
        assert_eq!(parsed.args, vec!["", "b"]);
    }

    #[test]
    fn adjacent_quotes_join_into_one_token() {
        let parsed = parse_slash_command("/x ab\"cd ef\"gh").unwrap();
        assert_eq!(parsed.args, vec!["abcd efgh"]);
    }

    #[test]
    fn paths_are_not_commands() {
        assert!(parse_slash_command("/path/to/file").is_none());
        assert!(parse_slash_command("/Weird").is_none());
        assert!(parse_slash_command("plain text").is_none());
        assert!(parse_slash_command("/").is_none());
    }
}
