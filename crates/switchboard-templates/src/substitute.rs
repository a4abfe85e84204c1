/// Substitute positional and catch-all variables in a template body.
///
/// Rules, in order:
/// 1. `$N` (N in 1..9) becomes `args[N-1]`, or the empty string if missing.
/// 2. `$ARGUMENTS` becomes all args joined by a single space.
/// 3. `\$` becomes a literal `$` (and shields the next character from rule 1).
/// 4. Any other `$`-sequence is left unchanged.
pub fn substitute(text: &str, args: &[String]) -> String {
    let mut out = String::with_capacity(text.len());
    let bytes = text.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        // Escaped dollar: emit a literal `$` and skip whatever follows it
        // from positional interpretation.
        if bytes[i] == b'\\' && i + 1 < bytes.len() && bytes[i + 1] == b'$' {
            out.push('$');
            i += 2;
            continue;
        }

        if bytes[i] == b'$' {
            let rest = &text[i + 1..];

            if rest.starts_with("ARGUMENTS") {
                out.push_str(&args.join(" "));
                i += 1 + "ARGUMENTS".len();
                continue;
            }

            if let Some(digit) = rest.chars().next().filter(|c| ('1'..='9').contains(c)) {
                let idx = digit as usize - '1' as usize;
                if let Some(arg) = args.get(idx) {
                    out.push_str(arg);
                }
                i += 2;
                continue;
            }
        }

        let ch = text[i..].chars().next().unwrap_or('\u{fffd}');
        out.push(ch);
        i += ch.len_utf8();
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn positional_replacement() {
        assert_eq!(
            substitute("Fix $1 in $2", &args(&["bug", "parser"])),
            "Fix bug in parser"
        );
    }

    #[test]
    fn missing_positional_becomes_empty() {
        assert_eq!(substitute("a $1 b $3 c", &args(&["x"])), "a x b  c");
    }

    #[test]
    fn arguments_joined_by_space() {
        assert_eq!(
            substitute("All: $ARGUMENTS", &args(&["one", "two", "three"])),
            "All: one two three"
        );
    }

    #[test]
    fn escaped_dollar_is_literal() {
        assert_eq!(substitute("price \\$1", &args(&["ignored"])), "price $1");
    }

    #[test]
    fn unknown_dollar_sequences_untouched() {
        assert_eq!(substitute("$PATH and $0", &args(&["x"])), "$PATH and $0");
    }

    #[test]
    fn order_insensitive_for_distinct_indices() {
        let a = args(&["A", "B"]);
        assert_eq!(substitute("$2$1", &a), "BA");
        assert_eq!(substitute("$1$2", &a), "AB");
    }

    #[test]
    fn idempotent_once_resolved() {
        let a = args(&["alpha"]);
        let once = substitute("task: $1 ($ARGUMENTS)", &a);
        assert_eq!(substitute(&once, &a), once);
    }

    #[test]
    fn multibyte_text_survives() {
        assert_eq!(substitute("héllo $1 ✓", &args(&["wörld"])), "héllo wörld ✓");
    }
}
