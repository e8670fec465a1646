//! Rewrites a statement so backslash-escaped control punctuation survives
//! the terminal layer.
//!
//! tmux `send-keys` re-parses what it is given, so a single `\;` typed by
//! the caller arrives at the shell as a bare `;`. Doubling the backslash
//! (`\;` -> `\\;`) in unquoted positions keeps the shell seeing what the
//! caller wrote. Quoted strings, command substitutions and heredoc bodies
//! are already opaque to that layer and pass through byte-identical.

use std::sync::OnceLock;

use regex::Regex;
use tracing::debug;

use crate::scanner::{scan, TokenKind};

fn escape_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\\([;&|><])").expect("escape pattern compiles"))
}

/// Escape backslash-prefixed metacharacters outside protected regions.
/// Blank input becomes empty; any scan failure returns the input unchanged.
pub fn escape_special_chars(command: &str) -> String {
    if command.trim().is_empty() {
        return String::new();
    }
    let tokens = match scan(command) {
        Ok(tokens) => tokens,
        Err(err) => {
            debug!(%err, "statement scan failed, leaving command unescaped");
            return command.to_string();
        }
    };

    let re = escape_re();
    let mut out = String::with_capacity(command.len());
    let mut last_pos = 0;
    for token in &tokens {
        if token.start > last_pos {
            out.push_str(&re.replace_all(&command[last_pos..token.start], r"\\$1"));
        }
        let text = &command[token.start..token.end];
        match token.kind {
            TokenKind::Word { protected: true } | TokenKind::HeredocBody => out.push_str(text),
            _ => out.push_str(&re.replace_all(text, r"\\$1")),
        }
        last_pos = token.end;
    }
    if last_pos < command.len() {
        out.push_str(&re.replace_all(&command[last_pos..], r"\\$1"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escaped_metachars_are_doubled() {
        assert_eq!(escape_special_chars(r"echo a\;b"), r"echo a\\;b");
        assert_eq!(escape_special_chars(r"grep foo \| bar"), r"grep foo \\| bar");
        assert_eq!(
            escape_special_chars(r"echo \;\&\|\>\<"),
            r"echo \\;\\&\\|\\>\\<"
        );
    }

    #[test]
    fn test_plain_metachars_untouched() {
        assert_eq!(
            escape_special_chars("echo a && echo b"),
            "echo a && echo b"
        );
        assert_eq!(escape_special_chars("ls > out.txt"), "ls > out.txt");
    }

    #[test]
    fn test_quoted_text_passes_byte_identical() {
        assert_eq!(escape_special_chars(r"echo '\;'"), r"echo '\;'");
        assert_eq!(escape_special_chars(r#"echo "a\;b""#), r#"echo "a\;b""#);
    }

    #[test]
    fn test_substitutions_pass_byte_identical() {
        assert_eq!(
            escape_special_chars(r"echo $(printf '%s' \;)"),
            r"echo $(printf '%s' \;)"
        );
        assert_eq!(escape_special_chars(r"echo `ls \;`"), r"echo `ls \;`");
    }

    #[test]
    fn test_heredoc_body_passes_byte_identical() {
        let input = "cat <<EOF\nkeep \\; as written\nEOF";
        assert_eq!(escape_special_chars(input), input);
    }

    #[test]
    fn test_mixed_protected_and_unprotected() {
        assert_eq!(
            escape_special_chars(r"echo \; '\;' \;"),
            r"echo \\; '\;' \\;"
        );
    }

    #[test]
    fn test_blank_input_becomes_empty() {
        assert_eq!(escape_special_chars(""), "");
        assert_eq!(escape_special_chars("   "), "");
    }

    #[test]
    fn test_scan_failure_returns_input_unchanged() {
        let input = "echo 'unterminated \\;";
        assert_eq!(escape_special_chars(input), input);
    }
}
