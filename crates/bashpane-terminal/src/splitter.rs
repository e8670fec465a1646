//! Splits raw input into syntactically complete top-level statements.
//!
//! The session refuses to run more than one statement per request, so the
//! driver needs to know how many the caller actually sent. Splitting is
//! best-effort by contract: any scan failure returns the whole input as a
//! single element and lets the shell be the judge.

use tracing::debug;

use crate::scanner::{scan, TokenKind};

/// Ordered top-level statements, original formatting preserved.
///
/// Boundary text between statements (separators, comments, incidental
/// whitespace) is right-trimmed and appended to the preceding statement, so
/// concatenating the results reproduces the input modulo trailing
/// whitespace. Blank input yields a single empty element.
pub fn split_commands(input: &str) -> Vec<String> {
    if input.trim().is_empty() {
        return vec![String::new()];
    }
    let tokens = match scan(input) {
        Ok(tokens) => tokens,
        Err(err) => {
            debug!(%err, "statement scan failed, treating input as one command");
            return vec![input.to_string()];
        }
    };

    // Group tokens into statement spans. Comments and splitting operators
    // are boundary text, everything else extends the current statement.
    let mut spans: Vec<(usize, usize)> = Vec::new();
    let mut current: Option<(usize, usize)> = None;
    for token in &tokens {
        match token.kind {
            TokenKind::Operator { splits: true } => {
                if let Some(span) = current.take() {
                    spans.push(span);
                }
            }
            TokenKind::Comment => {}
            _ => {
                current = Some(match current {
                    Some((start, _)) => (start, token.end),
                    None => (token.start, token.end),
                });
            }
        }
    }
    if let Some(span) = current {
        spans.push(span);
    }

    let mut result: Vec<String> = Vec::new();
    let mut last_end = 0;
    for &(start, end) in &spans {
        if start > last_end {
            let between = &input[last_end..start];
            if let Some(last) = result.last_mut() {
                last.push_str(between.trim_end());
            } else if !between.trim().is_empty() {
                result.push(between.trim_end().to_string());
            }
        }
        result.push(input[start..end].trim_end().to_string());
        last_end = end;
    }
    if last_end < input.len() {
        let remaining = input[last_end..].trim_end();
        if let Some(last) = result.last_mut() {
            last.push_str(remaining);
        } else if !remaining.is_empty() {
            result.push(remaining.to_string());
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semicolon_splits() {
        assert_eq!(split_commands("echo a; echo b"), vec!["echo a;", "echo b"]);
    }

    #[test]
    fn test_newline_splits() {
        assert_eq!(split_commands("ls -l\npwd"), vec!["ls -l", "pwd"]);
        assert_eq!(split_commands("echo a\necho b"), vec!["echo a", "echo b"]);
    }

    #[test]
    fn test_chained_command_is_single_statement() {
        assert_eq!(
            split_commands("echo a && echo b"),
            vec!["echo a && echo b"]
        );
        assert_eq!(
            split_commands("echo a || echo b | wc -l"),
            vec!["echo a || echo b | wc -l"]
        );
    }

    #[test]
    fn test_joiner_line_continuation_is_single_statement() {
        assert_eq!(
            split_commands("echo a &&\necho b"),
            vec!["echo a &&\necho b"]
        );
        assert_eq!(split_commands("echo a |\nwc -l"), vec!["echo a |\nwc -l"]);
        assert_eq!(
            split_commands("echo a ||\necho b\necho c"),
            vec!["echo a ||\necho b", "echo c"]
        );
    }

    #[test]
    fn test_quoted_separator_is_not_a_boundary() {
        assert_eq!(split_commands("echo 'a; b'"), vec!["echo 'a; b'"]);
        assert_eq!(split_commands("echo \"a; b\""), vec!["echo \"a; b\""]);
    }

    #[test]
    fn test_trailing_separator_stays_on_statement() {
        assert_eq!(split_commands("sleep 5 &"), vec!["sleep 5 &"]);
        assert_eq!(split_commands("echo a;"), vec!["echo a;"]);
    }

    #[test]
    fn test_background_operator_splits() {
        assert_eq!(split_commands("sleep 5 & echo b"), vec!["sleep 5 &", "echo b"]);
    }

    #[test]
    fn test_compound_command_is_single_statement() {
        assert_eq!(
            split_commands("if true; then echo a; fi"),
            vec!["if true; then echo a; fi"]
        );
        assert_eq!(
            split_commands("for i in 1 2; do echo $i; done"),
            vec!["for i in 1 2; do echo $i; done"]
        );
    }

    #[test]
    fn test_heredoc_is_single_statement() {
        let input = "cat <<EOF\nline one; still heredoc\nline two\nEOF";
        assert_eq!(split_commands(input), vec![input]);
    }

    #[test]
    fn test_trailing_comment_joins_preceding_statement() {
        assert_eq!(
            split_commands("echo a # note\necho b"),
            vec!["echo a # note", "echo b"]
        );
    }

    #[test]
    fn test_blank_input_yields_single_empty_element() {
        assert_eq!(split_commands(""), vec![""]);
        assert_eq!(split_commands("   \n  "), vec![""]);
    }

    #[test]
    fn test_scan_failure_falls_back_to_whole_input() {
        let input = "echo 'unterminated; echo b";
        assert_eq!(split_commands(input), vec![input]);
    }

    #[test]
    fn test_concatenation_reconstructs_input() {
        for input in [
            "echo a; echo b",
            "ls -l\npwd",
            "echo a && echo b",
            "sleep 5 & echo b",
            "echo a # note\necho b",
        ] {
            let pieces = split_commands(input);
            let strip = |s: &str| s.chars().filter(|c| !c.is_whitespace()).collect::<String>();
            assert_eq!(
                strip(&pieces.concat()),
                strip(input),
                "statements dropped text for {input:?}"
            );
        }
    }
}
