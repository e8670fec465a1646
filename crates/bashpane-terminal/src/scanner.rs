//! Lexical scanner over bash syntax.
//!
//! Produces byte-span tokens with explicit kind tags (word, operator,
//! comment, heredoc body) instead of probing a third-party AST. The scanner
//! tracks quoting, substitutions, heredocs and compound commands
//! (`if..fi`, loops, `case..esac`, braces, subshells) just deeply enough to
//! answer the two questions the splitter and escaper care about: where do
//! top-level statements end, and which byte ranges must pass through
//! untouched. Anything it cannot parse is reported as a [`ParseError`] and
//! the callers degrade to verbatim passthrough.

use std::collections::VecDeque;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("unterminated quote starting at byte {0}")]
    UnterminatedQuote(usize),
    #[error("unterminated substitution starting at byte {0}")]
    UnterminatedSubstitution(usize),
    #[error("heredoc delimiter {0:?} never found")]
    UnterminatedHeredoc(String),
    #[error("unbalanced `{0}`")]
    Unbalanced(&'static str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// A shell word. `protected` when the whole word is a quoted string or
    /// a command substitution and must pass through byte-identical.
    Word { protected: bool },
    /// Control punctuation. `splits` is true only for `;`, `&` and newline
    /// outside every compound construct - the statement boundaries.
    Operator { splits: bool },
    Comment,
    /// A heredoc payload including its closing delimiter line.
    HeredocBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compound {
    If,
    Loop,
    Case,
    Brace,
    Paren,
}

#[derive(Debug)]
struct Heredoc {
    delimiter: String,
    strip_tabs: bool,
}

pub fn scan(input: &str) -> Result<Vec<Token>, ParseError> {
    Scanner::new(input).scan_all()
}

struct Scanner<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<Token>,
    stack: Vec<Compound>,
    pending_heredocs: VecDeque<Heredoc>,
    at_command_pos: bool,
    /// True right after `&&`, `||`, `|` or `|&`: the statement is waiting
    /// for its next command, so following newlines are continuations.
    after_joiner: bool,
}

impl<'a> Scanner<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            stack: Vec::new(),
            pending_heredocs: VecDeque::new(),
            at_command_pos: true,
            after_joiner: false,
        }
    }

    fn scan_all(mut self) -> Result<Vec<Token>, ParseError> {
        while self.pos < self.bytes.len() {
            match self.bytes[self.pos] {
                b' ' | b'\t' | b'\r' => self.pos += 1,
                b'\n' => self.newline()?,
                b'#' => self.comment(),
                b';' | b'&' | b'|' | b'<' | b'>' | b'(' | b')' => self.operator()?,
                _ => self.word()?,
            }
        }
        if let Some(hd) = self.pending_heredocs.pop_front() {
            return Err(ParseError::UnterminatedHeredoc(hd.delimiter));
        }
        if let Some(top) = self.stack.last() {
            return Err(ParseError::Unbalanced(match top {
                Compound::If => "if",
                Compound::Loop => "loop",
                Compound::Case => "case",
                Compound::Brace => "{",
                Compound::Paren => "(",
            }));
        }
        Ok(self.tokens)
    }

    fn newline(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 1;
        // A newline that opens pending heredoc bodies belongs to the
        // statement that declared them and never splits. Neither does one
        // (or several, the flag survives blank lines) after a joiner: the
        // statement continues on the next line.
        let splits =
            self.stack.is_empty() && self.pending_heredocs.is_empty() && !self.after_joiner;
        self.tokens.push(Token {
            kind: TokenKind::Operator { splits },
            start,
            end: start + 1,
        });
        self.at_command_pos = true;
        while let Some(hd) = self.pending_heredocs.pop_front() {
            self.heredoc_body(&hd)?;
        }
        Ok(())
    }

    fn heredoc_body(&mut self, hd: &Heredoc) -> Result<(), ParseError> {
        let body_start = self.pos;
        loop {
            let line_end = self.src[self.pos..].find('\n').map(|o| self.pos + o);
            let line = match line_end {
                Some(e) => &self.src[self.pos..e],
                None => &self.src[self.pos..],
            };
            let candidate = if hd.strip_tabs {
                line.trim_start_matches('\t')
            } else {
                line
            };
            if candidate == hd.delimiter {
                let mut end = self.pos + line.len();
                // Keep the delimiter's newline inside the body when another
                // heredoc body follows immediately.
                if !self.pending_heredocs.is_empty() {
                    if let Some(e) = line_end {
                        end = e + 1;
                    }
                }
                self.tokens.push(Token {
                    kind: TokenKind::HeredocBody,
                    start: body_start,
                    end,
                });
                self.pos = end;
                return Ok(());
            }
            match line_end {
                Some(e) => self.pos = e + 1,
                None => return Err(ParseError::UnterminatedHeredoc(hd.delimiter.clone())),
            }
        }
    }

    fn comment(&mut self) {
        let start = self.pos;
        let end = self.src[self.pos..]
            .find('\n')
            .map(|o| self.pos + o)
            .unwrap_or(self.src.len());
        self.tokens.push(Token {
            kind: TokenKind::Comment,
            start,
            end,
        });
        self.pos = end;
    }

    fn operator(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let rest = &self.bytes[self.pos..];
        let b0 = rest[0];
        let b1 = rest.get(1).copied();
        let top_level = self.stack.is_empty();
        let (len, splits, cmd_pos, joiner) = match (b0, b1) {
            (b';', Some(b';')) => (2, false, true, false),
            (b';', _) => (1, top_level, true, false),
            (b'&', Some(b'&')) => (2, false, true, true),
            (b'&', Some(b'>')) => {
                if rest.get(2) == Some(&b'>') {
                    (3, false, false, false)
                } else {
                    (2, false, false, false)
                }
            }
            (b'&', _) => (1, top_level, true, false),
            (b'|', Some(b'|')) | (b'|', Some(b'&')) => (2, false, true, true),
            (b'|', _) => (1, false, true, true),
            (b'<', Some(b'<')) => {
                if rest.get(2) == Some(&b'<') {
                    (3, false, false, false) // herestring
                } else {
                    return self.heredoc_redirect();
                }
            }
            (b'<', Some(b'&')) | (b'<', Some(b'>')) => (2, false, false, false),
            (b'<', _) => (1, false, false, false),
            (b'>', Some(b'>')) | (b'>', Some(b'&')) | (b'>', Some(b'|')) => {
                (2, false, false, false)
            }
            (b'>', _) => (1, false, false, false),
            (b'(', _) => {
                if self.stack.last() == Some(&Compound::Case) {
                    (1, false, false, false) // pattern opener inside a case arm
                } else {
                    self.stack.push(Compound::Paren);
                    (1, false, true, false)
                }
            }
            (b')', _) => {
                match self.stack.last() {
                    Some(Compound::Paren) => {
                        self.stack.pop();
                    }
                    _ if self.stack.contains(&Compound::Case) => {} // pattern close
                    _ => return Err(ParseError::Unbalanced(")")),
                }
                (1, false, true, false)
            }
            _ => (1, false, false, false),
        };
        self.pos += len;
        self.tokens.push(Token {
            kind: TokenKind::Operator { splits },
            start,
            end: self.pos,
        });
        self.at_command_pos = cmd_pos;
        self.after_joiner = joiner;
        Ok(())
    }

    fn heredoc_redirect(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        self.pos += 2;
        let mut strip_tabs = false;
        if self.bytes.get(self.pos) == Some(&b'-') {
            strip_tabs = true;
            self.pos += 1;
        }
        self.tokens.push(Token {
            kind: TokenKind::Operator { splits: false },
            start,
            end: self.pos,
        });
        while matches!(self.bytes.get(self.pos), Some(b' ' | b'\t')) {
            self.pos += 1;
        }
        let word_start = self.pos;
        let end = self.scan_word_span(word_start)?;
        if end == word_start {
            return Err(ParseError::UnterminatedHeredoc(String::new()));
        }
        let raw = &self.src[word_start..end];
        self.tokens.push(Token {
            kind: TokenKind::Word {
                protected: is_protected(raw),
            },
            start: word_start,
            end,
        });
        self.pos = end;
        self.pending_heredocs.push_back(Heredoc {
            delimiter: strip_word_quoting(raw),
            strip_tabs,
        });
        self.at_command_pos = false;
        self.after_joiner = false;
        Ok(())
    }

    fn word(&mut self) -> Result<(), ParseError> {
        let start = self.pos;
        let end = self.scan_word_span(start)?;
        let raw = &self.src[start..end];
        let protected = is_protected(raw);
        self.after_joiner = false;
        self.tokens.push(Token {
            kind: TokenKind::Word { protected },
            start,
            end,
        });
        self.pos = end;
        if self.at_command_pos && !protected {
            self.keyword(raw)?;
        } else {
            self.at_command_pos = false;
        }
        Ok(())
    }

    /// Reserved-word bookkeeping, checked only at command position.
    fn keyword(&mut self, word: &str) -> Result<(), ParseError> {
        match word {
            "if" => {
                self.stack.push(Compound::If);
                self.at_command_pos = true;
            }
            "while" | "until" => {
                self.stack.push(Compound::Loop);
                self.at_command_pos = true;
            }
            "for" | "select" => {
                self.stack.push(Compound::Loop);
                self.at_command_pos = false;
            }
            "case" => {
                self.stack.push(Compound::Case);
                self.at_command_pos = false;
            }
            "{" => {
                self.stack.push(Compound::Brace);
                self.at_command_pos = true;
            }
            "then" | "else" | "elif" | "do" | "!" => self.at_command_pos = true,
            "fi" => self.pop(Compound::If, "fi")?,
            "done" => self.pop(Compound::Loop, "done")?,
            "esac" => self.pop(Compound::Case, "esac")?,
            "}" => self.pop(Compound::Brace, "}")?,
            _ => self.at_command_pos = false,
        }
        Ok(())
    }

    fn pop(&mut self, expected: Compound, name: &'static str) -> Result<(), ParseError> {
        if self.stack.pop() != Some(expected) {
            return Err(ParseError::Unbalanced(name));
        }
        self.at_command_pos = false;
        Ok(())
    }

    /// End of the word starting at `start`: runs until an unquoted
    /// metacharacter, skipping quotes, escapes and substitutions whole.
    fn scan_word_span(&self, start: usize) -> Result<usize, ParseError> {
        let bytes = self.bytes;
        let mut i = start;
        while i < bytes.len() {
            match bytes[i] {
                b' ' | b'\t' | b'\n' | b'\r' | b';' | b'&' | b'|' | b'<' | b'>' | b'(' | b')' => {
                    break
                }
                b'\\' => i = self.skip_escape(i),
                b'\'' => i = self.skip_single_quote(i)?,
                b'"' => i = self.skip_double_quote(i)?,
                b'`' => i = self.skip_backtick(i)?,
                b'$' => i = self.skip_dollar(i)?,
                b => i += utf8_len(b),
            }
        }
        Ok(i)
    }

    fn skip_escape(&self, i: usize) -> usize {
        let j = i + 1;
        match self.bytes.get(j) {
            Some(&b) => j + utf8_len(b),
            None => j,
        }
    }

    fn skip_single_quote(&self, i: usize) -> Result<usize, ParseError> {
        match self.src[i + 1..].find('\'') {
            Some(o) => Ok(i + 1 + o + 1),
            None => Err(ParseError::UnterminatedQuote(i)),
        }
    }

    fn skip_double_quote(&self, i: usize) -> Result<usize, ParseError> {
        let bytes = self.bytes;
        let mut j = i + 1;
        while j < bytes.len() {
            match bytes[j] {
                b'"' => return Ok(j + 1),
                b'\\' => j = self.skip_escape(j),
                b'`' => j = self.skip_backtick(j)?,
                b'$' => j = self.skip_dollar(j)?,
                b => j += utf8_len(b),
            }
        }
        Err(ParseError::UnterminatedQuote(i))
    }

    fn skip_backtick(&self, i: usize) -> Result<usize, ParseError> {
        let bytes = self.bytes;
        let mut j = i + 1;
        while j < bytes.len() {
            match bytes[j] {
                b'`' => return Ok(j + 1),
                b'\\' => j = self.skip_escape(j),
                b => j += utf8_len(b),
            }
        }
        Err(ParseError::UnterminatedSubstitution(i))
    }

    fn skip_dollar(&self, i: usize) -> Result<usize, ParseError> {
        match self.bytes.get(i + 1) {
            Some(b'(') => self.skip_balanced(i + 1, b'(', b')'),
            Some(b'{') => self.skip_balanced(i + 1, b'{', b'}'),
            Some(b'\'') => self.skip_single_quote(i + 1),
            Some(b'"') => self.skip_double_quote(i + 1),
            _ => Ok(i + 1),
        }
    }

    fn skip_balanced(&self, open: usize, open_b: u8, close_b: u8) -> Result<usize, ParseError> {
        let bytes = self.bytes;
        let mut depth = 0usize;
        let mut j = open;
        while j < bytes.len() {
            let b = bytes[j];
            if b == open_b {
                depth += 1;
                j += 1;
            } else if b == close_b {
                depth -= 1;
                j += 1;
                if depth == 0 {
                    return Ok(j);
                }
            } else {
                match b {
                    b'\\' => j = self.skip_escape(j),
                    b'\'' => j = self.skip_single_quote(j)?,
                    b'"' => j = self.skip_double_quote(j)?,
                    b'`' => j = self.skip_backtick(j)?,
                    _ => j += utf8_len(b),
                }
            }
        }
        Err(ParseError::UnterminatedSubstitution(open.saturating_sub(1)))
    }
}

/// Whole word is a quoted string or command substitution.
fn is_protected(word: &str) -> bool {
    if word.len() < 2 {
        return false;
    }
    (word.starts_with('"') && word.ends_with('"'))
        || (word.starts_with('\'') && word.ends_with('\''))
        || (word.starts_with("$(") && word.ends_with(')'))
        || (word.starts_with('`') && word.ends_with('`'))
}

/// Heredoc delimiters compare against their quote-removed spelling.
fn strip_word_quoting(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => {}
            '\\' => {
                if let Some(n) = chars.next() {
                    out.push(n);
                }
            }
            _ => out.push(c),
        }
    }
    out
}

fn utf8_len(b: u8) -> usize {
    match b {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf4 => 4,
        _ => 1,
    }
}
