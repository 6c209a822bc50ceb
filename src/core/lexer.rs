// sql lexer - postgres dialect, one pass over the bytes
//
// every delimiter we care about is ascii, so scanning bytes is safe: a
// multi-byte utf-8 sequence never contains an ascii byte, and we only ever
// slice at ascii positions. non-ascii bytes count as identifier characters,
// same as postgres itself.

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// keyword or unquoted identifier
    Word,
    /// "double quoted" identifier
    QuotedIdent,
    /// any string literal: '...', E'...', $tag$...$tag$
    String,
    Number,
    /// positional parameter like $1
    Param,
    LParen,
    RParen,
    Comma,
    Dot,
    Semicolon,
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub text: &'a str,
    /// byte offset into the input
    pub offset: usize,
}

impl Token<'_> {
    /// Case-insensitive match against an unquoted word.
    pub fn is_word(&self, word: &str) -> bool {
        self.kind == TokenKind::Word && self.text.eq_ignore_ascii_case(word)
    }

    pub fn is_name(&self) -> bool {
        matches!(self.kind, TokenKind::Word | TokenKind::QuotedIdent)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LexError {
    #[error("unterminated string literal starting at byte {offset}")]
    UnterminatedString { offset: usize },

    #[error("unterminated quoted identifier starting at byte {offset}")]
    UnterminatedIdentifier { offset: usize },

    #[error("unterminated block comment starting at byte {offset}")]
    UnterminatedComment { offset: usize },

    #[error("unterminated dollar-quoted string starting at byte {offset}")]
    UnterminatedDollarQuote { offset: usize },

    #[error("closing parenthesis without a matching opening one at byte {offset}")]
    UnbalancedParen { offset: usize },

    #[error("parenthesis opened at byte {offset} is never closed")]
    UnclosedParen { offset: usize },

    #[error("trailing junk after numeric literal starting at byte {offset}")]
    TrailingJunk { offset: usize },

    #[error("unsupported character {ch:?} at byte {offset}")]
    UnsupportedChar { ch: char, offset: usize },
}

/// Turns sql text into a token stream. The validator only talks to this
/// trait so a test double can stand in for the real lexer.
pub trait Tokenize {
    fn tokenize<'a>(&self, sql: &'a str) -> Result<Vec<Token<'a>>, LexError>;
}

/// PostgreSQL lexer. Comments and whitespace never make it into the output.
#[derive(Debug, Clone, Copy, Default)]
pub struct Lexer;

impl Tokenize for Lexer {
    fn tokenize<'a>(&self, sql: &'a str) -> Result<Vec<Token<'a>>, LexError> {
        Scanner::new(sql).run()
    }
}

#[derive(Debug, Clone, Copy)]
enum State {
    Default,
    InSingleQuote { start: usize, backslash: bool },
    InDoubleQuote { start: usize },
    InLineComment,
    InBlockComment { start: usize, depth: usize },
    // the tag is sql[start..tag_end], delimiters included
    InDollarQuote { start: usize, tag_end: usize },
}

struct Scanner<'a> {
    sql: &'a str,
    bytes: &'a [u8],
    pos: usize,
    state: State,
    open_parens: Vec<usize>,
    tokens: Vec<Token<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            bytes: sql.as_bytes(),
            pos: 0,
            state: State::Default,
            open_parens: Vec::new(),
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Result<Vec<Token<'a>>, LexError> {
        while self.pos < self.bytes.len() {
            match self.state {
                State::Default => self.default()?,
                State::InSingleQuote { start, backslash } => self.single_quote(start, backslash),
                State::InDoubleQuote { start } => self.double_quote(start),
                State::InLineComment => {
                    if self.bytes[self.pos] == b'\n' {
                        self.state = State::Default;
                    }
                    self.pos += 1;
                }
                State::InBlockComment { start, depth } => self.block_comment(start, depth),
                State::InDollarQuote { start, tag_end } => self.dollar_quote(start, tag_end),
            }
        }

        // a line comment may run to the end of input; every other state
        // left open means the input is cut off
        match self.state {
            State::Default | State::InLineComment => {}
            State::InSingleQuote { start, .. } => {
                return Err(LexError::UnterminatedString { offset: start });
            }
            State::InDoubleQuote { start } => {
                return Err(LexError::UnterminatedIdentifier { offset: start });
            }
            State::InBlockComment { start, .. } => {
                return Err(LexError::UnterminatedComment { offset: start });
            }
            State::InDollarQuote { start, .. } => {
                return Err(LexError::UnterminatedDollarQuote { offset: start });
            }
        }

        if let Some(&offset) = self.open_parens.last() {
            return Err(LexError::UnclosedParen { offset });
        }

        Ok(self.tokens)
    }

    fn peek(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize, end: usize) {
        self.tokens.push(Token {
            kind,
            text: &self.sql[start..end],
            offset: start,
        });
    }

    fn single(&mut self, kind: TokenKind) {
        self.push(kind, self.pos, self.pos + 1);
        self.pos += 1;
    }

    fn default(&mut self) -> Result<(), LexError> {
        let start = self.pos;
        let b = self.bytes[start];

        match b {
            b' ' | b'\t' | b'\n' | b'\r' | 0x0c => self.pos += 1,
            b'-' if self.peek(1) == Some(b'-') => {
                self.state = State::InLineComment;
                self.pos += 2;
            }
            b'/' if self.peek(1) == Some(b'*') => {
                self.state = State::InBlockComment { start, depth: 1 };
                self.pos += 2;
            }
            b'\'' => self.open_string(start, 1, false),
            b'e' | b'E' if self.peek(1) == Some(b'\'') => self.open_string(start, 2, true),
            b'b' | b'B' | b'x' | b'X' | b'n' | b'N' if self.peek(1) == Some(b'\'') => {
                self.open_string(start, 2, false)
            }
            b'u' | b'U' if self.peek(1) == Some(b'&') && self.peek(2) == Some(b'\'') => {
                self.open_string(start, 3, false)
            }
            b'u' | b'U' if self.peek(1) == Some(b'&') && self.peek(2) == Some(b'"') => {
                self.state = State::InDoubleQuote { start };
                self.pos += 3;
            }
            b'"' => {
                self.state = State::InDoubleQuote { start };
                self.pos += 1;
            }
            b'$' => self.dollar(start)?,
            b'(' => {
                self.open_parens.push(start);
                self.single(TokenKind::LParen);
            }
            b')' => {
                if self.open_parens.pop().is_none() {
                    return Err(LexError::UnbalancedParen { offset: start });
                }
                self.single(TokenKind::RParen);
            }
            b';' => self.single(TokenKind::Semicolon),
            b',' => self.single(TokenKind::Comma),
            b'.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.number(start)?,
            b'.' => self.single(TokenKind::Dot),
            b'0'..=b'9' => self.number(start)?,
            _ if is_word_start(b) => {
                self.pos += 1;
                while self.pos < self.bytes.len() && is_word_char(self.bytes[self.pos]) {
                    self.pos += 1;
                }
                self.push(TokenKind::Word, start, self.pos);
            }
            // mysql identifier quoting, not part of the dialect
            b'`' => {
                return Err(LexError::UnsupportedChar {
                    ch: '`',
                    offset: start,
                });
            }
            _ if b.is_ascii_control() => {
                return Err(LexError::UnsupportedChar {
                    ch: b as char,
                    offset: start,
                });
            }
            _ => self.single(TokenKind::Operator),
        }

        Ok(())
    }

    fn open_string(&mut self, start: usize, prefix: usize, backslash: bool) {
        self.state = State::InSingleQuote { start, backslash };
        self.pos += prefix;
    }

    fn single_quote(&mut self, start: usize, backslash: bool) {
        match self.bytes[self.pos] {
            b'\\' if backslash => self.pos += 2,
            b'\'' if self.peek(1) == Some(b'\'') => self.pos += 2,
            b'\'' => {
                self.pos += 1;
                self.push(TokenKind::String, start, self.pos);
                self.state = State::Default;
            }
            _ => self.pos += 1,
        }
    }

    fn double_quote(&mut self, start: usize) {
        match self.bytes[self.pos] {
            b'"' if self.peek(1) == Some(b'"') => self.pos += 2,
            b'"' => {
                self.pos += 1;
                self.push(TokenKind::QuotedIdent, start, self.pos);
                self.state = State::Default;
            }
            _ => self.pos += 1,
        }
    }

    fn block_comment(&mut self, start: usize, depth: usize) {
        let b = self.bytes[self.pos];
        if b == b'/' && self.peek(1) == Some(b'*') {
            self.state = State::InBlockComment {
                start,
                depth: depth + 1,
            };
            self.pos += 2;
        } else if b == b'*' && self.peek(1) == Some(b'/') {
            self.state = if depth == 1 {
                State::Default
            } else {
                State::InBlockComment {
                    start,
                    depth: depth - 1,
                }
            };
            self.pos += 2;
        } else {
            self.pos += 1;
        }
    }

    // `$1` is a parameter, `$tag$` or `$$` opens a dollar quote,
    // anything else is not valid sql
    fn dollar(&mut self, start: usize) -> Result<(), LexError> {
        if self.peek(1).is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
            while self.pos < self.bytes.len() && self.bytes[self.pos].is_ascii_digit() {
                self.pos += 1;
            }
            self.push(TokenKind::Param, start, self.pos);
            return Ok(());
        }

        let mut end = start + 1;
        if end < self.bytes.len() && is_word_start(self.bytes[end]) {
            end += 1;
            while end < self.bytes.len()
                && self.bytes[end] != b'$'
                && is_word_char(self.bytes[end])
            {
                end += 1;
            }
        }

        if self.bytes.get(end) == Some(&b'$') {
            self.state = State::InDollarQuote {
                start,
                tag_end: end + 1,
            };
            self.pos = end + 1;
            Ok(())
        } else {
            Err(LexError::UnsupportedChar {
                ch: '$',
                offset: start,
            })
        }
    }

    fn dollar_quote(&mut self, start: usize, tag_end: usize) {
        let tag = &self.bytes[start..tag_end];
        if self.bytes[self.pos..].starts_with(tag) {
            self.pos += tag.len();
            self.push(TokenKind::String, start, self.pos);
            self.state = State::Default;
        } else {
            self.pos += 1;
        }
    }

    // 42, 1_000, 1.5, .5, 1e-3, 0x1F, 0o17, 0b101. a letter glued to the end
    // is an error like in postgres 15+, older servers split `1from` into
    // `1 from`
    fn number(&mut self, start: usize) -> Result<(), LexError> {
        let radix = match (self.bytes[start], self.peek(1)) {
            (b'0', Some(b'x' | b'X')) => 16,
            (b'0', Some(b'o' | b'O')) => 8,
            (b'0', Some(b'b' | b'B')) => 2,
            _ => 10,
        };

        if radix != 10 {
            self.pos += 2;
            self.eat(|c| c == b'_' || char::from(c).is_digit(radix));
        } else {
            self.eat(|c| c == b'_' || c.is_ascii_digit());
            if self.peek(0) == Some(b'.') && self.peek(1) != Some(b'.') {
                self.pos += 1;
                self.eat(|c| c == b'_' || c.is_ascii_digit());
            }
            if matches!(self.peek(0), Some(b'e' | b'E')) {
                let sign = usize::from(matches!(self.peek(1), Some(b'+' | b'-')));
                if self.peek(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                    self.pos += 1 + sign;
                    self.eat(|c| c == b'_' || c.is_ascii_digit());
                }
            }
        }

        if self.peek(0).is_some_and(is_word_char) {
            return Err(LexError::TrailingJunk { offset: start });
        }
        self.push(TokenKind::Number, start, self.pos);
        Ok(())
    }

    fn eat(&mut self, keep: impl Fn(u8) -> bool) {
        while self.peek(0).is_some_and(&keep) {
            self.pos += 1;
        }
    }
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_word_char(b: u8) -> bool {
    is_word_start(b) || b.is_ascii_digit() || b == b'$'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<TokenKind> {
        Lexer.tokenize(sql).unwrap().iter().map(|t| t.kind).collect()
    }

    #[test]
    fn test_dollar_tag_needs_closing_delimiter() {
        assert!(matches!(
            Lexer.tokenize("SELECT $abc"),
            Err(LexError::UnsupportedChar { ch: '$', .. })
        ));
    }

    #[test]
    fn test_nested_dollar_tags() {
        let tokens = Lexer
            .tokenize("SELECT $a$ $b$ inner $b$ $a$")
            .unwrap();
        assert_eq!(tokens.len(), 2);
        assert_eq!(tokens[1].text, "$a$ $b$ inner $b$ $a$");
    }

    #[test]
    fn test_backslash_escape_only_in_e_strings() {
        // standard strings treat backslash literally, so this one ends early
        assert_eq!(
            kinds(r"SELECT 'a\' , 1"),
            vec![
                TokenKind::Word,
                TokenKind::String,
                TokenKind::Comma,
                TokenKind::Number
            ]
        );
        assert!(Lexer.tokenize(r"SELECT E'a\' , 1").is_err());
    }

    #[test]
    fn test_word_with_dollar_inside() {
        let tokens = Lexer.tokenize("SELECT a$b").unwrap();
        assert_eq!(tokens[1].text, "a$b");
    }
}
