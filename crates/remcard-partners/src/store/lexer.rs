//! Tokenizer for the JavaScript literal subset used by the record file.
//!
//! The record file is a module that assigns an array of object literals. We
//! only need enough of the language to find keys, numbers and the array
//! brackets without being fooled by string contents or comments, so the
//! tokenizer understands:
//!
//! - identifiers (`id`, `null`, `const`, ...)
//! - numeric literals (kept as source text)
//! - single, double and template strings, with escapes decoded
//! - `//` and `/* */` comments (skipped)
//! - any other non-whitespace character as single-character punctuation
//!
//! Template literal interpolations (`${...}`) are kept verbatim; the record
//! file never uses them.

use crate::{Error, Result};

/// A lexical token and the byte range it occupies in the source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind<'a>,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TokenKind<'a> {
    Ident(&'a str),
    Number(&'a str),
    /// Decoded string value.
    Str(String),
    Punct(char),
}

impl Token<'_> {
    pub fn is_punct(&self, c: char) -> bool {
        self.kind == TokenKind::Punct(c)
    }

    /// Whether this token can act as the object key `name`, either bare or
    /// quoted.
    pub fn is_key(&self, name: &str) -> bool {
        match &self.kind {
            TokenKind::Ident(ident) => *ident == name,
            TokenKind::Str(value) => value == name,
            _ => false,
        }
    }
}

/// Tokenizes `src` completely.
///
/// Fails with [`Error::MalformedStore`] on unterminated strings or comments
/// and on invalid escape sequences.
pub fn tokenize(src: &str) -> Result<Vec<Token<'_>>> {
    let mut lexer = Lexer { src, pos: 0 };
    let mut tokens = Vec::new();
    while let Some(token) = lexer.next_token()? {
        tokens.push(token);
    }
    Ok(tokens)
}

struct Lexer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.src[self.pos..].chars();
        chars.next();
        chars.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn error(&self, reason: impl core::fmt::Display) -> Error {
        Error::MalformedStore {
            reason: format!("{reason} at byte {}", self.pos),
        }
    }

    fn next_token(&mut self) -> Result<Option<Token<'a>>> {
        self.skip_trivia()?;
        let src = self.src;
        let start = self.pos;
        let Some(c) = self.peek() else {
            return Ok(None);
        };

        let kind = match c {
            '"' | '\'' | '`' => {
                self.bump();
                TokenKind::Str(self.string_body(c)?)
            }
            c if c.is_ascii_digit() => {
                while self
                    .peek()
                    .is_some_and(|c| c.is_ascii_alphanumeric() || c == '.' || c == '_')
                {
                    self.bump();
                }
                TokenKind::Number(&src[start..self.pos])
            }
            c if is_ident_start(c) => {
                while self.peek().is_some_and(is_ident_continue) {
                    self.bump();
                }
                TokenKind::Ident(&src[start..self.pos])
            }
            c => {
                self.bump();
                TokenKind::Punct(c)
            }
        };

        Ok(Some(Token {
            kind,
            start,
            end: self.pos,
        }))
    }

    fn skip_trivia(&mut self) -> Result<()> {
        loop {
            match (self.peek(), self.peek_second()) {
                (Some(c), _) if c.is_whitespace() || c == '\u{feff}' => {
                    self.bump();
                }
                (Some('/'), Some('/')) => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.bump();
                    }
                }
                (Some('/'), Some('*')) => {
                    let opened = self.pos;
                    self.pos += 2;
                    match self.src[self.pos..].find("*/") {
                        Some(offset) => self.pos += offset + 2,
                        None => {
                            self.pos = opened;
                            return Err(self.error("unterminated block comment"));
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    fn string_body(&mut self, quote: char) -> Result<String> {
        let mut out = String::new();
        // High surrogate waiting for its pair from a `\uXXXX` escape.
        let mut pending_high: Option<u16> = None;

        loop {
            let Some(c) = self.bump() else {
                return Err(self.error("unterminated string literal"));
            };

            if c != '\\' {
                flush_surrogate(&mut out, &mut pending_high);
                if c == quote {
                    return Ok(out);
                }
                if (c == '\n' || c == '\r') && quote != '`' {
                    return Err(self.error("line break inside string literal"));
                }
                out.push(c);
                continue;
            }

            let Some(escaped) = self.bump() else {
                return Err(self.error("unterminated escape sequence"));
            };

            if escaped == 'u' {
                let unit = self.unicode_escape()?;
                match unit {
                    UnicodeEscape::Scalar(c) => {
                        flush_surrogate(&mut out, &mut pending_high);
                        out.push(c);
                    }
                    UnicodeEscape::Unit(unit) => {
                        if (0xD800..0xDC00).contains(&unit) {
                            flush_surrogate(&mut out, &mut pending_high);
                            pending_high = Some(unit);
                        } else if (0xDC00..0xE000).contains(&unit) {
                            match pending_high.take() {
                                Some(high) => {
                                    let scalar = 0x10000
                                        + ((u32::from(high) - 0xD800) << 10)
                                        + (u32::from(unit) - 0xDC00);
                                    out.push(
                                        char::from_u32(scalar).unwrap_or(char::REPLACEMENT_CHARACTER),
                                    );
                                }
                                None => out.push(char::REPLACEMENT_CHARACTER),
                            }
                        } else {
                            flush_surrogate(&mut out, &mut pending_high);
                            out.push(
                                char::from_u32(u32::from(unit))
                                    .unwrap_or(char::REPLACEMENT_CHARACTER),
                            );
                        }
                    }
                }
                continue;
            }

            flush_surrogate(&mut out, &mut pending_high);
            match escaped {
                'n' => out.push('\n'),
                'r' => out.push('\r'),
                't' => out.push('\t'),
                'b' => out.push('\u{8}'),
                'f' => out.push('\u{c}'),
                'v' => out.push('\u{b}'),
                '0' if !self.peek().is_some_and(|c| c.is_ascii_digit()) => out.push('\0'),
                'x' => {
                    let value = self.hex_digits(2)?;
                    out.push(char::from_u32(value).unwrap_or(char::REPLACEMENT_CHARACTER));
                }
                // Line continuation.
                '\n' => {}
                '\r' => {
                    if self.peek() == Some('\n') {
                        self.bump();
                    }
                }
                other => out.push(other),
            }
        }
    }

    fn unicode_escape(&mut self) -> Result<UnicodeEscape> {
        if self.peek() == Some('{') {
            self.bump();
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_hexdigit()) {
                self.bump();
            }
            let digits = &self.src[digits_start..self.pos];
            if self.bump() != Some('}') || digits.is_empty() {
                return Err(self.error("invalid \\u{...} escape"));
            }
            let value = u32::from_str_radix(digits, 16)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| self.error("\\u{...} escape out of range"))?;
            return Ok(UnicodeEscape::Scalar(value));
        }
        let unit = self.hex_digits(4)?;
        Ok(UnicodeEscape::Unit(unit as u16))
    }

    fn hex_digits(&mut self, count: usize) -> Result<u32> {
        let start = self.pos;
        for _ in 0..count {
            match self.peek() {
                Some(c) if c.is_ascii_hexdigit() => {
                    self.bump();
                }
                _ => return Err(self.error("invalid hex escape")),
            }
        }
        u32::from_str_radix(&self.src[start..self.pos], 16)
            .map_err(|_| self.error("invalid hex escape"))
    }
}

enum UnicodeEscape {
    Scalar(char),
    Unit(u16),
}

fn flush_surrogate(out: &mut String, pending: &mut Option<u16>) {
    if pending.take().is_some() {
        out.push(char::REPLACEMENT_CHARACTER);
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == '$'
}

fn is_ident_continue(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}
