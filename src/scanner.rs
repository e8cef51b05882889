//! Hand-rolled scanner for the Jake language.
//!
//! The [`Scanner`] works a token at a time: the compiler pulls tokens with
//! [`Scanner::scan_token`] as it parses, so no token buffer is ever built.
//! Each call skips leading whitespace and `//` comments and returns the next
//! token, [`TokenType::EndOfFile`] at the end of input, or
//! [`TokenType::Error`] on an unrecognised character or unterminated string.
//!
//! # Error Handling
//!
//! The scanner reports at most one error.  An unterminated string records a
//! message retrievable with [`Scanner::take_error`]; the parser turns it into
//! the compile error.  An unrecognised character yields a bare `Error` token
//! with no message, which the parser reports as a generic syntax failure.

use crate::token::{keyword, Token, TokenType};

/// Length in bytes of the UTF-8 sequence starting with `lead`.
fn utf8_len(lead: u8) -> usize {
    match lead {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xff => 4,
        // Continuation bytes are never a sequence start in valid UTF-8.
        _ => 1,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Scanner struct
// ─────────────────────────────────────────────────────────────────────────────

/// The Jake lexical scanner.
///
/// Operates on raw bytes; Jake source is ASCII-oriented (identifiers,
/// numbers and operators are all ASCII) and string literals pass non-ASCII
/// bytes through untouched.
pub struct Scanner<'src> {
    source: &'src str,
    /// Byte offset of the first character of the token being scanned.
    start: usize,
    /// Byte offset of the next character to consume.
    current: usize,
    /// Current source line (1-indexed, incremented on `\n`).
    pub line: u32,
    /// Pending error message for a failure the scanner itself diagnosed.
    error: Option<String>,
}

impl<'src> Scanner<'src> {
    /// Create a new scanner over the given source text.
    pub fn new(source: &'src str) -> Self {
        Self {
            source,
            start: 0,
            current: 0,
            line: 1,
            error: None,
        }
    }

    /// Take the pending scan-error message, if the last `Error` token came
    /// with one.
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Character helpers
    // ─────────────────────────────────────────────────────────────────────────

    #[inline]
    fn is_at_end(&self) -> bool {
        self.current >= self.source.len()
    }

    #[inline]
    fn peek(&self) -> u8 {
        *self.source.as_bytes().get(self.current).unwrap_or(&0)
    }

    #[inline]
    fn peek_next(&self) -> u8 {
        *self.source.as_bytes().get(self.current + 1).unwrap_or(&0)
    }

    #[inline]
    fn advance(&mut self) -> u8 {
        let byte = self.peek();
        // Step over the whole UTF-8 sequence so token slices always land on
        // character boundaries.  Non-ASCII only shows up inside string
        // literals or as a stray (error) character.
        self.current += utf8_len(byte);
        byte
    }

    /// Consume the next character only if it equals `expected`.
    fn matches(&mut self, expected: u8) -> bool {
        if self.is_at_end() || self.peek() != expected {
            return false;
        }
        self.current += 1;
        true
    }

    fn skip_whitespace(&mut self) {
        loop {
            match self.peek() {
                b' ' | b'\t' | b'\r' => {
                    self.advance();
                }
                b'\n' => {
                    self.line += 1;
                    self.advance();
                }
                b'/' if self.peek_next() == b'/' => {
                    while self.peek() != b'\n' && !self.is_at_end() {
                        self.advance();
                    }
                }
                _ => return,
            }
        }
    }

    #[inline]
    fn make_token(&self, kind: TokenType) -> Token<'src> {
        Token::new(kind, &self.source[self.start..self.current], self.line)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sub-scanners
    // ─────────────────────────────────────────────────────────────────────────

    fn scan_number(&mut self) -> Token<'src> {
        while self.peek().is_ascii_digit() {
            self.advance();
        }

        if self.peek() == b'.' && self.peek_next().is_ascii_digit() {
            self.advance();
            while self.peek().is_ascii_digit() {
                self.advance();
            }
        }

        self.make_token(TokenType::Number)
    }

    /// Scan a string literal.  The opening quote has already been consumed;
    /// the closing quote must match it.  Strings may not span lines.
    fn scan_string(&mut self, opener: u8) -> Token<'src> {
        while self.peek() != opener {
            if self.peek() == b'\n' || self.is_at_end() {
                self.error = Some("String literal does not end".to_string());
                return self.make_token(TokenType::Error);
            }
            self.advance();
        }

        self.advance();
        self.make_token(TokenType::String)
    }

    fn scan_identifier(&mut self) -> Token<'src> {
        while self.peek().is_ascii_alphanumeric() || self.peek() == b'_' {
            self.advance();
        }
        let text = &self.source[self.start..self.current];
        self.make_token(keyword(text).unwrap_or(TokenType::Identifier))
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Entry point
    // ─────────────────────────────────────────────────────────────────────────

    /// Scan and return the next token.
    pub fn scan_token(&mut self) -> Token<'src> {
        self.skip_whitespace();
        self.start = self.current;

        if self.is_at_end() {
            return self.make_token(TokenType::EndOfFile);
        }

        let c = self.advance();

        if c.is_ascii_digit() {
            return self.scan_number();
        }
        if c.is_ascii_alphabetic() || c == b'_' {
            return self.scan_identifier();
        }
        if c == b'"' || c == b'\'' {
            return self.scan_string(c);
        }

        match c {
            b'(' => self.make_token(TokenType::LeftParen),
            b')' => self.make_token(TokenType::RightParen),
            b'{' => self.make_token(TokenType::LeftBrace),
            b'}' => self.make_token(TokenType::RightBrace),
            b',' => self.make_token(TokenType::Comma),
            b';' => self.make_token(TokenType::Semicolon),

            b'+' => {
                let kind = if self.matches(b'=') {
                    TokenType::PlusEqual
                } else {
                    TokenType::Plus
                };
                self.make_token(kind)
            }
            b'-' => {
                let kind = if self.matches(b'=') {
                    TokenType::MinusEqual
                } else {
                    TokenType::Minus
                };
                self.make_token(kind)
            }
            b'/' => {
                let kind = if self.matches(b'=') {
                    TokenType::SlashEqual
                } else {
                    TokenType::Slash
                };
                self.make_token(kind)
            }
            b'*' => {
                let kind = if self.matches(b'=') {
                    TokenType::AsteriskEqual
                } else {
                    TokenType::Asterisk
                };
                self.make_token(kind)
            }
            b'!' => {
                let kind = if self.matches(b'=') {
                    TokenType::BangEqual
                } else {
                    TokenType::Bang
                };
                self.make_token(kind)
            }
            b'=' => {
                let kind = if self.matches(b'=') {
                    TokenType::EqualEqual
                } else {
                    TokenType::Equal
                };
                self.make_token(kind)
            }
            b'>' => {
                let kind = if self.matches(b'=') {
                    TokenType::GreaterEqual
                } else {
                    TokenType::Greater
                };
                self.make_token(kind)
            }
            b'<' => {
                let kind = if self.matches(b'=') {
                    TokenType::LessEqual
                } else {
                    TokenType::Less
                };
                self.make_token(kind)
            }

            // A leading `.` followed by a digit starts a number (`.5`).
            b'.' => {
                if self.peek().is_ascii_digit() {
                    self.scan_number()
                } else {
                    self.make_token(TokenType::Dot)
                }
            }

            _ => self.make_token(TokenType::Error),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
