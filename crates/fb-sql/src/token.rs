//! Statement tokenizer.
//!
//! Whitespace and comments are dropped; every other token keeps its byte
//! span so callers can slice the original text.

use crate::error::ParseError;

/// Kind of a token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    /// Unquoted identifier or keyword.
    Identifier,
    /// `"quoted"` identifier, `""` escaping a quote.
    QuotedIdentifier,
    /// `'string'` literal, `''` escaping a quote.
    StringLiteral,
    /// Numeric literal.
    Number,
    /// `?` or `:name`.
    Parameter,
    /// `,`
    Comma,
    /// `(`
    LeftParen,
    /// `)`
    RightParen,
    /// `;`
    Semicolon,
    /// `.`
    Dot,
    /// `*`
    Star,
    /// Any other punctuation character.
    Operator,
}

/// A token with its byte span in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Token kind.
    pub kind: TokenKind,
    /// Source text of the token.
    pub text: &'a str,
    /// Byte offset of the first character.
    pub start: usize,
    /// Byte offset after the last character.
    pub end: usize,
}

impl Token<'_> {
    /// Whether this is an unquoted identifier equal to `keyword`, ignoring case.
    #[must_use]
    pub fn is_keyword(&self, keyword: &str) -> bool {
        self.kind == TokenKind::Identifier && self.text.eq_ignore_ascii_case(keyword)
    }

    /// Whether this is an operator token with the given text.
    #[must_use]
    pub fn is_operator(&self, op: &str) -> bool {
        self.kind == TokenKind::Operator && self.text == op
    }
}

/// Splits statement text into tokens.
pub struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
}

impl<'a> Tokenizer<'a> {
    /// Create a tokenizer over `src`.
    #[must_use]
    pub fn new(src: &'a str) -> Self {
        Self { src, pos: 0 }
    }

    /// Tokenize the entire input.
    pub fn tokenize(src: &'a str) -> Result<Vec<Token<'a>>, ParseError> {
        let mut tokenizer = Self::new(src);
        let mut tokens = Vec::new();
        while let Some(token) = tokenizer.next_token()? {
            tokens.push(token);
        }
        Ok(tokens)
    }

    /// Produce the next token, or `None` at the end of input.
    pub fn next_token(&mut self) -> Result<Option<Token<'a>>, ParseError> {
        self.skip_whitespace_and_comments()?;
        let Some(ch) = self.peek() else {
            return Ok(None);
        };
        let start = self.pos;

        let kind = match ch {
            '\'' => {
                self.scan_quoted('\'').ok_or(ParseError::UnterminatedString(start))?;
                TokenKind::StringLiteral
            }
            '"' => {
                self.scan_quoted('"').ok_or(ParseError::UnterminatedIdentifier(start))?;
                TokenKind::QuotedIdentifier
            }
            '0'..='9' => {
                self.scan_number();
                TokenKind::Number
            }
            '.' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => {
                self.scan_number();
                TokenKind::Number
            }
            '?' => {
                self.advance();
                TokenKind::Parameter
            }
            ':' if self.peek_at(1).is_some_and(is_identifier_start) => {
                self.advance();
                self.scan_identifier();
                TokenKind::Parameter
            }
            c if is_identifier_start(c) => {
                self.scan_identifier();
                TokenKind::Identifier
            }
            ',' => self.single(TokenKind::Comma),
            '(' => self.single(TokenKind::LeftParen),
            ')' => self.single(TokenKind::RightParen),
            ';' => self.single(TokenKind::Semicolon),
            '.' => self.single(TokenKind::Dot),
            '*' => self.single(TokenKind::Star),
            _ => self.single(TokenKind::Operator),
        };

        Ok(Some(Token {
            kind,
            text: &self.src[start..self.pos],
            start,
            end: self.pos,
        }))
    }

    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn peek_at(&self, n: usize) -> Option<char> {
        self.src[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) {
        if let Some(c) = self.peek() {
            self.pos += c.len_utf8();
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.advance();
        kind
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), ParseError> {
        loop {
            match (self.peek(), self.peek_at(1)) {
                (Some(c), _) if c.is_whitespace() => self.advance(),
                (Some('-'), Some('-')) => match self.src[self.pos..].find('\n') {
                    Some(n) => self.pos += n + 1,
                    None => self.pos = self.src.len(),
                },
                (Some('/'), Some('*')) => {
                    let start = self.pos;
                    match self.src[self.pos + 2..].find("*/") {
                        Some(n) => self.pos += n + 4,
                        None => return Err(ParseError::UnterminatedComment(start)),
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    /// Scan a quoted token where a doubled quote escapes itself.
    fn scan_quoted(&mut self, quote: char) -> Option<()> {
        self.advance();
        loop {
            let c = self.peek()?;
            self.advance();
            if c == quote {
                if self.peek() == Some(quote) {
                    self.advance();
                } else {
                    return Some(());
                }
            }
        }
    }

    fn scan_number(&mut self) {
        while self.peek().is_some_and(|c| c.is_ascii_digit() || c == '.') {
            self.advance();
        }
        if matches!(self.peek(), Some('e' | 'E')) {
            let sign = usize::from(matches!(self.peek_at(1), Some('+' | '-')));
            if self.peek_at(1 + sign).is_some_and(|c| c.is_ascii_digit()) {
                for _ in 0..=sign {
                    self.advance();
                }
                while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                    self.advance();
                }
            }
        }
    }

    fn scan_identifier(&mut self) {
        while self.peek().is_some_and(is_identifier_part) {
            self.advance();
        }
    }
}

fn is_identifier_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_identifier_part(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn kinds(sql: &str) -> Vec<(TokenKind, &str)> {
        Tokenizer::tokenize(sql)
            .unwrap()
            .into_iter()
            .map(|t| (t.kind, t.text))
            .collect()
    }

    #[test]
    fn test_basic_tokens() {
        assert_eq!(
            kinds("select a.b, 'x''y', 1.5e-3 from RDB$DATABASE where c = ?"),
            vec![
                (TokenKind::Identifier, "select"),
                (TokenKind::Identifier, "a"),
                (TokenKind::Dot, "."),
                (TokenKind::Identifier, "b"),
                (TokenKind::Comma, ","),
                (TokenKind::StringLiteral, "'x''y'"),
                (TokenKind::Comma, ","),
                (TokenKind::Number, "1.5e-3"),
                (TokenKind::Identifier, "from"),
                (TokenKind::Identifier, "RDB$DATABASE"),
                (TokenKind::Identifier, "where"),
                (TokenKind::Identifier, "c"),
                (TokenKind::Operator, "="),
                (TokenKind::Parameter, "?"),
            ]
        );
    }

    #[test]
    fn test_comments_skipped() {
        assert_eq!(
            kinds("/* lead */ insert -- tail\n into t"),
            vec![
                (TokenKind::Identifier, "insert"),
                (TokenKind::Identifier, "into"),
                (TokenKind::Identifier, "t"),
            ]
        );
        assert!(kinds("-- only a comment").is_empty());
    }

    #[test]
    fn test_quoted_identifier_and_named_parameter() {
        assert_eq!(
            kinds("\"my \"\"table\"\" \" :id"),
            vec![
                (TokenKind::QuotedIdentifier, "\"my \"\"table\"\" \""),
                (TokenKind::Parameter, ":id"),
            ]
        );
    }

    #[test]
    fn test_unterminated() {
        assert_eq!(Tokenizer::tokenize("select 'abc"), Err(ParseError::UnterminatedString(7)));
        assert_eq!(Tokenizer::tokenize("\"abc"), Err(ParseError::UnterminatedIdentifier(0)));
        assert_eq!(Tokenizer::tokenize("a /* b"), Err(ParseError::UnterminatedComment(2)));
    }

    #[test]
    fn test_spans_slice_source() {
        let sql = "update  t  set x=1";
        for token in Tokenizer::tokenize(sql).unwrap() {
            assert_eq!(&sql[token.start..token.end], token.text);
        }
    }
}
