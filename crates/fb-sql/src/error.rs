//! Error types for statement parsing and rewriting.

use thiserror::Error;

/// Errors from tokenizing statement text.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// A string literal has no closing quote.
    #[error("unterminated string literal starting at offset {0}")]
    UnterminatedString(usize),

    /// A quoted identifier has no closing quote.
    #[error("unterminated quoted identifier starting at offset {0}")]
    UnterminatedIdentifier(usize),

    /// A block comment has no closing `*/`.
    #[error("unterminated block comment starting at offset {0}")]
    UnterminatedComment(usize),
}

/// Errors from building a generated-keys query.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum GeneratedKeysError {
    /// No columns were requested.
    #[error("generated keys column list is empty")]
    EmptyColumnList,

    /// A requested column name is blank.
    #[error("generated keys column at position {0} is blank")]
    BlankColumnName(usize),
}
