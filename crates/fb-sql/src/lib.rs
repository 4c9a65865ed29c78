//! # fb-sql
//!
//! Statement type detection and generated-keys rewriting for Firebird SQL.
//!
//! This crate does not validate SQL. It tokenizes statement text, finds
//! the statement type and target table of DML statements, detects an
//! existing `RETURNING` clause, and appends one when generated keys are
//! requested.
//!
//! ## Example
//!
//! ```rust
//! use fb_sql::{GeneratedKeysQueryBuilder, QuoteStrategy, StatementType};
//!
//! let builder = GeneratedKeysQueryBuilder::new("INSERT INTO orders (item) VALUES (?)");
//! assert_eq!(
//!     builder.statement_info().map(|i| i.statement_type),
//!     Some(StatementType::Insert)
//! );
//!
//! let query = builder
//!     .for_column_names(&["ID"], QuoteStrategy::for_dialect(3))
//!     .unwrap();
//! assert_eq!(query.sql(), "INSERT INTO orders (item) VALUES (?)\nRETURNING \"ID\"");
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod error;
pub mod generated_keys;
pub mod parser;
pub mod token;

pub use error::{GeneratedKeysError, ParseError};
pub use generated_keys::{GeneratedKeysQuery, GeneratedKeysQueryBuilder, QuoteStrategy};
pub use parser::{StatementInfo, StatementType, parse};
pub use token::{Token, TokenKind, Tokenizer};
