//! `RETURNING` rewriting for generated-keys retrieval.

use crate::error::GeneratedKeysError;
use crate::parser::{StatementInfo, parse};

/// How column names are written into the `RETURNING` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuoteStrategy {
    /// Names are written as given (dialect 1, or names already quoted).
    NoQuotes,
    /// Names are double-quoted with embedded quotes doubled (dialect 3).
    Quoted,
}

impl QuoteStrategy {
    /// The strategy for a connection dialect.
    #[must_use]
    pub fn for_dialect(dialect: u8) -> Self {
        if dialect < 3 { Self::NoQuotes } else { Self::Quoted }
    }

    fn append(self, name: &str, out: &mut String) {
        match self {
            Self::NoQuotes => out.push_str(name),
            Self::Quoted => {
                out.push('"');
                out.push_str(&name.replace('"', "\"\""));
                out.push('"');
            }
        }
    }
}

/// A statement ready to execute, and whether it produces generated keys.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedKeysQuery {
    generates_keys: bool,
    sql: String,
}

impl GeneratedKeysQuery {
    /// Whether executing the statement returns a generated-keys row set.
    #[must_use]
    pub fn generates_keys(&self) -> bool {
        self.generates_keys
    }

    /// The statement text.
    #[must_use]
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Consume into the statement text.
    #[must_use]
    pub fn into_sql(self) -> String {
        self.sql
    }
}

/// Builds the statement text to execute for a generated-keys request.
///
/// A statement that already has a `RETURNING` clause is always used as is
/// and reports generated keys. Statements that cannot carry a clause, or
/// that fail to tokenize, are returned unchanged.
#[derive(Debug, Clone)]
pub struct GeneratedKeysQueryBuilder {
    sql: String,
    info: Option<StatementInfo>,
}

impl GeneratedKeysQueryBuilder {
    /// Analyze `sql`.
    pub fn new(sql: impl Into<String>) -> Self {
        let sql = sql.into();
        let info = match parse(&sql) {
            Ok(info) => Some(info),
            Err(e) => {
                tracing::debug!(error = %e, sql = %sql, "statement not parsed for generated keys");
                None
            }
        };
        Self { sql, info }
    }

    /// What the detector found, when the statement could be parsed.
    #[must_use]
    pub fn statement_info(&self) -> Option<&StatementInfo> {
        self.info.as_ref()
    }

    /// Whether the statement already has a `RETURNING` clause.
    #[must_use]
    pub fn has_returning(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.has_returning)
    }

    /// Whether a `RETURNING` clause can be added.
    #[must_use]
    pub fn is_supported_type(&self) -> bool {
        self.info.as_ref().is_some_and(|i| i.statement_type.supports_returning())
    }

    /// Query for a caller that did not ask for generated keys.
    #[must_use]
    pub fn for_no_generated_keys(&self) -> GeneratedKeysQuery {
        self.unchanged(self.has_returning())
    }

    /// Query returning all columns via `RETURNING *`.
    #[must_use]
    pub fn for_all_columns(&self) -> GeneratedKeysQuery {
        if self.has_returning() {
            return self.unchanged(true);
        }
        if !self.is_supported_type() {
            return self.unchanged(false);
        }
        self.with_returning(&["*"], QuoteStrategy::NoQuotes)
    }

    /// Query returning the named columns.
    pub fn for_column_names<S: AsRef<str>>(
        &self,
        columns: &[S],
        quote: QuoteStrategy,
    ) -> Result<GeneratedKeysQuery, GeneratedKeysError> {
        if self.has_returning() {
            return Ok(self.unchanged(true));
        }
        if columns.is_empty() {
            return Err(GeneratedKeysError::EmptyColumnList);
        }
        if let Some(position) = columns.iter().position(|c| c.as_ref().trim().is_empty()) {
            return Err(GeneratedKeysError::BlankColumnName(position));
        }
        if !self.is_supported_type() {
            return Ok(self.unchanged(false));
        }
        Ok(self.with_returning(columns, quote))
    }

    fn unchanged(&self, generates_keys: bool) -> GeneratedKeysQuery {
        GeneratedKeysQuery {
            generates_keys,
            sql: self.sql.clone(),
        }
    }

    fn with_returning<S: AsRef<str>>(&self, columns: &[S], quote: QuoteStrategy) -> GeneratedKeysQuery {
        // Drop trailing whitespace and at most one terminating ';'.
        let trimmed = self.sql.trim_end();
        let base = trimmed.strip_suffix(';').unwrap_or(trimmed);

        let mut sql = String::with_capacity(base.len() + 16 + columns.iter().map(|c| c.as_ref().len() + 3).sum::<usize>());
        sql.push_str(base);
        sql.push_str("\nRETURNING ");
        for (i, column) in columns.iter().enumerate() {
            if i > 0 {
                sql.push(',');
            }
            quote.append(column.as_ref(), &mut sql);
        }
        GeneratedKeysQuery {
            generates_keys: true,
            sql,
        }
    }
}
