//! Statement type detection.
//!
//! A small recursive-descent pass over the token stream. It recognizes the
//! leading shape of DML statements (target table, column and value lists)
//! and whether the statement already carries a `RETURNING` clause. Anything
//! it does not recognize is classified as [`StatementType::Other`] rather
//! than rejected.
//!
//! `RETURNING` is not a reserved word: `update returning set returning = 1`
//! is valid. A `returning` token opens the clause only at nesting depth 0,
//! after a token that ends an operand and before a token that starts one.

use crate::error::ParseError;
use crate::token::{Token, TokenKind, Tokenizer};

/// Classification of a statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementType {
    /// `SELECT` or `WITH ... SELECT`.
    Select,
    /// `EXECUTE PROCEDURE`.
    ExecuteProcedure,
    /// `UPDATE`.
    Update,
    /// `DELETE`.
    Delete,
    /// `INSERT`.
    Insert,
    /// `UPDATE OR INSERT`.
    UpdateOrInsert,
    /// `MERGE`.
    Merge,
    /// A recognized but unsupported statement.
    Other,
    /// Empty statement text.
    Unknown,
}

impl StatementType {
    /// Whether a `RETURNING` clause can be appended to this statement type.
    #[must_use]
    pub fn supports_returning(self) -> bool {
        matches!(
            self,
            Self::Insert | Self::Update | Self::Delete | Self::UpdateOrInsert | Self::Merge
        )
    }
}

/// What the detector found in a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatementInfo {
    /// Statement classification.
    pub statement_type: StatementType,
    /// Target table as written, including quotes.
    pub table_name: Option<String>,
    /// Explicit column list of `INSERT`/`UPDATE OR INSERT`, or assigned
    /// columns of `UPDATE`.
    pub columns: Vec<String>,
    /// Value expressions matching `columns`, as written.
    pub values: Vec<String>,
    /// Items of an existing `RETURNING` clause, as written.
    pub returning_columns: Vec<String>,
    /// Whether the statement already has a `RETURNING` clause.
    pub has_returning: bool,
}

impl StatementInfo {
    fn of_type(statement_type: StatementType) -> Self {
        Self {
            statement_type,
            table_name: None,
            columns: Vec::new(),
            values: Vec::new(),
            returning_columns: Vec::new(),
            has_returning: false,
        }
    }

    /// The table name as the server stores it: unquoted names upper-cased,
    /// quoted names unquoted with `""` unescaped. Each part of a qualified
    /// name is normalized on its own.
    #[must_use]
    pub fn normalized_table_name(&self) -> Option<String> {
        let name = self.table_name.as_deref()?;
        let parts: Vec<String> = split_qualified(name).into_iter().map(normalize_identifier).collect();
        Some(parts.join("."))
    }
}

/// Split `a."b.c".d` at dots outside quotes.
fn split_qualified(name: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut quoted = false;
    let mut start = 0;
    for (i, c) in name.char_indices() {
        match c {
            '"' => quoted = !quoted,
            '.' if !quoted => {
                parts.push(&name[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&name[start..]);
    parts
}

fn normalize_identifier(part: &str) -> String {
    let part = part.trim();
    if part.len() > 2 && part.starts_with('"') && part.ends_with('"') {
        part[1..part.len() - 1].replace("\"\"", "\"")
    } else {
        part.to_uppercase()
    }
}

/// Words that cannot name a table or alias.
const RESERVED: &[&str] = &[
    "AND", "AS", "BETWEEN", "BY", "DEFAULT", "DELETE", "EXECUTE", "FROM", "IN", "INSERT", "INTO", "IS", "JOIN",
    "LIKE", "MATCHING", "MERGE", "NOT", "NULL", "ON", "OR", "ORDER", "PLAN", "ROWS", "SELECT", "SET", "THEN",
    "UPDATE", "USING", "VALUES", "WHEN", "WHERE", "WITH",
];

/// Keywords that act as literal operands.
const LITERAL_KEYWORDS: &[&str] = &["NULL", "TRUE", "FALSE", "UNKNOWN"];

/// Keywords ending an `UPDATE ... SET` assignment list.
const SET_TERMINATORS: &[&str] = &["WHERE", "PLAN", "ORDER", "ROWS", "SKIP"];

fn is_reserved(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Identifier && RESERVED.iter().any(|w| token.text.eq_ignore_ascii_case(w))
}

fn is_literal_keyword(token: &Token<'_>) -> bool {
    token.kind == TokenKind::Identifier && LITERAL_KEYWORDS.iter().any(|w| token.text.eq_ignore_ascii_case(w))
}

fn ends_operand(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Identifier => !is_reserved(token) || is_literal_keyword(token) || token.is_keyword("VALUES"),
        TokenKind::QuotedIdentifier
        | TokenKind::StringLiteral
        | TokenKind::Number
        | TokenKind::Parameter
        | TokenKind::RightParen => true,
        _ => false,
    }
}

fn starts_operand(token: &Token<'_>) -> bool {
    match token.kind {
        TokenKind::Identifier => !is_reserved(token) || is_literal_keyword(token) || token.is_keyword("NOT"),
        TokenKind::QuotedIdentifier
        | TokenKind::StringLiteral
        | TokenKind::Number
        | TokenKind::Parameter
        | TokenKind::LeftParen
        | TokenKind::Star => true,
        TokenKind::Operator => token.text == "-" || token.text == "+",
        _ => false,
    }
}

/// Detect the type and shape of `sql`.
///
/// Fails only when the text cannot be tokenized.
pub fn parse(sql: &str) -> Result<StatementInfo, ParseError> {
    let tokens = Tokenizer::tokenize(sql)?;
    Ok(Parser { sql, tokens, pos: 0 }.statement())
}

struct Parser<'a> {
    sql: &'a str,
    tokens: Vec<Token<'a>>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn peek(&self) -> Option<&Token<'a>> {
        self.tokens.get(self.pos)
    }

    fn bump(&mut self) -> Option<Token<'a>> {
        let token = self.tokens.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat_keyword(&mut self, keyword: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(keyword)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.peek().is_some_and(|t| t.kind == kind) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn text(&self, from: usize, to: usize) -> String {
        match (self.tokens.get(from), to.checked_sub(1).and_then(|i| self.tokens.get(i))) {
            (Some(first), Some(last)) if from < to => self.sql[first.start..last.end].to_string(),
            _ => String::new(),
        }
    }

    fn statement(mut self) -> StatementInfo {
        let Some(first) = self.bump() else {
            return StatementInfo::of_type(StatementType::Unknown);
        };
        if first.kind == TokenKind::Semicolon && self.peek().is_none() {
            return StatementInfo::of_type(StatementType::Unknown);
        }

        let info = if first.is_keyword("SELECT") || first.is_keyword("WITH") {
            Some(StatementInfo::of_type(StatementType::Select))
        } else if first.is_keyword("EXECUTE") {
            self.eat_keyword("PROCEDURE")
                .then(|| StatementInfo::of_type(StatementType::ExecuteProcedure))
        } else if first.is_keyword("INSERT") {
            self.insert(StatementType::Insert)
        } else if first.is_keyword("UPDATE") {
            if self.eat_keyword("OR") {
                if self.eat_keyword("INSERT") {
                    self.insert(StatementType::UpdateOrInsert)
                } else {
                    None
                }
            } else {
                self.update()
            }
        } else if first.is_keyword("DELETE") {
            self.target_after("FROM", StatementType::Delete)
        } else if first.is_keyword("MERGE") {
            self.target_after("INTO", StatementType::Merge)
        } else {
            None
        };

        let Some(mut info) = info else {
            return StatementInfo::of_type(StatementType::Other);
        };
        if info.statement_type.supports_returning() {
            self.returning(&mut info);
        }
        info
    }

    /// A table name, optionally schema-qualified, as written.
    fn table_name(&mut self) -> Option<String> {
        let start = self.pos;
        self.identifier()?;
        while self.peek().is_some_and(|t| t.kind == TokenKind::Dot) {
            self.pos += 1;
            self.identifier()?;
        }
        Some(self.text(start, self.pos))
    }

    fn identifier(&mut self) -> Option<String> {
        let token = *self.peek()?;
        let valid = match token.kind {
            TokenKind::QuotedIdentifier => true,
            TokenKind::Identifier => !is_reserved(&token),
            _ => false,
        };
        if !valid {
            return None;
        }
        self.pos += 1;
        Some(token.text.to_string())
    }

    fn target_after(&mut self, keyword: &str, statement_type: StatementType) -> Option<StatementInfo> {
        if !self.eat_keyword(keyword) {
            return None;
        }
        let mut info = StatementInfo::of_type(statement_type);
        info.table_name = Some(self.table_name()?);
        Some(info)
    }

    fn insert(&mut self, statement_type: StatementType) -> Option<StatementInfo> {
        let mut info = self.target_after("INTO", statement_type)?;
        if self.peek().is_some_and(|t| t.kind == TokenKind::LeftParen) {
            info.columns = self.parenthesized_list()?;
        }
        if self.eat_keyword("VALUES") {
            info.values = self.parenthesized_list()?;
        }
        if statement_type == StatementType::UpdateOrInsert && self.eat_keyword("MATCHING") {
            self.parenthesized_list()?;
        }
        Some(info)
    }

    fn update(&mut self) -> Option<StatementInfo> {
        let mut info = StatementInfo::of_type(StatementType::Update);
        info.table_name = Some(self.table_name()?);

        // Optional alias, with or without AS.
        if self.eat_keyword("AS") {
            self.identifier()?;
        } else if !self.peek().is_some_and(|t| t.is_keyword("SET")) {
            self.identifier()?;
        }
        if !self.eat_keyword("SET") {
            return None;
        }

        loop {
            let column_start = self.pos;
            while self.peek().is_some_and(|t| !t.is_operator("=")) {
                self.pos += 1;
            }
            let column = self.text(column_start, self.pos);
            if !self.eat_operator("=") || column.is_empty() {
                return None;
            }
            let value_start = self.pos;
            let more = self.assignment_value();
            info.columns.push(column);
            info.values.push(self.text(value_start, self.pos));
            if !more {
                break;
            }
            self.eat(TokenKind::Comma);
        }
        Some(info)
    }

    fn eat_operator(&mut self, op: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_operator(op)) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Consume one assignment value, stopping before a top-level comma.
    /// Returns true when a comma follows.
    fn assignment_value(&mut self) -> bool {
        let mut depth = 0usize;
        while let Some(token) = self.peek().copied() {
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth = depth.saturating_sub(1),
                TokenKind::Comma if depth == 0 => return true,
                TokenKind::Semicolon if depth == 0 => return false,
                TokenKind::Identifier if depth == 0 => {
                    if SET_TERMINATORS.iter().any(|w| token.is_keyword(w)) || self.opens_returning(self.pos) {
                        return false;
                    }
                }
                _ => {}
            }
            self.pos += 1;
        }
        false
    }

    /// Parse `( item, item, ... )`, returning each item as written.
    fn parenthesized_list(&mut self) -> Option<Vec<String>> {
        if !self.eat(TokenKind::LeftParen) {
            return None;
        }
        let mut items = Vec::new();
        let mut depth = 0usize;
        let mut item_start = self.pos;
        loop {
            let token = self.bump()?;
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen if depth > 0 => depth -= 1,
                TokenKind::RightParen => {
                    let item = self.text(item_start, self.pos - 1);
                    if !item.is_empty() {
                        items.push(item);
                    }
                    return Some(items);
                }
                TokenKind::Comma if depth == 0 => {
                    items.push(self.text(item_start, self.pos - 1));
                    item_start = self.pos;
                }
                _ => {}
            }
        }
    }

    fn opens_returning(&self, index: usize) -> bool {
        let Some(token) = self.tokens.get(index) else {
            return false;
        };
        if !token.is_keyword("RETURNING") {
            return false;
        }
        let prev = index.checked_sub(1).and_then(|i| self.tokens.get(i));
        let next = self.tokens.get(index + 1);
        prev.is_some_and(ends_operand) && next.is_some_and(starts_operand)
    }

    /// Find an existing RETURNING clause in the rest of the statement.
    fn returning(&mut self, info: &mut StatementInfo) {
        let mut depth = 0usize;
        while let Some(token) = self.peek().copied() {
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth = depth.saturating_sub(1),
                TokenKind::Identifier if depth == 0 && self.opens_returning(self.pos) => {
                    self.pos += 1;
                    info.has_returning = true;
                    info.returning_columns = self.returning_items();
                    return;
                }
                _ => {}
            }
            self.pos += 1;
        }
    }

    fn returning_items(&mut self) -> Vec<String> {
        let mut items = Vec::new();
        let mut depth = 0usize;
        let mut item_start = self.pos;
        while let Some(token) = self.peek().copied() {
            match token.kind {
                TokenKind::LeftParen => depth += 1,
                TokenKind::RightParen => depth = depth.saturating_sub(1),
                TokenKind::Comma if depth == 0 => {
                    items.push(self.text(item_start, self.pos));
                    item_start = self.pos + 1;
                }
                TokenKind::Semicolon if depth == 0 => break,
                _ => {}
            }
            self.pos += 1;
        }
        let last = self.text(item_start, self.pos);
        if !last.is_empty() {
            items.push(last);
        }
        items
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn detect(sql: &str) -> (StatementType, Option<String>, bool) {
        let info = parse(sql).unwrap();
        (info.statement_type, info.table_name, info.has_returning)
    }

    fn expect(sql: &str, statement_type: StatementType, table: Option<&str>, returning: bool) {
        assert_eq!(
            detect(sql),
            (statement_type, table.map(str::to_string), returning),
            "statement: {sql}"
        );
    }

    #[test]
    fn test_select_and_procedure() {
        expect("select * from RDB$DATABASE", StatementType::Select, None, false);
        expect("/* a comment */ select * from RDB$DATABASE", StatementType::Select, None, false);
        expect("select", StatementType::Select, None, false);
        expect(
            "with a as (select 1 as col from rdb$database) select * from a",
            StatementType::Select,
            None,
            false,
        );
        expect("execute procedure test 'value1', 'value2'", StatementType::ExecuteProcedure, None, false);
        expect("execute procedure", StatementType::ExecuteProcedure, None, false);
        expect(
            "execute block returns (id integer) as begin id = 1; suspend; end",
            StatementType::Other,
            None,
            false,
        );
    }

    #[test]
    fn test_insert_variants() {
        let t = Some("sometable");
        expect("insert into sometable (id, column1, column2) values (?, ?, ?)", StatementType::Insert, t, false);
        expect("insert into sometable (column1, column2) values (?, ?) returning id", StatementType::Insert, t, true);
        expect("insert into sometable (column1, column2) default values returning id", StatementType::Insert, t, true);
        expect("insert into sometable (column1, column2) select a, b from othertable", StatementType::Insert, t, false);
        expect(
            "insert into sometable (column1, column2) select a, b from othertable returning id",
            StatementType::Insert,
            t,
            true,
        );
        expect(
            "INSERT INTO TABLE_WITH_TRIGGER(TEXT) VALUES ('Some text to insert') RETURNING *",
            StatementType::Insert,
            Some("TABLE_WITH_TRIGGER"),
            true,
        );
    }

    #[test]
    fn test_insert_lists() {
        let info = parse("insert into t (id, \"Name\") values (?, (? * 2)) returning id, name as n").unwrap();
        assert_eq!(info.columns, vec!["id", "\"Name\""]);
        assert_eq!(info.values, vec!["?", "(? * 2)"]);
        assert_eq!(info.returning_columns, vec!["id", "name as n"]);
    }

    #[test]
    fn test_delete_and_update() {
        expect("delete from sometable", StatementType::Delete, Some("sometable"), false);
        expect("delete from sometable returning column1", StatementType::Delete, Some("sometable"), true);
        expect(
            "delete from sometable as somealias where somealias.foo = 'bar'",
            StatementType::Delete,
            Some("sometable"),
            false,
        );
        expect(
            "update \"sometable\" set column1 = 1, column2 = column2 + 1 where x = y",
            StatementType::Update,
            Some("\"sometable\""),
            false,
        );
        expect(
            "update sometable set column1 = 1, column2 = column2 + 1 where x = y returning column2, x",
            StatementType::Update,
            Some("sometable"),
            true,
        );
        expect(
            "update sometable withalias set column1 = 1 returning -1 as foo",
            StatementType::Update,
            Some("sometable"),
            true,
        );
        expect(
            "update sometable \"withalias\" set column1 = 1 returning (id + 1) as foo",
            StatementType::Update,
            Some("sometable"),
            true,
        );
    }

    #[test]
    fn test_update_assignments() {
        let info = parse("update t set a = 1, b = coalesce(b, 0) + 1 where id = ?").unwrap();
        assert_eq!(info.columns, vec!["a", "b"]);
        assert_eq!(info.values, vec!["1", "coalesce(b, 0) + 1"]);

        let info = parse("update t as x set a = 1, b = (select max(c) from u) where id = 2 returning id").unwrap();
        assert_eq!(info.columns, vec!["a", "b"]);
        assert_eq!(info.values, vec!["1", "(select max(c) from u)"]);
        assert_eq!(info.returning_columns, vec!["id"]);

        let info = parse("update t set a = 'x,y' , b = ? , c = 3").unwrap();
        assert_eq!(info.values, vec!["'x,y'", "?", "3"]);
    }

    #[test]
    fn test_schema_qualified_table() {
        let info = parse("insert into sch.t (a) values (1)").unwrap();
        assert_eq!(info.statement_type, StatementType::Insert);
        assert_eq!(info.table_name.as_deref(), Some("sch.t"));
        assert_eq!(info.columns, vec!["a"]);
        assert_eq!(info.values, vec!["1"]);
        assert_eq!(info.normalized_table_name(), Some("SCH.T".to_string()));

        expect("update \"Sch\".t x set a = 1 returning a", StatementType::Update, Some("\"Sch\".t"), true);
        expect("delete from sch.t where id = 1", StatementType::Delete, Some("sch.t"), false);
        expect("insert into sch. (a) values (1)", StatementType::Other, None, false);

        let info = parse("merge into \"My.Schema\".\"Tbl\" using u on 1 = 1 when matched then delete").unwrap();
        assert_eq!(info.normalized_table_name(), Some("My.Schema.Tbl".to_string()));
    }

    #[test]
    fn test_update_or_insert_and_merge() {
        expect(
            "update or insert into sometable (id, column1, column2) values (?, ?, (? * 2)) matching (id)",
            StatementType::UpdateOrInsert,
            Some("sometable"),
            false,
        );
        expect(
            "merge into sometable as somealias using othertable on somealias.x = othertable.y \
             when matched then update set somealias.y = othertable.x \
             when not matched then insert (x,y) values (othertable.x, othertable.y)",
            StatementType::Merge,
            Some("sometable"),
            false,
        );
    }

    #[test]
    fn test_returning_as_identifier() {
        let r = Some("returning");
        expect("insert into returning (returning) values (true)", StatementType::Insert, r, false);
        expect("insert into returning (returning) values (true) returning id", StatementType::Insert, r, true);
        expect("insert into returning (column1, column2) select a, returning from othertable", StatementType::Insert, r, false);
        expect(
            "insert into nothing (column1, column2) select a, returning /* comment */ from othertable",
            StatementType::Insert,
            Some("nothing"),
            false,
        );
        expect("insert into returning (column1, column2) select a, returning, c from othertable", StatementType::Insert, r, false);
        expect(
            "update sometable as \"somealias\" set column1 = column1 + returning",
            StatementType::Update,
            Some("sometable"),
            false,
        );
        expect(
            "update returning returning set returning = not returning where returning",
            StatementType::Update,
            r,
            false,
        );
        expect(
            "update returning returning set returning = not returning where returning and x = 1",
            StatementType::Update,
            r,
            false,
        );
        expect(
            "update returning returning set returning = not returning where x = 1 or returning is true",
            StatementType::Update,
            r,
            false,
        );
        expect(
            "update likematch set column1 = 'x' where returning like 'a_c%'",
            StatementType::Update,
            Some("likematch"),
            false,
        );
        expect(
            "update returning returning set returning = not returning where returning returning returning returning",
            StatementType::Update,
            r,
            true,
        );
    }

    #[test]
    fn test_unrecognized_forms() {
        for sql in [
            "update or invalid",
            "update or insert invalid",
            "delete sometable where x = y return column1",
            "update and invalid",
            "update sometable (invalid)",
            "update sometable as as invalid",
            "update or insert into default values",
            "merge sometable invalid",
            "set transaction read write wait isolation level snapshot",
            "alter session reset",
            "create table test (col1 integer)",
            "invalid tokens not recognized",
        ] {
            expect(sql, StatementType::Other, None, false);
        }
    }

    #[test]
    fn test_empty_statement() {
        assert_eq!(parse("").unwrap().statement_type, StatementType::Unknown);
        assert_eq!(parse("  -- nothing\n").unwrap().statement_type, StatementType::Unknown);
        assert_eq!(parse(";").unwrap().statement_type, StatementType::Unknown);
    }

    #[test]
    fn test_normalized_table_name() {
        assert_eq!(
            parse("insert into generated_keys_tbl (a) values (1)").unwrap().normalized_table_name(),
            Some("GENERATED_KEYS_TBL".to_string())
        );
        assert_eq!(
            parse("insert into \"Mixed\"\"Case\" (a) values (1)").unwrap().normalized_table_name(),
            Some("Mixed\"Case".to_string())
        );
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #[test]
            fn parse_never_panics(sql in "\\PC{0,80}") {
                let _ = parse(&sql);
            }

            #[test]
            fn leading_comment_does_not_change_type(table in "[a-z][a-z0-9_]{0,12}") {
                let sql = format!("insert into {table} (a) values (1)");
                let plain = parse(&sql).unwrap();
                let commented = parse(&format!("/* x */ -- y\n{sql}")).unwrap();
                prop_assert_eq!(plain.statement_type, commented.statement_type);
                prop_assert_eq!(plain.columns, commented.columns);
            }
        }
    }
}
