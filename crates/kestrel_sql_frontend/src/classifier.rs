//! Statement classification.
//!
//! A pure function from `(text, AST?)` to a `StatementKind`; first match in
//! the documented decision order wins. Classification never mutates the AST
//! and never consults the backend.

use sqlparser::ast::Statement;

use crate::facade::QueryFacade;

/// The classified shape of an incoming statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    /// SHOW / DESCRIBE / DESC / USE / SET / KILL / BEGIN / COMMIT / ROLLBACK.
    DdlMeta,
    /// Outer expression is a parenthesized SELECT, optionally followed by
    /// `LIMIT n`. Tableau sends these for schema discovery.
    ParenSelect,
    /// SELECT with no FROM/WHERE/GROUP BY/HAVING/ORDER BY (LIMIT optional).
    StaticSelect,
    /// References a table in information_schema / performance_schema /
    /// mysql / sys.
    InfoSchemaSelect,
    /// Single outer SELECT whose FROM is one parenthesized SELECT.
    WrappedSelect,
    /// Every other SELECT: real data access, subject to all policy gates.
    DataSelect,
    /// Write DML / DDL; always rejected.
    WriteDml,
    Other,
}

const META_KEYWORDS: &[&str] = &[
    "SHOW", "DESCRIBE", "DESC", "USE", "SET", "KILL", "BEGIN", "COMMIT", "ROLLBACK",
];

const WRITE_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "REPLACE", "TRUNCATE", "DROP", "CREATE", "ALTER", "GRANT",
    "REVOKE", "RENAME",
];

/// First word of the statement, uppercased.
pub fn first_keyword(text: &str) -> Option<String> {
    text.trim()
        .split_whitespace()
        .next()
        .map(|word| word.trim_end_matches(';').to_ascii_uppercase())
}

/// `^\(\s*SELECT` — the parenthesized-SELECT shape, matched without regard
/// to case or embedded whitespace/newlines.
pub fn is_paren_select(text: &str) -> bool {
    let trimmed = text.trim_start();
    let Some(rest) = trimmed.strip_prefix('(') else {
        return false;
    };
    let rest = rest.trim_start();
    rest.len() >= 6 && rest[..6].eq_ignore_ascii_case("select")
}

/// Classify a statement. `ast` is `None` when parsing failed; keyword-level
/// classification still applies so unparsable meta statements can pass
/// through and unparsable writes can be rejected.
pub fn classify(text: &str, ast: Option<&Statement>) -> StatementKind {
    let keyword = first_keyword(text).unwrap_or_default();

    if META_KEYWORDS.iter().any(|k| *k == keyword) {
        return StatementKind::DdlMeta;
    }

    if is_paren_select(text) {
        return StatementKind::ParenSelect;
    }

    let Some(stmt) = ast else {
        if WRITE_KEYWORDS.iter().any(|k| *k == keyword) {
            return StatementKind::WriteDml;
        }
        return StatementKind::Other;
    };

    let facade = QueryFacade::new(stmt);

    if facade.is_static_select() {
        return StatementKind::StaticSelect;
    }

    if facade.references_metadata_schema() {
        return StatementKind::InfoSchemaSelect;
    }

    if is_write_statement(stmt) || WRITE_KEYWORDS.iter().any(|k| *k == keyword) {
        return StatementKind::WriteDml;
    }

    if facade.query().is_some() {
        if facade.derived_from().is_some() {
            return StatementKind::WrappedSelect;
        }
        return StatementKind::DataSelect;
    }

    StatementKind::Other
}

fn is_write_statement(stmt: &Statement) -> bool {
    matches!(
        stmt,
        Statement::Insert(_)
            | Statement::Update { .. }
            | Statement::Delete(_)
            | Statement::Truncate { .. }
            | Statement::Drop { .. }
            | Statement::CreateTable(_)
            | Statement::CreateView { .. }
            | Statement::CreateIndex(_)
            | Statement::CreateDatabase { .. }
            | Statement::AlterTable { .. }
            | Statement::Grant { .. }
            | Statement::Revoke { .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;

    fn classify_sql(sql: &str) -> StatementKind {
        let ast = parse_one(sql).ok();
        classify(sql, ast.as_ref())
    }

    #[test]
    fn test_meta_keywords() {
        assert_eq!(classify_sql("SHOW TABLES"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("  show databases"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("DESCRIBE t"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("DESC t"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("USE analytics"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("SET NAMES utf8mb4"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("BEGIN"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("COMMIT"), StatementKind::DdlMeta);
        assert_eq!(classify_sql("ROLLBACK"), StatementKind::DdlMeta);
    }

    #[test]
    fn test_paren_select() {
        assert_eq!(
            classify_sql("(SELECT col1 FROM t WHERE date_index = -1) LIMIT 0"),
            StatementKind::ParenSelect
        );
        assert_eq!(
            classify_sql("(\n  SELECT col1\n  FROM t\n)"),
            StatementKind::ParenSelect
        );
        assert_eq!(
            classify_sql("( select a from t )"),
            StatementKind::ParenSelect
        );
    }

    #[test]
    fn test_static_select() {
        assert_eq!(classify_sql("SELECT 1"), StatementKind::StaticSelect);
        assert_eq!(
            classify_sql("SELECT CONNECTION_ID()"),
            StatementKind::StaticSelect
        );
        assert_eq!(
            classify_sql("SELECT 1 + 2 LIMIT 1"),
            StatementKind::StaticSelect
        );
    }

    #[test]
    fn test_info_schema_select_case_and_quote_insensitive() {
        for sql in [
            "SELECT * FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = 't'",
            "SELECT * FROM information_schema.columns",
            "SELECT * FROM `information_schema`.`columns`",
            "SELECT * FROM performance_schema.threads",
            "SELECT * FROM mysql.user",
        ] {
            assert_eq!(
                classify_sql(sql),
                StatementKind::InfoSchemaSelect,
                "failed for {sql}"
            );
        }
    }

    #[test]
    fn test_write_dml() {
        assert_eq!(
            classify_sql("INSERT INTO t VALUES (1)"),
            StatementKind::WriteDml
        );
        assert_eq!(classify_sql("UPDATE t SET a = 1"), StatementKind::WriteDml);
        assert_eq!(classify_sql("DELETE FROM t"), StatementKind::WriteDml);
        assert_eq!(classify_sql("DROP TABLE t"), StatementKind::WriteDml);
        assert_eq!(
            classify_sql("TRUNCATE TABLE t"),
            StatementKind::WriteDml
        );
    }

    #[test]
    fn test_unparsable_write_still_rejected() {
        // Keyword-level detection works even when the AST is unavailable.
        assert_eq!(
            classify("INSERT INTO t VALUS garbage", None),
            StatementKind::WriteDml
        );
    }

    #[test]
    fn test_wrapped_select() {
        assert_eq!(
            classify_sql("SELECT * FROM (SELECT a FROM t WHERE cob_date = '2024-01-15') sub"),
            StatementKind::WrappedSelect
        );
    }

    #[test]
    fn test_data_select() {
        assert_eq!(
            classify_sql("SELECT a FROM t WHERE cob_date = '2024-01-15'"),
            StatementKind::DataSelect
        );
    }

    #[test]
    fn test_set_beats_paren_and_select() {
        // Decision order: meta keywords are checked first.
        assert_eq!(
            classify_sql("SET @x = (SELECT 1)"),
            StatementKind::DdlMeta
        );
    }
}
