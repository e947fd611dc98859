use kestrel_common::error::SqlError;
use sqlparser::ast::Statement;
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

/// Parse a SQL string into one or more AST statements using sqlparser-rs
/// with the MySQL dialect.
pub fn parse_sql(sql: &str) -> Result<Vec<Statement>, SqlError> {
    let dialect = MySqlDialect {};
    Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))
}

/// Parse a SQL string expected to contain exactly one statement.
pub fn parse_one(sql: &str) -> Result<Statement, SqlError> {
    let mut statements = parse_sql(sql)?;
    if statements.is_empty() {
        return Err(SqlError::Empty);
    }
    Ok(statements.remove(0))
}
