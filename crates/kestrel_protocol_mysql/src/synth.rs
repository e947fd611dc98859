//! Metadata synthesis: session statements answered locally, and reshaping
//! of SHOW replies into the INFORMATION_SCHEMA projection a client asked
//! for.

use kestrel_backend::QueryOutput;
use kestrel_common::error::{ProxyError, SqlError};
use kestrel_common::row::{ColumnDef, ScalarValue};
use kestrel_sql_frontend::eval;
use kestrel_sql_frontend::facade::{self, QueryFacade};
use sqlparser::ast::{self, Expr, SelectItem, Statement, Value};

use crate::session::ProxySession;

/// A locally synthesized reply.
#[derive(Debug, Clone)]
pub enum LocalReply {
    /// A result set.
    Rows {
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<ScalarValue>>,
    },
    /// A bare OK (SET, USE).
    Ok,
}

/// Apply a parsed SET statement to the session's shadow state. Never
/// reaches the backend. Unknown assignment shapes are accepted with a log
/// line rather than rejected: clients send a long tail of SET chatter and
/// an error aborts their connect sequence.
pub fn apply_set(session: &mut ProxySession, set: &ast::Set) -> Result<LocalReply, ProxyError> {
    match set {
        ast::Set::SetNames {
            charset_name,
            collation_name,
        } => {
            session.set_names(&charset_name.value, collation_name.as_deref());
        }
        ast::Set::SetNamesDefault {} => {
            session.set_names("utf8mb4", Some("utf8mb4_general_ci"));
        }
        ast::Set::SetTransaction { modes, .. } => {
            apply_transaction_modes(session, modes);
        }
        ast::Set::SingleAssignment {
            variable, values, ..
        } => {
            let Some(value_expr) = values.first() else {
                return Err(ProxyError::Sql(SqlError::Parse("SET without a value".into())));
            };
            apply_assignment(session, variable, value_expr);
        }
        ast::Set::MultipleAssignments { assignments } => {
            for assignment in assignments {
                apply_assignment(session, &assignment.name, &assignment.value);
            }
        }
        other => {
            tracing::debug!("accepting unmodeled SET variant locally: {}", other);
        }
    }
    Ok(LocalReply::Ok)
}

fn apply_transaction_modes(session: &mut ProxySession, modes: &[ast::TransactionMode]) {
    for mode in modes {
        match mode {
            ast::TransactionMode::AccessMode(ast::TransactionAccessMode::ReadOnly) => {
                session.set_system_var("tx_read_only", ScalarValue::Int(1));
                session.set_system_var("transaction_read_only", ScalarValue::Int(1));
            }
            ast::TransactionMode::AccessMode(ast::TransactionAccessMode::ReadWrite) => {
                session.set_system_var("tx_read_only", ScalarValue::Int(0));
                session.set_system_var("transaction_read_only", ScalarValue::Int(0));
            }
            ast::TransactionMode::IsolationLevel(level) => {
                let iso = match level {
                    ast::TransactionIsolationLevel::ReadUncommitted => "READ-UNCOMMITTED",
                    ast::TransactionIsolationLevel::ReadCommitted => "READ-COMMITTED",
                    ast::TransactionIsolationLevel::RepeatableRead => "REPEATABLE-READ",
                    ast::TransactionIsolationLevel::Serializable => "SERIALIZABLE",
                    ast::TransactionIsolationLevel::Snapshot => "SNAPSHOT",
                };
                session.set_system_var("tx_isolation", ScalarValue::Text(iso.into()));
                session.set_system_var("transaction_isolation", ScalarValue::Text(iso.into()));
            }
        }
    }
}

fn apply_assignment(session: &mut ProxySession, variable: &ast::ObjectName, value_expr: &Expr) {
    let name = facade::object_name_parts(variable)
        .last()
        .cloned()
        .unwrap_or_default();
    let value = eval_set_value(session, value_expr);

    if let Some(user_var) = name.strip_prefix('@').filter(|rest| !rest.starts_with('@')) {
        session.set_user_var(user_var, value);
        return;
    }

    let system_name = name.trim_start_matches('@').to_ascii_lowercase();
    match system_name.as_str() {
        // Aliased pairs stay coherent.
        "tx_isolation" | "transaction_isolation" => {
            session.set_system_var("tx_isolation", value.clone());
            session.set_system_var("transaction_isolation", value);
        }
        "tx_read_only" | "transaction_read_only" => {
            session.set_system_var("tx_read_only", value.clone());
            session.set_system_var("transaction_read_only", value);
        }
        _ => session.set_system_var(&system_name, value),
    }
}

/// SET right-hand sides are permissive: bare identifiers (`ON`, `utf8mb4`,
/// `DEFAULT`) are enum-ish literals, everything else evaluates like a
/// static-SELECT expression.
fn eval_set_value(session: &ProxySession, expr: &Expr) -> ScalarValue {
    match expr {
        Expr::Identifier(ident) if !ident.value.starts_with('@') => {
            ScalarValue::Text(ident.value.clone())
        }
        other => eval::eval_expr(other, session).unwrap_or_else(|_| {
            tracing::debug!("storing unevaluable SET value textually: {}", other);
            ScalarValue::Text(other.to_string())
        }),
    }
}

/// Handle `USE <db>`, enforcing the database access lists.
pub fn apply_use(
    session: &mut ProxySession,
    use_stmt: &ast::Use,
    database_allowed: impl Fn(&str) -> bool,
) -> Result<LocalReply, ProxyError> {
    let name = match use_stmt {
        ast::Use::Object(name) | ast::Use::Database(name) | ast::Use::Schema(name) => name,
        other => {
            return Err(ProxyError::Sql(SqlError::Parse(format!(
                "unsupported USE form: {other}"
            ))))
        }
    };
    let database = facade::object_name_parts(name)
        .last()
        .cloned()
        .unwrap_or_default();

    if !database_allowed(&database) {
        return Err(ProxyError::Policy(
            kestrel_common::error::PolicyError::DatabaseBlocked {
                database: database.clone(),
                message: format!(
                    "Access to database '{database}' is not permitted\n\n\
                     The database is blocked by access policy. Use an allowed application \
                     database or contact your administrator."
                ),
            },
        ));
    }

    tracing::info!(
        connection_id = session.connection_id,
        "switching to database: {}",
        database
    );
    session.current_database = Some(database);
    Ok(LocalReply::Ok)
}

/// Evaluate a static SELECT against the session.
pub fn eval_static(session: &ProxySession, stmt: &Statement) -> Result<LocalReply, ProxyError> {
    let (columns, rows) = eval::eval_static_select(stmt, session)?;
    Ok(LocalReply::Rows { columns, rows })
}

/// Reshape a SHOW reply into the projection of the original
/// INFORMATION_SCHEMA query.
///
/// The SHOW forms return their own column layouts (`Database`,
/// `Tables_in_<db>`, `Field`/`Type`/…), but the client asked for specific
/// INFORMATION_SCHEMA columns — often padded with literal NULLs. Each
/// original projection item becomes one output column: literals evaluate in
/// place and column references map onto the SHOW columns by name.
pub fn project_show_output(
    stmt: &Statement,
    relation: &str,
    output: QueryOutput,
) -> (Vec<ColumnDef>, Vec<Vec<ScalarValue>>) {
    let facade = QueryFacade::new(stmt);
    let projection = facade.projection();
    if projection.is_empty() || facade::projection_is_star(projection) {
        return (output.columns, output.rows);
    }

    enum Source {
        ShowColumn(usize),
        Constant(ScalarValue),
    }

    let mut columns = Vec::with_capacity(projection.len());
    let mut sources = Vec::with_capacity(projection.len());
    for item in projection {
        let (name, expr) = match item {
            SelectItem::ExprWithAlias { expr, alias } => (alias.value.clone(), Some(expr)),
            SelectItem::UnnamedExpr(expr) => (expr.to_string(), Some(expr)),
            _ => ("*".to_string(), None),
        };
        let source = match expr {
            Some(Expr::Value(value)) => Source::Constant(literal_value(&value.value)),
            Some(Expr::Identifier(_)) | Some(Expr::CompoundIdentifier(_)) => {
                let referenced = match expr {
                    Some(Expr::Identifier(ident)) => ident.value.clone(),
                    Some(Expr::CompoundIdentifier(parts)) => parts
                        .last()
                        .map(|p| p.value.clone())
                        .unwrap_or_default(),
                    _ => String::new(),
                };
                match map_is_column(relation, &referenced, &output.columns) {
                    Some(index) => Source::ShowColumn(index),
                    None => Source::Constant(ScalarValue::Null),
                }
            }
            _ => Source::Constant(ScalarValue::Null),
        };
        columns.push(ColumnDef::text(name));
        sources.push(source);
    }

    let rows = output
        .rows
        .iter()
        .map(|show_row| {
            sources
                .iter()
                .map(|source| match source {
                    Source::ShowColumn(index) => {
                        show_row.get(*index).cloned().unwrap_or(ScalarValue::Null)
                    }
                    Source::Constant(value) => value.clone(),
                })
                .collect()
        })
        .collect();

    (columns, rows)
}

fn literal_value(value: &Value) -> ScalarValue {
    match value {
        Value::Null => ScalarValue::Null,
        Value::Number(n, _) => n
            .parse::<i64>()
            .map(ScalarValue::Int)
            .unwrap_or_else(|_| ScalarValue::Text(n.clone())),
        Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
            ScalarValue::Text(s.clone())
        }
        other => ScalarValue::Text(other.to_string()),
    }
}

/// Map an INFORMATION_SCHEMA column name onto the SHOW reply's columns.
fn map_is_column(relation: &str, column: &str, show_columns: &[ColumnDef]) -> Option<usize> {
    let column = column.to_ascii_uppercase();
    let target: Option<&str> = match relation {
        "SCHEMATA" => match column.as_str() {
            "SCHEMA_NAME" => Some("Database"),
            _ => None,
        },
        "TABLES" => match column.as_str() {
            // SHOW TABLES has one column, `Tables_in_<db>`.
            "TABLE_NAME" => return (!show_columns.is_empty()).then_some(0),
            _ => None,
        },
        "COLUMNS" => match column.as_str() {
            "COLUMN_NAME" => Some("Field"),
            "DATA_TYPE" | "COLUMN_TYPE" => Some("Type"),
            "IS_NULLABLE" => Some("Null"),
            "COLUMN_KEY" => Some("Key"),
            "COLUMN_DEFAULT" => Some("Default"),
            "EXTRA" => Some("Extra"),
            _ => None,
        },
        _ => None,
    };
    let target = target?;
    show_columns
        .iter()
        .position(|col| col.name.eq_ignore_ascii_case(target))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_sql_frontend::parser::parse_one;

    fn parse_set(sql: &str) -> ast::Set {
        match parse_one(sql).unwrap() {
            Statement::Set(set) => set,
            other => panic!("expected SET, got {other:?}"),
        }
    }

    #[test]
    fn test_set_names_with_collation() {
        let mut session = ProxySession::new(1);
        apply_set(
            &mut session,
            &parse_set("SET NAMES utf8 COLLATE utf8_general_ci"),
        )
        .unwrap();
        assert_eq!(
            session.get_system_var("character_set_results"),
            Some(&ScalarValue::Text("utf8".into()))
        );
        assert_eq!(
            session.get_system_var("collation_connection"),
            Some(&ScalarValue::Text("utf8_general_ci".into()))
        );
    }

    #[test]
    fn test_set_transaction_isolation() {
        let mut session = ProxySession::new(1);
        apply_set(
            &mut session,
            &parse_set("SET TRANSACTION ISOLATION LEVEL READ COMMITTED"),
        )
        .unwrap();
        assert_eq!(
            session.get_system_var("tx_isolation"),
            Some(&ScalarValue::Text("READ-COMMITTED".into()))
        );
    }

    #[test]
    fn test_set_session_variable() {
        let mut session = ProxySession::new(1);
        apply_set(&mut session, &parse_set("SET SESSION sql_mode = 'ANSI'")).unwrap();
        assert_eq!(
            session.get_system_var("sql_mode"),
            Some(&ScalarValue::Text("ANSI".into()))
        );
    }

    #[test]
    fn test_set_at_at_prefixed_variable() {
        let mut session = ProxySession::new(1);
        apply_set(&mut session, &parse_set("SET @@wait_timeout = 600")).unwrap();
        assert_eq!(
            session.get_system_var("wait_timeout"),
            Some(&ScalarValue::Int(600))
        );
    }

    #[test]
    fn test_set_user_variable() {
        let mut session = ProxySession::new(1);
        apply_set(&mut session, &parse_set("SET @answer = 42")).unwrap();
        assert_eq!(session.get_user_var("answer"), Some(&ScalarValue::Int(42)));
    }

    #[test]
    fn test_set_bare_identifier_value_stored_textually() {
        let mut session = ProxySession::new(1);
        apply_set(&mut session, &parse_set("SET autocommit = ON")).unwrap();
        assert_eq!(
            session.get_system_var("autocommit"),
            Some(&ScalarValue::Text("ON".into()))
        );
    }

    #[test]
    fn test_use_sets_database() {
        let mut session = ProxySession::new(1);
        let Statement::Use(use_stmt) = parse_one("USE analytics").unwrap() else {
            panic!("expected USE");
        };
        apply_use(&mut session, &use_stmt, |_| true).unwrap();
        assert_eq!(session.current_database.as_deref(), Some("analytics"));
    }

    #[test]
    fn test_use_blocked_database_rejected() {
        let mut session = ProxySession::new(1);
        let Statement::Use(use_stmt) = parse_one("USE mysql").unwrap() else {
            panic!("expected USE");
        };
        let err = apply_use(&mut session, &use_stmt, |_| false).unwrap_err();
        assert_eq!(err.mysql_errno(), 1044);
        assert!(session.current_database.is_none());
    }

    #[test]
    fn test_project_show_databases_into_schemata_projection() {
        let stmt = parse_one(
            "SELECT NULL, NULL, NULL, SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA \
             WHERE SCHEMA_NAME LIKE '%' ORDER BY SCHEMA_NAME",
        )
        .unwrap();
        let output = QueryOutput {
            columns: vec![ColumnDef::text("Database")],
            rows: vec![
                vec![ScalarValue::Text("analytics".into())],
                vec![ScalarValue::Text("reporting".into())],
            ],
        };
        let (columns, rows) = project_show_output(&stmt, "SCHEMATA", output);
        assert_eq!(columns.len(), 4);
        assert_eq!(columns[3].name, "SCHEMA_NAME");
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], ScalarValue::Null);
        assert_eq!(rows[0][3], ScalarValue::Text("analytics".into()));
    }

    #[test]
    fn test_project_show_columns_into_columns_projection() {
        let stmt = parse_one(
            "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_NAME = 'users'",
        )
        .unwrap();
        let output = QueryOutput {
            columns: vec![
                ColumnDef::text("Field"),
                ColumnDef::text("Type"),
                ColumnDef::text("Null"),
            ],
            rows: vec![vec![
                ScalarValue::Text("id".into()),
                ScalarValue::Text("bigint".into()),
                ScalarValue::Text("NO".into()),
            ]],
        };
        let (columns, rows) = project_show_output(&stmt, "COLUMNS", output);
        assert_eq!(columns[0].name, "COLUMN_NAME");
        assert_eq!(rows[0][0], ScalarValue::Text("id".into()));
        assert_eq!(rows[0][1], ScalarValue::Text("bigint".into()));
    }

    #[test]
    fn test_star_projection_passes_show_output_through() {
        let stmt = parse_one("SELECT * FROM INFORMATION_SCHEMA.SCHEMATA").unwrap();
        let output = QueryOutput {
            columns: vec![ColumnDef::text("Database")],
            rows: vec![vec![ScalarValue::Text("analytics".into())]],
        };
        let (columns, rows) = project_show_output(&stmt, "SCHEMATA", output.clone());
        assert_eq!(columns.len(), 1);
        assert_eq!(rows, output.rows);
    }
}
