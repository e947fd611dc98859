//! INFORMATION_SCHEMA query translation.
//!
//! The backend does not serve INFORMATION_SCHEMA relations. A static
//! decision table keyed on the referenced relation translates the query to
//! a `SHOW` form the backend does accept, or resolves it to an empty result
//! when no faithful translation exists. Empty beats error here: schema
//! browsers issue these probes speculatively and treat errors as fatal.

use sqlparser::ast::{BinaryOperator, Expr, Function, FunctionArguments, Statement, Value};

use crate::facade::{self, QueryFacade};

/// Outcome of the decision table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InfoSchemaRewrite {
    /// Replace the statement with this SHOW command.
    Show(String),
    /// Answer locally with zero columns, zero rows.
    Empty,
}

/// Right-hand side of a recognized equality predicate.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EqValue {
    Literal(String),
    /// `TABLE_SCHEMA = DATABASE()` — resolves to the session database,
    /// which SHOW forms inherit implicitly.
    CurrentDatabase,
}

/// Translate a classified `InfoSchemaSelect` statement.
pub fn rewrite_info_schema(stmt: &Statement) -> InfoSchemaRewrite {
    let facade = QueryFacade::new(stmt);

    let Some(relation) = referenced_relation(&facade) else {
        return InfoSchemaRewrite::Empty;
    };

    match relation.as_str() {
        "SCHEMATA" => InfoSchemaRewrite::Show("SHOW DATABASES".to_string()),
        "TABLES" => rewrite_tables(&facade),
        "COLUMNS" => rewrite_columns(&facade),
        _ => InfoSchemaRewrite::Empty,
    }
}

/// The INFORMATION_SCHEMA relation a statement references, uppercased.
/// Used by the orchestrator to reshape SHOW replies back into the
/// statement's projection.
pub fn relation_of(stmt: &Statement) -> Option<String> {
    referenced_relation(&QueryFacade::new(stmt))
}

/// The INFORMATION_SCHEMA relation referenced in FROM, uppercased.
/// `None` when the metadata reference is to another metadata schema
/// (performance_schema, mysql, sys) — those always resolve empty.
fn referenced_relation(facade: &QueryFacade<'_>) -> Option<String> {
    facade.tables_referenced().into_iter().find_map(|parts| {
        if parts.len() >= 2 && parts[0].eq_ignore_ascii_case("information_schema") {
            parts.last().map(|name| name.to_ascii_uppercase())
        } else {
            None
        }
    })
}

fn rewrite_tables(facade: &QueryFacade<'_>) -> InfoSchemaRewrite {
    let predicates = match facade.outer_where() {
        Some(where_expr) => match simple_conjuncts(where_expr) {
            Some(preds) => preds,
            None => return InfoSchemaRewrite::Empty,
        },
        None => Vec::new(),
    };

    const WHITELIST: &[&str] = &["TABLE_NAME", "TABLE_SCHEMA", "TABLE_TYPE"];
    if !predicates.iter().all(|(col, _)| WHITELIST.contains(&col.as_str())) {
        return InfoSchemaRewrite::Empty;
    }

    match lookup(&predicates, "TABLE_SCHEMA") {
        Some(EqValue::Literal(schema)) if !schema.is_empty() => {
            InfoSchemaRewrite::Show(format!("SHOW TABLES FROM {schema}"))
        }
        _ => InfoSchemaRewrite::Show("SHOW TABLES".to_string()),
    }
}

fn rewrite_columns(facade: &QueryFacade<'_>) -> InfoSchemaRewrite {
    let predicates = match facade.outer_where() {
        Some(where_expr) => match simple_conjuncts(where_expr) {
            Some(preds) => preds,
            None => return InfoSchemaRewrite::Empty,
        },
        None => Vec::new(),
    };

    const WHITELIST: &[&str] = &["TABLE_NAME", "TABLE_SCHEMA"];
    if !predicates.iter().all(|(col, _)| WHITELIST.contains(&col.as_str())) {
        return InfoSchemaRewrite::Empty;
    }

    let table = match lookup(&predicates, "TABLE_NAME") {
        Some(EqValue::Literal(table)) if !table.is_empty() => table,
        _ => return InfoSchemaRewrite::Empty,
    };

    match lookup(&predicates, "TABLE_SCHEMA") {
        Some(EqValue::Literal(schema)) if !schema.is_empty() => {
            InfoSchemaRewrite::Show(format!("SHOW COLUMNS FROM {schema}.{table}"))
        }
        _ => InfoSchemaRewrite::Show(format!("SHOW COLUMNS FROM {table}")),
    }
}

fn lookup(predicates: &[(String, EqValue)], column: &str) -> Option<EqValue> {
    predicates
        .iter()
        .find(|(col, _)| col == column)
        .map(|(_, value)| value.clone())
}

/// Decompose a WHERE tree into AND-composed equality predicates
/// `IDENT = literal`. Any other shape (OR, LIKE, inequalities, non-literal
/// sides) makes the WHERE non-simple: `None`.
fn simple_conjuncts(expr: &Expr) -> Option<Vec<(String, EqValue)>> {
    let mut out = Vec::new();
    collect_conjuncts(expr, &mut out).then_some(out)
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<(String, EqValue)>) -> bool {
    match expr {
        Expr::Nested(inner) => collect_conjuncts(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => collect_conjuncts(left, out) && collect_conjuncts(right, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::Eq,
            right,
        } => match equality(left, right) {
            Some(pair) => {
                out.push(pair);
                true
            }
            None => false,
        },
        _ => false,
    }
}

fn equality(left: &Expr, right: &Expr) -> Option<(String, EqValue)> {
    if let (Some(col), Some(value)) = (column_name(left), eq_value(right)) {
        return Some((col, value));
    }
    if let (Some(col), Some(value)) = (column_name(right), eq_value(left)) {
        return Some((col, value));
    }
    None
}

fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_ascii_uppercase()),
        Expr::CompoundIdentifier(parts) => {
            parts.last().map(|ident| ident.value.to_ascii_uppercase())
        }
        _ => None,
    }
}

fn eq_value(expr: &Expr) -> Option<EqValue> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                Some(EqValue::Literal(s.clone()))
            }
            Value::Number(n, _) => Some(EqValue::Literal(n.clone())),
            _ => None,
        },
        Expr::Function(func) if is_database_call(func) => Some(EqValue::CurrentDatabase),
        _ => None,
    }
}

fn is_database_call(func: &Function) -> bool {
    facade::function_name(&func.name)
        .map(|name| name == "DATABASE" || name == "SCHEMA")
        .unwrap_or(false)
        && matches!(
            func.args,
            FunctionArguments::None | FunctionArguments::List(_)
        )
}
