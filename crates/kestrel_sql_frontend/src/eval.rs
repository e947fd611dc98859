//! Expression evaluation for static SELECTs.
//!
//! A static SELECT (no FROM/WHERE/GROUP BY/HAVING/ORDER BY) never reaches
//! the backend: its projection is evaluated locally against the session's
//! shadow state. Covers the literal/arithmetic/string/date surface that
//! MySQL clients probe at connect time, plus `@@system_var` and `@user_var`
//! reads.

use chrono::Local;
use kestrel_common::error::SqlError;
use kestrel_common::row::{columns_from_sample, ColumnDef, ScalarValue};
use sqlparser::ast::{
    BinaryOperator, CaseWhen, Expr, Function, FunctionArg, FunctionArgExpr, FunctionArguments,
    SelectItem, Statement, UnaryOperator, Value,
};

use crate::facade::{self, QueryFacade};

/// Session-provided values the evaluator can read. Implemented by the
/// protocol crate's session type.
pub trait VarSource {
    /// Shadow system variable, name already lowercased and scope-stripped.
    fn system_var(&self, name: &str) -> Option<ScalarValue>;
    /// User-defined `@name` variable.
    fn user_var(&self, name: &str) -> Option<ScalarValue>;
    fn connection_id(&self) -> u64;
    fn current_database(&self) -> Option<String>;
    fn server_version(&self) -> String;
    fn current_user(&self) -> String;
}

/// Evaluate a static SELECT into a one-row result (zero rows under
/// `LIMIT 0`). The statement must already be classified `StaticSelect`.
pub fn eval_static_select(
    stmt: &Statement,
    vars: &dyn VarSource,
) -> Result<(Vec<ColumnDef>, Vec<Vec<ScalarValue>>), SqlError> {
    let facade = QueryFacade::new(stmt);
    if !facade.is_static_select() {
        return Err(SqlError::Parse(
            "not a static SELECT; cannot evaluate locally".into(),
        ));
    }

    let mut names = Vec::new();
    let mut row = Vec::new();
    for item in facade.projection() {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                names.push(expr.to_string());
                row.push(eval_expr(expr, vars)?);
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                names.push(alias.value.clone());
                row.push(eval_expr(expr, vars)?);
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                return Err(SqlError::Parse(
                    "wildcard projection requires a FROM clause".into(),
                ));
            }
        }
    }

    let rows = if facade.limit() == Some(0) {
        Vec::new()
    } else {
        vec![row]
    };
    let columns = columns_from_sample(&names, rows.first().map(|r| r.as_slice()));
    Ok((columns, rows))
}

/// Evaluate one scalar expression.
pub fn eval_expr(expr: &Expr, vars: &dyn VarSource) -> Result<ScalarValue, SqlError> {
    match expr {
        Expr::Value(value) => eval_literal(&value.value),
        Expr::Nested(inner) => eval_expr(inner, vars),
        Expr::Identifier(ident) => eval_identifier(&ident.value, vars),
        Expr::CompoundIdentifier(parts) => {
            // `@@session.sql_mode` parses as ["@@session", "sql_mode"].
            let first = parts
                .first()
                .ok_or_else(|| SqlError::Parse("empty identifier".into()))?;
            if let Some(scope) = first.value.strip_prefix("@@") {
                if scope.eq_ignore_ascii_case("session") || scope.eq_ignore_ascii_case("global") {
                    let name = parts
                        .last()
                        .map(|p| p.value.to_ascii_lowercase())
                        .unwrap_or_default();
                    return Ok(vars.system_var(&name).unwrap_or(ScalarValue::Null));
                }
            }
            Err(SqlError::Parse(format!(
                "cannot evaluate column reference without a FROM clause: {expr}"
            )))
        }
        Expr::UnaryOp { op, expr } => {
            let value = eval_expr(expr, vars)?;
            match op {
                UnaryOperator::Plus => Ok(value),
                UnaryOperator::Minus => match value {
                    ScalarValue::Int(v) => Ok(ScalarValue::Int(-v)),
                    ScalarValue::Double(v) => Ok(ScalarValue::Double(-v)),
                    ScalarValue::Null => Ok(ScalarValue::Null),
                    other => Err(SqlError::Parse(format!("cannot negate {other:?}"))),
                },
                UnaryOperator::Not => Ok(bool_value(!truthy(&value))),
                _ => Err(SqlError::Parse(format!("unsupported operator: {op}"))),
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let lhs = eval_expr(left, vars)?;
            let rhs = eval_expr(right, vars)?;
            eval_binop(&lhs, op, &rhs)
        }
        Expr::IsNull(inner) => Ok(bool_value(eval_expr(inner, vars)?.is_null())),
        Expr::IsNotNull(inner) => Ok(bool_value(!eval_expr(inner, vars)?.is_null())),
        Expr::Cast {
            expr: inner,
            data_type,
            ..
        } => {
            let value = eval_expr(inner, vars)?;
            Ok(cast_value(value, &data_type.to_string()))
        }
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            let operand_value = operand
                .as_ref()
                .map(|op| eval_expr(op, vars))
                .transpose()?;
            for CaseWhen { condition, result } in conditions {
                let matched = match &operand_value {
                    Some(op_value) => {
                        let cond = eval_expr(condition, vars)?;
                        values_equal(op_value, &cond)
                    }
                    None => truthy(&eval_expr(condition, vars)?),
                };
                if matched {
                    return eval_expr(result, vars);
                }
            }
            match else_result {
                Some(else_expr) => eval_expr(else_expr, vars),
                None => Ok(ScalarValue::Null),
            }
        }
        Expr::Function(func) => eval_function(func, vars),
        other => Err(SqlError::Parse(format!(
            "cannot evaluate expression locally: {other}"
        ))),
    }
}

fn eval_literal(value: &Value) -> Result<ScalarValue, SqlError> {
    match value {
        Value::Number(text, _) => {
            if let Ok(int) = text.parse::<i64>() {
                Ok(ScalarValue::Int(int))
            } else {
                text.parse::<f64>()
                    .map(ScalarValue::Double)
                    .map_err(|_| SqlError::Parse(format!("invalid number literal: {text}")))
            }
        }
        Value::SingleQuotedString(text) | Value::DoubleQuotedString(text) => {
            Ok(ScalarValue::Text(text.clone()))
        }
        Value::Boolean(b) => Ok(bool_value(*b)),
        Value::Null => Ok(ScalarValue::Null),
        other => Err(SqlError::Parse(format!("unsupported literal: {other}"))),
    }
}

fn eval_identifier(name: &str, vars: &dyn VarSource) -> Result<ScalarValue, SqlError> {
    if let Some(var) = name.strip_prefix("@@") {
        let var = var
            .strip_prefix("session.")
            .or_else(|| var.strip_prefix("SESSION."))
            .or_else(|| var.strip_prefix("global."))
            .or_else(|| var.strip_prefix("GLOBAL."))
            .unwrap_or(var);
        return Ok(vars
            .system_var(&var.to_ascii_lowercase())
            .unwrap_or(ScalarValue::Null));
    }
    if let Some(var) = name.strip_prefix('@') {
        return Ok(vars.user_var(var).unwrap_or(ScalarValue::Null));
    }
    Err(SqlError::Parse(format!(
        "cannot evaluate column reference without a FROM clause: {name}"
    )))
}

fn eval_function(func: &Function, vars: &dyn VarSource) -> Result<ScalarValue, SqlError> {
    let name = facade::function_name(&func.name)
        .ok_or_else(|| SqlError::Parse("unnamed function".into()))?;
    let args = function_args(func);
    let mut arg_values = Vec::with_capacity(args.len());
    for arg in &args {
        arg_values.push(eval_expr(arg, vars)?);
    }

    match name.as_str() {
        "CONNECTION_ID" => Ok(ScalarValue::UInt(vars.connection_id())),
        "DATABASE" | "SCHEMA" => Ok(vars
            .current_database()
            .map(ScalarValue::Text)
            .unwrap_or(ScalarValue::Null)),
        "VERSION" => Ok(ScalarValue::Text(vars.server_version())),
        "USER" | "CURRENT_USER" | "SESSION_USER" | "SYSTEM_USER" => {
            Ok(ScalarValue::Text(vars.current_user()))
        }
        "NOW" | "CURRENT_TIMESTAMP" | "LOCALTIME" | "LOCALTIMESTAMP" | "SYSDATE" => Ok(
            ScalarValue::Text(Local::now().format("%Y-%m-%d %H:%M:%S").to_string()),
        ),
        "CURDATE" | "CURRENT_DATE" => Ok(ScalarValue::Text(
            Local::now().format("%Y-%m-%d").to_string(),
        )),
        "CURTIME" | "CURRENT_TIME" => Ok(ScalarValue::Text(
            Local::now().format("%H:%M:%S").to_string(),
        )),
        "UNIX_TIMESTAMP" if args.is_empty() => Ok(ScalarValue::Int(Local::now().timestamp())),
        "LAST_INSERT_ID" => Ok(ScalarValue::UInt(0)),
        "PI" => Ok(ScalarValue::Double(std::f64::consts::PI)),
        "UPPER" | "UCASE" => unary_text(&name, &arg_values, |s| s.to_uppercase()),
        "LOWER" | "LCASE" => unary_text(&name, &arg_values, |s| s.to_lowercase()),
        "TRIM" => unary_text(&name, &arg_values, |s| s.trim().to_string()),
        "LTRIM" => unary_text(&name, &arg_values, |s| s.trim_start().to_string()),
        "RTRIM" => unary_text(&name, &arg_values, |s| s.trim_end().to_string()),
        "LENGTH" | "CHAR_LENGTH" | "CHARACTER_LENGTH" => match arg_values.as_slice() {
            [ScalarValue::Null] => Ok(ScalarValue::Null),
            [value] => Ok(ScalarValue::Int(
                value.render().map(|s| s.chars().count() as i64).unwrap_or(0),
            )),
            _ => Err(wrong_args(&name)),
        },
        "CONCAT" => {
            if arg_values.iter().any(ScalarValue::is_null) {
                return Ok(ScalarValue::Null);
            }
            let mut out = String::new();
            for value in &arg_values {
                out.push_str(&value.render().unwrap_or_default());
            }
            Ok(ScalarValue::Text(out))
        }
        "COALESCE" => Ok(arg_values
            .into_iter()
            .find(|v| !v.is_null())
            .unwrap_or(ScalarValue::Null)),
        "IFNULL" => match arg_values.as_slice() {
            [first, second] => Ok(if first.is_null() {
                second.clone()
            } else {
                first.clone()
            }),
            _ => Err(wrong_args(&name)),
        },
        "IF" => match arg_values.as_slice() {
            [cond, then_value, else_value] => Ok(if truthy(cond) {
                then_value.clone()
            } else {
                else_value.clone()
            }),
            _ => Err(wrong_args(&name)),
        },
        "ABS" => match arg_values.as_slice() {
            [ScalarValue::Int(v)] => Ok(ScalarValue::Int(v.abs())),
            [ScalarValue::Double(v)] => Ok(ScalarValue::Double(v.abs())),
            [ScalarValue::Null] => Ok(ScalarValue::Null),
            _ => Err(wrong_args(&name)),
        },
        "FLOOR" => unary_double(&name, &arg_values, |v| v.floor()),
        "CEIL" | "CEILING" => unary_double(&name, &arg_values, |v| v.ceil()),
        "ROUND" => match arg_values.as_slice() {
            [ScalarValue::Int(v)] => Ok(ScalarValue::Int(*v)),
            [ScalarValue::Double(v)] => Ok(ScalarValue::Int(v.round() as i64)),
            [ScalarValue::Double(v), ScalarValue::Int(places)] => {
                let factor = 10f64.powi(*places as i32);
                Ok(ScalarValue::Double((v * factor).round() / factor))
            }
            [ScalarValue::Null, ..] => Ok(ScalarValue::Null),
            _ => Err(wrong_args(&name)),
        },
        other => Err(SqlError::Parse(format!(
            "cannot evaluate function locally: {other}()"
        ))),
    }
}

fn function_args(func: &Function) -> Vec<&Expr> {
    match &func.args {
        FunctionArguments::List(list) => list
            .args
            .iter()
            .filter_map(|arg| match arg {
                FunctionArg::Unnamed(FunctionArgExpr::Expr(expr)) => Some(expr),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

fn unary_text(
    name: &str,
    args: &[ScalarValue],
    apply: impl Fn(&str) -> String,
) -> Result<ScalarValue, SqlError> {
    match args {
        [ScalarValue::Null] => Ok(ScalarValue::Null),
        [value] => Ok(ScalarValue::Text(apply(
            &value.render().unwrap_or_default(),
        ))),
        _ => Err(wrong_args(name)),
    }
}

fn unary_double(
    name: &str,
    args: &[ScalarValue],
    apply: impl Fn(f64) -> f64,
) -> Result<ScalarValue, SqlError> {
    match args {
        [ScalarValue::Int(v)] => Ok(ScalarValue::Int(apply(*v as f64) as i64)),
        [ScalarValue::Double(v)] => Ok(ScalarValue::Int(apply(*v) as i64)),
        [ScalarValue::Null] => Ok(ScalarValue::Null),
        _ => Err(wrong_args(name)),
    }
}

fn wrong_args(name: &str) -> SqlError {
    SqlError::Parse(format!("wrong argument count for {name}()"))
}

fn eval_binop(
    lhs: &ScalarValue,
    op: &BinaryOperator,
    rhs: &ScalarValue,
) -> Result<ScalarValue, SqlError> {
    use BinaryOperator::*;
    match op {
        Plus | Minus | Multiply | Divide | Modulo => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(ScalarValue::Null);
            }
            let (a, b) = (as_double(lhs)?, as_double(rhs)?);
            let result = match op {
                Plus => a + b,
                Minus => a - b,
                Multiply => a * b,
                Divide => {
                    if b == 0.0 {
                        return Ok(ScalarValue::Null); // MySQL: division by zero yields NULL
                    }
                    a / b
                }
                Modulo => {
                    if b == 0.0 {
                        return Ok(ScalarValue::Null);
                    }
                    a % b
                }
                _ => unreachable!(),
            };
            if both_int(lhs, rhs) && result.fract() == 0.0 && !matches!(op, Divide) {
                Ok(ScalarValue::Int(result as i64))
            } else {
                Ok(ScalarValue::Double(result))
            }
        }
        Eq => Ok(bool_value(values_equal(lhs, rhs))),
        NotEq => Ok(bool_value(!values_equal(lhs, rhs))),
        Lt | LtEq | Gt | GtEq => {
            if lhs.is_null() || rhs.is_null() {
                return Ok(ScalarValue::Null);
            }
            let ordering = compare(lhs, rhs)?;
            let result = match op {
                Lt => ordering.is_lt(),
                LtEq => ordering.is_le(),
                Gt => ordering.is_gt(),
                GtEq => ordering.is_ge(),
                _ => unreachable!(),
            };
            Ok(bool_value(result))
        }
        And => Ok(bool_value(truthy(lhs) && truthy(rhs))),
        Or => Ok(bool_value(truthy(lhs) || truthy(rhs))),
        other => Err(SqlError::Parse(format!("unsupported operator: {other}"))),
    }
}

fn both_int(a: &ScalarValue, b: &ScalarValue) -> bool {
    matches!(a, ScalarValue::Int(_) | ScalarValue::UInt(_))
        && matches!(b, ScalarValue::Int(_) | ScalarValue::UInt(_))
}

fn as_double(value: &ScalarValue) -> Result<f64, SqlError> {
    match value {
        ScalarValue::Int(v) => Ok(*v as f64),
        ScalarValue::UInt(v) => Ok(*v as f64),
        ScalarValue::Double(v) => Ok(*v),
        ScalarValue::Text(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| SqlError::Parse(format!("not a number: '{s}'"))),
        other => Err(SqlError::Parse(format!("not a number: {other:?}"))),
    }
}

fn values_equal(a: &ScalarValue, b: &ScalarValue) -> bool {
    match (a, b) {
        (ScalarValue::Null, _) | (_, ScalarValue::Null) => false,
        (ScalarValue::Text(x), ScalarValue::Text(y)) => x == y,
        _ => match (as_double(a), as_double(b)) {
            (Ok(x), Ok(y)) => x == y,
            _ => a.render() == b.render(),
        },
    }
}

fn compare(a: &ScalarValue, b: &ScalarValue) -> Result<std::cmp::Ordering, SqlError> {
    if let (ScalarValue::Text(x), ScalarValue::Text(y)) = (a, b) {
        return Ok(x.cmp(y));
    }
    let (x, y) = (as_double(a)?, as_double(b)?);
    Ok(x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal))
}

fn truthy(value: &ScalarValue) -> bool {
    match value {
        ScalarValue::Null => false,
        ScalarValue::Int(v) => *v != 0,
        ScalarValue::UInt(v) => *v != 0,
        ScalarValue::Double(v) => *v != 0.0,
        ScalarValue::Text(s) => s.trim().parse::<f64>().map(|v| v != 0.0).unwrap_or(false),
        ScalarValue::Bytes(_) => false,
    }
}

fn bool_value(b: bool) -> ScalarValue {
    ScalarValue::Int(if b { 1 } else { 0 })
}

fn cast_value(value: ScalarValue, target: &str) -> ScalarValue {
    let target = target.to_ascii_uppercase();
    if value.is_null() {
        return ScalarValue::Null;
    }
    if target.contains("CHAR") || target.contains("TEXT") {
        ScalarValue::Text(value.render().unwrap_or_default())
    } else if target.contains("INT") || target.contains("SIGNED") {
        value
            .render()
            .and_then(|s| s.trim().parse::<i64>().ok())
            .map(ScalarValue::Int)
            .unwrap_or(ScalarValue::Null)
    } else if target.contains("DOUBLE") || target.contains("FLOAT") || target.contains("DECIMAL") {
        value
            .render()
            .and_then(|s| s.trim().parse::<f64>().ok())
            .map(ScalarValue::Double)
            .unwrap_or(ScalarValue::Null)
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_one;
    use kestrel_common::row::ColumnTypeHint;

    struct TestVars;

    impl VarSource for TestVars {
        fn system_var(&self, name: &str) -> Option<ScalarValue> {
            match name {
                "version_comment" => Some(ScalarValue::Text("KestrelProxy".into())),
                "autocommit" => Some(ScalarValue::Int(1)),
                "tx_isolation" => Some(ScalarValue::Text("REPEATABLE-READ".into())),
                _ => None,
            }
        }
        fn user_var(&self, name: &str) -> Option<ScalarValue> {
            (name == "answer").then(|| ScalarValue::Int(42))
        }
        fn connection_id(&self) -> u64 {
            17
        }
        fn current_database(&self) -> Option<String> {
            Some("analytics".into())
        }
        fn server_version(&self) -> String {
            "8.0.33-kestrel".into()
        }
        fn current_user(&self) -> String {
            "tableau@%".into()
        }
    }

    fn eval_sql(sql: &str) -> (Vec<ColumnDef>, Vec<Vec<ScalarValue>>) {
        let stmt = parse_one(sql).unwrap();
        eval_static_select(&stmt, &TestVars).unwrap()
    }

    #[test]
    fn test_select_literal() {
        let (cols, rows) = eval_sql("SELECT 1");
        assert_eq!(cols.len(), 1);
        assert_eq!(rows, vec![vec![ScalarValue::Int(1)]]);
    }

    #[test]
    fn test_select_arithmetic() {
        let (_, rows) = eval_sql("SELECT 2 + 3 * 4");
        assert_eq!(rows[0][0], ScalarValue::Int(14));
    }

    #[test]
    fn test_division_yields_double() {
        let (_, rows) = eval_sql("SELECT 7 / 2");
        assert_eq!(rows[0][0], ScalarValue::Double(3.5));
    }

    #[test]
    fn test_division_by_zero_yields_null() {
        let (_, rows) = eval_sql("SELECT 1 / 0");
        assert_eq!(rows[0][0], ScalarValue::Null);
    }

    #[test]
    fn test_connection_id() {
        let (cols, rows) = eval_sql("SELECT CONNECTION_ID()");
        assert_eq!(cols.len(), 1);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0][0], ScalarValue::UInt(17));
        assert_eq!(cols[0].ty, ColumnTypeHint::Integer);
    }

    #[test]
    fn test_database_and_version() {
        let (_, rows) = eval_sql("SELECT DATABASE(), VERSION()");
        assert_eq!(rows[0][0], ScalarValue::Text("analytics".into()));
        assert_eq!(rows[0][1], ScalarValue::Text("8.0.33-kestrel".into()));
    }

    #[test]
    fn test_system_variable_read() {
        let (cols, rows) = eval_sql("SELECT @@version_comment");
        assert_eq!(rows[0][0], ScalarValue::Text("KestrelProxy".into()));
        assert_eq!(cols[0].name, "@@version_comment");
    }

    #[test]
    fn test_session_scoped_system_variable() {
        let (_, rows) = eval_sql("SELECT @@session.autocommit");
        assert_eq!(rows[0][0], ScalarValue::Int(1));
    }

    #[test]
    fn test_unknown_system_variable_is_null() {
        let (_, rows) = eval_sql("SELECT @@no_such_variable");
        assert_eq!(rows[0][0], ScalarValue::Null);
    }

    #[test]
    fn test_user_variable_read() {
        let (_, rows) = eval_sql("SELECT @answer");
        assert_eq!(rows[0][0], ScalarValue::Int(42));
    }

    #[test]
    fn test_alias_names_column() {
        let (cols, _) = eval_sql("SELECT 1 AS ok");
        assert_eq!(cols[0].name, "ok");
    }

    #[test]
    fn test_string_functions() {
        let (_, rows) = eval_sql("SELECT UPPER('abc'), LENGTH('abcd'), CONCAT('a', 'b', 'c')");
        assert_eq!(rows[0][0], ScalarValue::Text("ABC".into()));
        assert_eq!(rows[0][1], ScalarValue::Int(4));
        assert_eq!(rows[0][2], ScalarValue::Text("abc".into()));
    }

    #[test]
    fn test_concat_with_null_is_null() {
        let (_, rows) = eval_sql("SELECT CONCAT('a', NULL)");
        assert_eq!(rows[0][0], ScalarValue::Null);
    }

    #[test]
    fn test_coalesce_and_ifnull() {
        let (_, rows) = eval_sql("SELECT COALESCE(NULL, 5), IFNULL(NULL, 'x')");
        assert_eq!(rows[0][0], ScalarValue::Int(5));
        assert_eq!(rows[0][1], ScalarValue::Text("x".into()));
    }

    #[test]
    fn test_limit_zero_returns_columns_only() {
        let (cols, rows) = eval_sql("SELECT 1 AS probe LIMIT 0");
        assert_eq!(cols.len(), 1);
        assert!(rows.is_empty());
    }

    #[test]
    fn test_now_has_datetime_shape() {
        let (_, rows) = eval_sql("SELECT NOW()");
        match &rows[0][0] {
            ScalarValue::Text(s) => {
                assert_eq!(s.len(), 19);
                assert_eq!(&s[4..5], "-");
                assert_eq!(&s[10..11], " ");
            }
            other => panic!("expected text timestamp, got {other:?}"),
        }
    }

    #[test]
    fn test_case_expression() {
        let (_, rows) = eval_sql("SELECT CASE WHEN 1 = 1 THEN 'yes' ELSE 'no' END");
        assert_eq!(rows[0][0], ScalarValue::Text("yes".into()));
    }

    #[test]
    fn test_unknown_function_is_error() {
        let stmt = parse_one("SELECT NO_SUCH_FUNC(1)").unwrap();
        assert!(eval_static_select(&stmt, &TestVars).is_err());
    }
}
