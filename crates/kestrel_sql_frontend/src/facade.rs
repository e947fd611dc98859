//! Thin, typed view over the parser's AST.
//!
//! Everything downstream (classifier, rewrites, policy gates, synthesizer)
//! inspects statements through this module instead of pattern-matching
//! sqlparser types directly. Identifier comparisons are case-insensitive and
//! quote-agnostic: the parser strips quoting, so comparing `Ident::value`
//! case-insensitively treats bare, backtick and double-quote forms as equal.

use sqlparser::ast::{
    CaseWhen, Expr, GroupByExpr, Ident, LimitClause, ObjectName, ObjectNamePart, Query, Select,
    SelectItem, SetExpr, SetOperator, Statement, TableFactor, Value,
};

/// Aggregate function names recognized by the GROUP BY completer and the
/// projection inspector.
const AGGREGATE_FUNCTIONS: &[&str] = &[
    "SUM",
    "AVG",
    "MIN",
    "MAX",
    "COUNT",
    "GROUP_CONCAT",
    "STDDEV",
    "STDDEV_POP",
    "STDDEV_SAMP",
    "VARIANCE",
    "VAR_POP",
    "VAR_SAMP",
    "BIT_AND",
    "BIT_OR",
    "BIT_XOR",
];

/// Schemas whose tables are metadata, not data. A reference qualified by one
/// of these classifies the statement as `InfoSchemaSelect`.
const METADATA_SCHEMAS: &[&str] = &["information_schema", "performance_schema", "mysql", "sys"];

/// Case-insensitive identifier equality. Quote-agnostic because the parser
/// already stripped the quoting into `Ident::quote_style`.
pub fn ident_eq(ident: &Ident, name: &str) -> bool {
    ident.value.eq_ignore_ascii_case(name)
}

/// The textual parts of a possibly-qualified object name, quoting stripped.
pub fn object_name_parts(name: &ObjectName) -> Vec<String> {
    name.0
        .iter()
        .map(|part| match part {
            ObjectNamePart::Identifier(ident) => ident.value.clone(),
            other => other.to_string(),
        })
        .collect()
}

/// Typed inspection of a parsed statement.
pub struct QueryFacade<'a> {
    stmt: &'a Statement,
}

impl<'a> QueryFacade<'a> {
    pub fn new(stmt: &'a Statement) -> Self {
        Self { stmt }
    }

    pub fn statement(&self) -> &'a Statement {
        self.stmt
    }

    /// The query node when the statement is a SELECT-shaped query.
    pub fn query(&self) -> Option<&'a Query> {
        match self.stmt {
            Statement::Query(q) => Some(q),
            _ => None,
        }
    }

    /// The outermost SELECT body, if the statement is a plain SELECT.
    pub fn select(&self) -> Option<&'a Select> {
        match self.query()?.body.as_ref() {
            SetExpr::Select(select) => Some(select),
            _ => None,
        }
    }

    pub fn projection(&self) -> &'a [SelectItem] {
        self.select().map(|s| s.projection.as_slice()).unwrap_or(&[])
    }

    /// The single FROM table name parts, when the FROM clause is exactly one
    /// plain table with no joins. `None` for derived tables, joins, or
    /// multi-table FROM lists.
    pub fn from_table(&self) -> Option<Vec<String>> {
        let select = self.select()?;
        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return None;
        }
        match &select.from[0].relation {
            TableFactor::Table { name, .. } => Some(object_name_parts(name)),
            _ => None,
        }
    }

    /// The derived table in FROM when the clause is exactly
    /// `FROM ( <subquery> ) [alias]`.
    pub fn derived_from(&self) -> Option<(&'a Query, Option<&'a Ident>)> {
        let select = self.select()?;
        if select.from.len() != 1 || !select.from[0].joins.is_empty() {
            return None;
        }
        match &select.from[0].relation {
            TableFactor::Derived {
                subquery, alias, ..
            } => Some((subquery.as_ref(), alias.as_ref().map(|a| &a.name))),
            _ => None,
        }
    }

    pub fn outer_where(&self) -> Option<&'a Expr> {
        self.select()?.selection.as_ref()
    }

    pub fn group_by(&self) -> &'a [Expr] {
        match self.select().map(|s| &s.group_by) {
            Some(GroupByExpr::Expressions(exprs, _)) => exprs.as_slice(),
            _ => &[],
        }
    }

    pub fn has_group_by(&self) -> bool {
        !self.group_by().is_empty()
    }

    pub fn has_having(&self) -> bool {
        self.select().map(|s| s.having.is_some()).unwrap_or(false)
    }

    pub fn has_order_by(&self) -> bool {
        self.query().map(|q| q.order_by.is_some()).unwrap_or(false)
    }

    /// Literal LIMIT value, when one is present and numeric.
    pub fn limit(&self) -> Option<u64> {
        limit_value(self.query()?)
    }

    /// A SELECT with no FROM, WHERE, GROUP BY, HAVING or ORDER BY.
    /// LIMIT is permitted.
    pub fn is_static_select(&self) -> bool {
        match self.select() {
            Some(select) => {
                select.from.is_empty()
                    && select.selection.is_none()
                    && !self.has_group_by()
                    && select.having.is_none()
                    && !self.has_order_by()
            }
            None => false,
        }
    }

    /// Every table referenced anywhere in the statement, each as its
    /// name parts. Recurses through derived tables and joins.
    pub fn tables_referenced(&self) -> Vec<Vec<String>> {
        let mut tables = Vec::new();
        if let Some(query) = self.query() {
            collect_tables(query, &mut tables);
        }
        tables
    }

    /// True when any referenced table is qualified by a metadata schema
    /// (`information_schema`, `performance_schema`, `mysql`, `sys`).
    pub fn references_metadata_schema(&self) -> bool {
        self.tables_referenced().iter().any(|parts| {
            parts.len() >= 2
                && METADATA_SCHEMAS
                    .iter()
                    .any(|schema| parts[0].eq_ignore_ascii_case(schema))
        })
    }

    /// Names of all functions called anywhere in the outermost query,
    /// uppercased.
    pub fn functions_used(&self) -> Vec<String> {
        let mut functions = Vec::new();
        if let Some(query) = self.query() {
            walk_query_exprs(query, &mut |expr| {
                if let Expr::Function(func) = expr {
                    if let Some(name) = function_name(&func.name) {
                        functions.push(name);
                    }
                }
                true
            });
        }
        functions
    }

    pub fn has_window_functions(&self) -> bool {
        let mut found = false;
        if let Some(query) = self.query() {
            walk_query_exprs(query, &mut |expr| {
                if let Expr::Function(func) = expr {
                    if func.over.is_some() {
                        found = true;
                    }
                }
                true
            });
        }
        found
    }

    /// Any JOIN at any depth, comma-joins included.
    pub fn has_join(&self) -> bool {
        let mut found = false;
        if let Some(query) = self.query() {
            walk_selects(query, &mut |select| {
                if select.from.len() > 1 || select.from.iter().any(|twj| !twj.joins.is_empty()) {
                    found = true;
                }
            });
        }
        found
    }

    /// UNION / INTERSECT / EXCEPT at any depth.
    pub fn has_union(&self) -> bool {
        let mut found = false;
        if let Some(query) = self.query() {
            walk_set_exprs(&query.body, &mut |set_expr| {
                if let SetExpr::SetOperation { op, .. } = set_expr {
                    if matches!(op, SetOperator::Union) {
                        found = true;
                    }
                }
            });
        }
        found
    }

    /// True when the outermost SELECT's WHERE mentions the column directly,
    /// at any depth of the boolean expression. Mentions inside subqueries do
    /// not count.
    pub fn where_mentions(&self, column: &str) -> bool {
        match self.outer_where() {
            Some(expr) => expr_mentions_column(expr, column),
            None => false,
        }
    }

    /// True when at least one projection expression contains an aggregate
    /// call.
    pub fn projection_has_aggregate(&self) -> bool {
        self.projection()
            .iter()
            .any(|item| select_item_expr(item).map(expr_has_aggregate).unwrap_or(false))
    }

    /// Maximum nesting depth of derived-table/scalar subqueries.
    /// 0 = no subqueries.
    pub fn subquery_depth(&self) -> usize {
        self.query().map(|q| query_subquery_depth(q)).unwrap_or(0)
    }
}

/// The expression behind a projection item, ignoring aliases.
/// `None` for wildcards.
pub fn select_item_expr(item: &SelectItem) -> Option<&Expr> {
    match item {
        SelectItem::UnnamedExpr(expr) => Some(expr),
        SelectItem::ExprWithAlias { expr, .. } => Some(expr),
        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => None,
    }
}

/// True when the projection is exactly `SELECT *`.
pub fn projection_is_star(projection: &[SelectItem]) -> bool {
    projection.len() == 1 && matches!(projection[0], SelectItem::Wildcard(_))
}

/// Uppercased unqualified function name.
pub fn function_name(name: &ObjectName) -> Option<String> {
    object_name_parts(name)
        .last()
        .map(|part| part.to_ascii_uppercase())
}

pub fn is_aggregate_function(name: &str) -> bool {
    AGGREGATE_FUNCTIONS
        .iter()
        .any(|agg| name.eq_ignore_ascii_case(agg))
}

/// True when the expression contains an aggregate function call at any
/// depth (window invocations excluded — those are rejected elsewhere).
pub fn expr_has_aggregate(expr: &Expr) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| {
        if let Expr::Function(func) = e {
            if func.over.is_none() {
                if let Some(name) = function_name(&func.name) {
                    if is_aggregate_function(&name) {
                        found = true;
                    }
                }
            }
        }
        true
    });
    found
}

/// True when the expression mentions `column` as a direct reference, not
/// descending into subqueries.
pub fn expr_mentions_column(expr: &Expr, column: &str) -> bool {
    let mut found = false;
    walk_expr(expr, &mut |e| match e {
        Expr::Identifier(ident) => {
            if ident_eq(ident, column) {
                found = true;
            }
            true
        }
        Expr::CompoundIdentifier(parts) => {
            if parts.last().map(|p| ident_eq(p, column)).unwrap_or(false) {
                found = true;
            }
            true
        }
        Expr::Subquery(_) | Expr::InSubquery { .. } | Expr::Exists { .. } => false,
        _ => true,
    });
    found
}

/// Literal numeric LIMIT of a query, if any.
pub fn limit_value(query: &Query) -> Option<u64> {
    limit_clause_value(query.limit_clause.as_ref()?)
}

/// Literal numeric value of a LIMIT clause.
pub fn limit_clause_value(clause: &LimitClause) -> Option<u64> {
    let limit_expr = match clause {
        LimitClause::LimitOffset { limit, .. } => limit.as_ref()?,
        LimitClause::OffsetCommaLimit { limit, .. } => limit,
    };
    match limit_expr {
        Expr::Value(value) => match &value.value {
            Value::Number(n, _) => n.parse().ok(),
            _ => None,
        },
        _ => None,
    }
}

/// Visit every expression reachable from the query: projections, WHERE,
/// GROUP BY, HAVING, ORDER BY, and nested set operations. Descends into
/// derived tables.
pub fn walk_query_exprs(query: &Query, visit: &mut impl FnMut(&Expr) -> bool) {
    walk_set_expr_exprs(&query.body, visit);
    if let Some(order_by) = &query.order_by {
        if let sqlparser::ast::OrderByKind::Expressions(exprs) = &order_by.kind {
            for order_expr in exprs {
                walk_expr(&order_expr.expr, visit);
            }
        }
    }
}

fn walk_set_expr_exprs(set_expr: &SetExpr, visit: &mut impl FnMut(&Expr) -> bool) {
    match set_expr {
        SetExpr::Select(select) => {
            for item in &select.projection {
                if let Some(expr) = select_item_expr(item) {
                    walk_expr(expr, visit);
                }
            }
            if let Some(selection) = &select.selection {
                walk_expr(selection, visit);
            }
            if let GroupByExpr::Expressions(exprs, _) = &select.group_by {
                for expr in exprs {
                    walk_expr(expr, visit);
                }
            }
            if let Some(having) = &select.having {
                walk_expr(having, visit);
            }
            for twj in &select.from {
                walk_table_factor_exprs(&twj.relation, visit);
                for join in &twj.joins {
                    walk_table_factor_exprs(&join.relation, visit);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr_exprs(left, visit);
            walk_set_expr_exprs(right, visit);
        }
        SetExpr::Query(query) => walk_query_exprs(query, visit),
        _ => {}
    }
}

fn walk_table_factor_exprs(factor: &TableFactor, visit: &mut impl FnMut(&Expr) -> bool) {
    if let TableFactor::Derived { subquery, .. } = factor {
        walk_query_exprs(subquery, visit);
    }
}

/// Visit every SELECT node in the query, derived tables included.
pub fn walk_selects(query: &Query, visit: &mut impl FnMut(&Select)) {
    walk_set_expr_selects(&query.body, visit);
}

fn walk_set_expr_selects(set_expr: &SetExpr, visit: &mut impl FnMut(&Select)) {
    match set_expr {
        SetExpr::Select(select) => {
            visit(select);
            for twj in &select.from {
                walk_factor_selects(&twj.relation, visit);
                for join in &twj.joins {
                    walk_factor_selects(&join.relation, visit);
                }
            }
        }
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_expr_selects(left, visit);
            walk_set_expr_selects(right, visit);
        }
        SetExpr::Query(query) => walk_set_expr_selects(&query.body, visit),
        _ => {}
    }
}

fn walk_factor_selects(factor: &TableFactor, visit: &mut impl FnMut(&Select)) {
    if let TableFactor::Derived { subquery, .. } = factor {
        walk_set_expr_selects(&subquery.body, visit);
    }
}

/// Visit every set-operation node.
pub fn walk_set_exprs(set_expr: &SetExpr, visit: &mut impl FnMut(&SetExpr)) {
    visit(set_expr);
    match set_expr {
        SetExpr::SetOperation { left, right, .. } => {
            walk_set_exprs(left, visit);
            walk_set_exprs(right, visit);
        }
        SetExpr::Query(query) => walk_set_exprs(&query.body, visit),
        SetExpr::Select(select) => {
            for twj in &select.from {
                if let TableFactor::Derived { subquery, .. } = &twj.relation {
                    walk_set_exprs(&subquery.body, visit);
                }
                for join in &twj.joins {
                    if let TableFactor::Derived { subquery, .. } = &join.relation {
                        walk_set_exprs(&subquery.body, visit);
                    }
                }
            }
        }
        _ => {}
    }
}

fn collect_tables(query: &Query, out: &mut Vec<Vec<String>>) {
    walk_selects(query, &mut |select| {
        for twj in &select.from {
            collect_factor_tables(&twj.relation, out);
            for join in &twj.joins {
                collect_factor_tables(&join.relation, out);
            }
        }
    });
}

fn collect_factor_tables(factor: &TableFactor, out: &mut Vec<Vec<String>>) {
    if let TableFactor::Table { name, .. } = factor {
        out.push(object_name_parts(name));
    }
}

fn query_subquery_depth(query: &Query) -> usize {
    set_expr_depth(&query.body)
}

fn set_expr_depth(set_expr: &SetExpr) -> usize {
    match set_expr {
        SetExpr::Select(select) => {
            let mut max = 0;
            for twj in &select.from {
                max = max.max(factor_depth(&twj.relation));
                for join in &twj.joins {
                    max = max.max(factor_depth(&join.relation));
                }
            }
            // Scalar subqueries in projection/WHERE count too.
            for item in &select.projection {
                if let Some(expr) = select_item_expr(item) {
                    max = max.max(expr_subquery_depth(expr));
                }
            }
            if let Some(selection) = &select.selection {
                max = max.max(expr_subquery_depth(selection));
            }
            max
        }
        SetExpr::SetOperation { left, right, .. } => set_expr_depth(left).max(set_expr_depth(right)),
        SetExpr::Query(query) => query_subquery_depth(query),
        _ => 0,
    }
}

fn factor_depth(factor: &TableFactor) -> usize {
    match factor {
        TableFactor::Derived { subquery, .. } => 1 + query_subquery_depth(subquery),
        _ => 0,
    }
}

fn expr_subquery_depth(expr: &Expr) -> usize {
    let mut max = 0;
    walk_expr(expr, &mut |e| match e {
        Expr::Subquery(query) => {
            max = max.max(1 + query_subquery_depth(query));
            false
        }
        Expr::InSubquery { subquery, .. } => {
            max = max.max(1 + set_expr_depth(subquery));
            false
        }
        Expr::Exists { subquery, .. } => {
            max = max.max(1 + query_subquery_depth(subquery));
            false
        }
        _ => true,
    });
    max
}

/// Depth-first expression walk. `visit` returns false to stop descending
/// into a node's children (used to fence off subqueries). Unrecognized
/// variants are visited but not descended into.
pub fn walk_expr(expr: &Expr, visit: &mut impl FnMut(&Expr) -> bool) {
    if !visit(expr) {
        return;
    }
    match expr {
        Expr::BinaryOp { left, right, .. } => {
            walk_expr(left, visit);
            walk_expr(right, visit);
        }
        Expr::UnaryOp { expr, .. } => walk_expr(expr, visit),
        Expr::Nested(inner) => walk_expr(inner, visit),
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => walk_expr(inner, visit),
        Expr::Between {
            expr, low, high, ..
        } => {
            walk_expr(expr, visit);
            walk_expr(low, visit);
            walk_expr(high, visit);
        }
        Expr::InList { expr, list, .. } => {
            walk_expr(expr, visit);
            for item in list {
                walk_expr(item, visit);
            }
        }
        Expr::Like { expr, pattern, .. }
        | Expr::ILike { expr, pattern, .. }
        | Expr::SimilarTo { expr, pattern, .. } => {
            walk_expr(expr, visit);
            walk_expr(pattern, visit);
        }
        Expr::Cast { expr, .. } => walk_expr(expr, visit),
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                walk_expr(op, visit);
            }
            for CaseWhen { condition, result } in conditions {
                walk_expr(condition, visit);
                walk_expr(result, visit);
            }
            if let Some(else_result) = else_result {
                walk_expr(else_result, visit);
            }
        }
        Expr::Function(func) => {
            if let sqlparser::ast::FunctionArguments::List(arg_list) = &func.args {
                for arg in &arg_list.args {
                    if let sqlparser::ast::FunctionArg::Unnamed(
                        sqlparser::ast::FunctionArgExpr::Expr(inner),
                    ) = arg
                    {
                        walk_expr(inner, visit);
                    }
                }
            }
        }
        Expr::Tuple(items) => {
            for item in items {
                walk_expr(item, visit);
            }
        }
        Expr::Subquery(subquery) => walk_query_exprs(subquery, visit),
        Expr::InSubquery {
            expr, subquery, ..
        } => {
            walk_expr(expr, visit);
            walk_set_expr_exprs(subquery, visit);
        }
        Expr::Exists { subquery, .. } => walk_query_exprs(subquery, visit),
        _ => {}
    }
}
