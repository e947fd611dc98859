//! Subquery flattening.
//!
//! Collapses `SELECT p… FROM (SELECT q… FROM T WHERE Wi [GROUP BY Gi]) a
//! WHERE Wo [GROUP BY Go]` into a single
//! `SELECT p′… FROM T WHERE Wi AND Wo′ [GROUP BY G′]`.
//!
//! Every alias-qualified or bare reference in the outer projection, WHERE,
//! GROUP BY and ORDER BY is resolved to the corresponding inner expression.
//! Any name that does not resolve, HAVING on either side, or a shape this
//! pass does not understand makes the flattener decline: it returns `None`
//! and the statement continues unchanged. Flattening never errors.

use sqlparser::ast::{
    BinaryOperator, CaseWhen, Expr, FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr,
    Ident, OrderByKind, Query, Select, SelectItem, SetExpr, Statement,
};

use kestrel_sql_frontend::facade::{self, QueryFacade};

/// Inner-projection output names mapped to their defining expressions.
struct AliasMap {
    entries: Vec<(String, Expr)>,
    /// Inner projection contains `*`: unresolved names fall through as
    /// plain columns of the inner FROM.
    has_star: bool,
}

impl AliasMap {
    fn lookup(&self, name: &str) -> Option<&Expr> {
        self.entries
            .iter()
            .find(|(entry, _)| entry.eq_ignore_ascii_case(name))
            .map(|(_, expr)| expr)
    }
}

/// Attempt to flatten one level of derived-table nesting. `max_depth` bounds
/// the subquery depth of the produced statement; exceeding it declines.
pub fn flatten(stmt: &Statement, max_depth: usize) -> Option<Statement> {
    let facade = QueryFacade::new(stmt);
    let outer_query = facade.query()?;
    let outer_select = facade.select()?;
    let (inner_query, alias) = facade.derived_from()?;

    if outer_query.with.is_some() {
        return None;
    }

    let inner_select = match inner_query.body.as_ref() {
        SetExpr::Select(select) => select.as_ref(),
        _ => return None,
    };

    // HAVING on either side changes aggregate semantics under a WHERE
    // merge; decline and let the gates judge the statement as-is.
    if outer_select.having.is_some() || inner_select.having.is_some() {
        return None;
    }
    if outer_select.distinct.is_some() {
        return None;
    }
    if inner_select.distinct.is_some() && outer_select.selection.is_some() {
        return None;
    }

    let alias_name = alias.map(|ident| ident.value.clone());
    let map = build_alias_map(inner_select);

    let mut flattened: Query = inner_query.clone();
    let flat_select = match flattened.body.as_mut() {
        SetExpr::Select(select) => select.as_mut(),
        _ => return None,
    };

    // Projection p′.
    if !is_star_projection(&outer_select.projection, alias_name.as_deref()) {
        let mut projection = Vec::with_capacity(outer_select.projection.len());
        for item in &outer_select.projection {
            projection.push(resolve_projection_item(item, alias_name.as_deref(), &map)?);
        }
        flat_select.projection = projection;
    }

    // WHERE merge: Wi AND Wo′, in that order, duplicates preserved.
    if let Some(outer_where) = &outer_select.selection {
        let mut resolved = outer_where.clone();
        resolve_expr(&mut resolved, alias_name.as_deref(), &map)?;
        flat_select.selection = Some(match flat_select.selection.take() {
            Some(inner_where) => Expr::BinaryOp {
                left: Box::new(inner_where),
                op: BinaryOperator::And,
                right: Box::new(resolved),
            },
            None => resolved,
        });
    }

    // GROUP BY inheritance: Go translated through the alias map wins;
    // otherwise the inner Gi (already present in the clone) stays.
    let outer_group = facade.group_by();
    if !outer_group.is_empty() {
        let mut translated = outer_group.to_vec();
        for expr in &mut translated {
            resolve_expr(expr, alias_name.as_deref(), &map)?;
        }
        flat_select.group_by = GroupByExpr::Expressions(translated, Vec::new());
    }

    // ORDER BY carries over when the inner has none.
    if let Some(outer_order) = &outer_query.order_by {
        if flattened.order_by.is_none() {
            let mut carried = outer_order.clone();
            if let OrderByKind::Expressions(exprs) = &mut carried.kind {
                for order_expr in exprs.iter_mut() {
                    resolve_expr(&mut order_expr.expr, alias_name.as_deref(), &map)?;
                }
            }
            flattened.order_by = Some(carried);
        }
    }

    // LIMIT: smaller of the two literals when both exist.
    match (&outer_query.limit_clause, &flattened.limit_clause) {
        (Some(outer_limit), None) => {
            flattened.limit_clause = Some(outer_limit.clone());
        }
        (Some(outer_limit), Some(inner_limit)) => {
            let outer_value = facade::limit_clause_value(outer_limit);
            let inner_value = facade::limit_clause_value(inner_limit);
            if let (Some(o), Some(i)) = (outer_value, inner_value) {
                if o < i {
                    flattened.limit_clause = Some(outer_limit.clone());
                }
            }
        }
        _ => {}
    }

    let candidate = Statement::Query(Box::new(flattened));
    if QueryFacade::new(&candidate).subquery_depth() > max_depth {
        return None;
    }
    Some(candidate)
}

fn build_alias_map(inner: &Select) -> AliasMap {
    let mut entries = Vec::new();
    let mut has_star = false;
    for item in &inner.projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => has_star = true,
            SelectItem::UnnamedExpr(expr) => {
                if let Some(name) = output_name(expr) {
                    entries.push((name, expr.clone()));
                }
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                entries.push((alias.value.clone(), expr.clone()));
            }
        }
    }
    AliasMap { entries, has_star }
}

fn output_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|ident| ident.value.clone()),
        _ => None,
    }
}

/// `SELECT *` or `SELECT a.*` where `a` is the derived-table alias.
fn is_star_projection(projection: &[SelectItem], alias: Option<&str>) -> bool {
    if projection.len() != 1 {
        return false;
    }
    match &projection[0] {
        SelectItem::Wildcard(_) => true,
        SelectItem::QualifiedWildcard(kind, _) => {
            let qualifier = kind.to_string();
            let qualifier = qualifier.trim_end_matches(".*");
            alias.map(|a| qualifier.eq_ignore_ascii_case(a)).unwrap_or(false)
        }
        _ => false,
    }
}

fn resolve_projection_item(
    item: &SelectItem,
    alias: Option<&str>,
    map: &AliasMap,
) -> Option<SelectItem> {
    match item {
        SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => None,
        SelectItem::UnnamedExpr(expr) => {
            let referenced = output_name(expr);
            let mut resolved = expr.clone();
            resolve_expr(&mut resolved, alias, map)?;
            // A name that resolved to a computed inner expression keeps its
            // outer output name via an explicit alias.
            if let Some(name) = referenced {
                let still_same_name = matches!(
                    &resolved,
                    Expr::Identifier(ident) if ident.value.eq_ignore_ascii_case(&name)
                );
                if !still_same_name {
                    return Some(SelectItem::ExprWithAlias {
                        expr: resolved,
                        alias: Ident::new(name),
                    });
                }
            }
            Some(SelectItem::UnnamedExpr(resolved))
        }
        SelectItem::ExprWithAlias { expr, alias: out } => {
            let mut resolved = expr.clone();
            resolve_expr(&mut resolved, alias, map)?;
            Some(SelectItem::ExprWithAlias {
                expr: resolved,
                alias: out.clone(),
            })
        }
    }
}

/// Rewrite alias references inside `expr` to the inner expressions they
/// name. Returns `None` when any reference fails to resolve or the
/// expression contains a shape this pass does not rewrite (subqueries,
/// exotic operators); the caller then declines the whole flatten.
fn resolve_expr(expr: &mut Expr, alias: Option<&str>, map: &AliasMap) -> Option<()> {
    match expr {
        Expr::Identifier(ident) => {
            if let Some(resolved) = map.lookup(&ident.value) {
                *expr = resolved.clone();
                Some(())
            } else if map.has_star {
                Some(())
            } else {
                None
            }
        }
        Expr::CompoundIdentifier(parts) => {
            if parts.len() == 2
                && alias
                    .map(|a| parts[0].value.eq_ignore_ascii_case(a))
                    .unwrap_or(false)
            {
                let column = parts[1].clone();
                if let Some(resolved) = map.lookup(&column.value) {
                    *expr = resolved.clone();
                    Some(())
                } else if map.has_star {
                    *expr = Expr::Identifier(column);
                    Some(())
                } else {
                    None
                }
            } else {
                None
            }
        }
        Expr::Value(_) => Some(()),
        Expr::Nested(inner) => resolve_expr(inner, alias, map),
        Expr::BinaryOp { left, right, .. } => {
            resolve_expr(left, alias, map)?;
            resolve_expr(right, alias, map)
        }
        Expr::UnaryOp { expr: inner, .. } => resolve_expr(inner, alias, map),
        Expr::IsNull(inner)
        | Expr::IsNotNull(inner)
        | Expr::IsTrue(inner)
        | Expr::IsNotTrue(inner)
        | Expr::IsFalse(inner)
        | Expr::IsNotFalse(inner) => resolve_expr(inner, alias, map),
        Expr::Between {
            expr: inner,
            low,
            high,
            ..
        } => {
            resolve_expr(inner, alias, map)?;
            resolve_expr(low, alias, map)?;
            resolve_expr(high, alias, map)
        }
        Expr::InList {
            expr: inner, list, ..
        } => {
            resolve_expr(inner, alias, map)?;
            for item in list.iter_mut() {
                resolve_expr(item, alias, map)?;
            }
            Some(())
        }
        Expr::Like {
            expr: inner,
            pattern,
            ..
        }
        | Expr::ILike {
            expr: inner,
            pattern,
            ..
        } => {
            resolve_expr(inner, alias, map)?;
            resolve_expr(pattern, alias, map)
        }
        Expr::Cast { expr: inner, .. } => resolve_expr(inner, alias, map),
        Expr::Case {
            operand,
            conditions,
            else_result,
            ..
        } => {
            if let Some(op) = operand {
                resolve_expr(op, alias, map)?;
            }
            for CaseWhen { condition, result } in conditions.iter_mut() {
                resolve_expr(condition, alias, map)?;
                resolve_expr(result, alias, map)?;
            }
            if let Some(else_expr) = else_result {
                resolve_expr(else_expr, alias, map)?;
            }
            Some(())
        }
        Expr::Function(func) => {
            if let FunctionArguments::List(arg_list) = &mut func.args {
                for arg in arg_list.args.iter_mut() {
                    if let FunctionArg::Unnamed(FunctionArgExpr::Expr(inner)) = arg {
                        resolve_expr(inner, alias, map)?;
                    }
                }
            }
            Some(())
        }
        Expr::Tuple(items) => {
            for item in items.iter_mut() {
                resolve_expr(item, alias, map)?;
            }
            Some(())
        }
        // Correlated subqueries and anything unrecognized: decline.
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_sql_frontend::parser::parse_one;

    fn flatten_sql(sql: &str) -> Option<String> {
        let stmt = parse_one(sql).unwrap();
        flatten(&stmt, 2).map(|s| s.to_string())
    }

    #[test]
    fn test_star_wrapper_with_outer_where() {
        let out = flatten_sql(
            "SELECT * FROM (SELECT col1, col2 FROM t WHERE cob_date = '2024-01-15') a \
             WHERE col1 > 5",
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT col1, col2 FROM t WHERE cob_date = '2024-01-15' AND col1 > 5"
        );
    }

    #[test]
    fn test_alias_projection_resolves() {
        let out = flatten_sql(
            "SELECT a.col1, a.col2 FROM (SELECT col1, col2 FROM t WHERE date_index = -1) a",
        )
        .unwrap();
        assert_eq!(out, "SELECT col1, col2 FROM t WHERE date_index = -1");
    }

    #[test]
    fn test_projection_of_inner_computed_alias_keeps_name() {
        let out = flatten_sql(
            "SELECT a.total FROM (SELECT SUM(amount) AS total FROM t WHERE date_index = -1) a",
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT SUM(amount) AS total FROM t WHERE date_index = -1"
        );
    }

    #[test]
    fn test_where_conservation_both_predicates_present() {
        let out = flatten_sql(
            "SELECT * FROM (SELECT x FROM t WHERE cob_date = '2024-01-15') a WHERE x = 3",
        )
        .unwrap();
        assert!(out.contains("cob_date = '2024-01-15'"));
        assert!(out.contains("x = 3"));
        assert!(out.contains(" AND "));
    }

    #[test]
    fn test_outer_group_by_wins() {
        let out = flatten_sql(
            "SELECT a.cat FROM (SELECT cat, val FROM t WHERE date_index = -1 GROUP BY val) a \
             GROUP BY a.cat",
        )
        .unwrap();
        assert!(out.ends_with("GROUP BY cat"), "got: {out}");
    }

    #[test]
    fn test_inner_group_by_inherited() {
        let out = flatten_sql(
            "SELECT * FROM (SELECT cat, SUM(v) FROM t WHERE date_index = -1 GROUP BY cat) a",
        )
        .unwrap();
        assert!(out.ends_with("GROUP BY cat"), "got: {out}");
    }

    #[test]
    fn test_unresolvable_name_declines() {
        // `missing` is not projected by the inner SELECT.
        assert!(flatten_sql(
            "SELECT a.missing FROM (SELECT col1 FROM t WHERE date_index = -1) a"
        )
        .is_none());
    }

    #[test]
    fn test_having_on_inner_declines() {
        assert!(flatten_sql(
            "SELECT * FROM (SELECT cat, SUM(v) AS s FROM t GROUP BY cat HAVING SUM(v) > 0) a"
        )
        .is_none());
    }

    #[test]
    fn test_having_on_outer_declines() {
        assert!(flatten_sql(
            "SELECT a.cat FROM (SELECT cat FROM t) a GROUP BY a.cat HAVING COUNT(*) > 1"
        )
        .is_none());
    }

    #[test]
    fn test_no_derived_table_declines() {
        assert!(flatten_sql("SELECT a FROM t WHERE cob_date = '2024-01-15'").is_none());
    }

    #[test]
    fn test_outer_limit_carried() {
        let out = flatten_sql("SELECT * FROM (SELECT x FROM t WHERE date_index = -1) a LIMIT 10")
            .unwrap();
        assert!(out.ends_with("LIMIT 10"), "got: {out}");
    }

    #[test]
    fn test_limit_minimum_of_both() {
        let out = flatten_sql(
            "SELECT * FROM (SELECT x FROM t WHERE date_index = -1 LIMIT 5) a LIMIT 10",
        )
        .unwrap();
        assert!(out.ends_with("LIMIT 5"), "got: {out}");
    }

    #[test]
    fn test_order_by_carried_and_translated() {
        let out = flatten_sql(
            "SELECT * FROM (SELECT x FROM t WHERE date_index = -1) a ORDER BY a.x",
        )
        .unwrap();
        assert!(out.contains("ORDER BY x"), "got: {out}");
    }

    #[test]
    fn test_inner_star_lets_unprojected_names_through() {
        let out = flatten_sql(
            "SELECT * FROM (SELECT * FROM t WHERE cob_date = '2024-01-15') a WHERE other = 1",
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT * FROM t WHERE cob_date = '2024-01-15' AND other = 1"
        );
    }

    #[test]
    fn test_foreign_qualifier_declines() {
        assert!(flatten_sql(
            "SELECT b.col1 FROM (SELECT col1 FROM t WHERE date_index = -1) a"
        )
        .is_none());
    }

    #[test]
    fn test_correlated_subquery_in_outer_where_declines() {
        assert!(flatten_sql(
            "SELECT * FROM (SELECT x FROM t) a WHERE x IN (SELECT y FROM u)"
        )
        .is_none());
    }
}
