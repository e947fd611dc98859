//! GROUP BY completion.
//!
//! The backend requires every non-aggregated projection expression to appear
//! in GROUP BY. Tableau routinely omits the clause (or leaves it partial)
//! and relies on MySQL's permissive grouping, so this pass appends the
//! missing expressions: existing GROUP BY items first, then new items in
//! projection order. Aggregates never enter the clause. A projection with no
//! aggregates is left untouched.

use sqlparser::ast::{Expr, GroupByExpr, SelectItem, SetExpr, Statement};

use kestrel_sql_frontend::facade::{self, QueryFacade};

/// Complete the GROUP BY clause. Returns the rewritten statement and the
/// expressions that were appended, or `None` when nothing needed fixing.
pub fn complete_group_by(stmt: &Statement) -> Option<(Statement, Vec<String>)> {
    let facade = QueryFacade::new(stmt);
    let select = facade.select()?;

    if !facade.projection_has_aggregate() {
        return None;
    }

    // Non-aggregated top-level projection expressions, aliases ignored.
    let mut non_aggregated: Vec<&Expr> = Vec::new();
    for item in &select.projection {
        match item {
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => continue,
            _ => {}
        }
        if let Some(expr) = facade::select_item_expr(item) {
            if !facade::expr_has_aggregate(expr) {
                non_aggregated.push(expr);
            }
        }
    }
    if non_aggregated.is_empty() {
        return None;
    }

    let existing: Vec<Expr> = match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs.clone(),
        // GROUP BY ALL already covers the projection.
        GroupByExpr::All(_) => return None,
    };

    let mut completed = existing.clone();
    let mut added = Vec::new();
    for expr in non_aggregated {
        if !completed.iter().any(|present| exprs_equal(present, expr)) {
            completed.push(expr.clone());
            added.push(expr.to_string());
        }
    }
    if added.is_empty() {
        return None;
    }

    let mut rewritten = stmt.clone();
    let Statement::Query(query) = &mut rewritten else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_mut() else {
        return None;
    };
    select.group_by = GroupByExpr::Expressions(completed, Vec::new());

    Some((rewritten, added))
}

/// Syntactic equality, normalized through re-serialization so quoting and
/// case differences in identifiers do not defeat the check.
fn exprs_equal(a: &Expr, b: &Expr) -> bool {
    strip_ident_quotes(&a.to_string()).eq_ignore_ascii_case(&strip_ident_quotes(&b.to_string()))
}

fn strip_ident_quotes(text: &str) -> String {
    text.chars().filter(|c| *c != '`' && *c != '"').collect()
}
