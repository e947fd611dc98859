//! Tableau custom-SQL wrapper unwrapping.
//!
//! Tableau wraps user SQL as `SELECT * FROM ( <custom sql> ) \`Custom SQL
//! Query\``. When the outer SELECT adds nothing (no WHERE/GROUP BY/HAVING/
//! ORDER BY, star projection), the wrapper is dropped and the inner SELECT
//! stands alone, with an outer LIMIT carried over. Outer clauses that do
//! contribute are the flattener's job, not this pass's.

use sqlparser::ast::{SelectItem, SetExpr, Statement};

use kestrel_sql_frontend::facade::{self, QueryFacade};

/// Drop a contribution-free outer wrapper. `None` when the shape does not
/// match exactly.
pub fn unwrap_wrapper(stmt: &Statement) -> Option<Statement> {
    let facade = QueryFacade::new(stmt);
    let outer_query = facade.query()?;
    let outer_select = facade.select()?;
    let (inner_query, alias) = facade.derived_from()?;

    if outer_query.with.is_some() || outer_query.order_by.is_some() {
        return None;
    }
    if outer_select.selection.is_some()
        || !facade.group_by().is_empty()
        || outer_select.having.is_some()
        || outer_select.distinct.is_some()
    {
        return None;
    }
    if !matches!(inner_query.body.as_ref(), SetExpr::Select(_)) {
        return None;
    }
    if !star_projection(&outer_select.projection, alias.map(|a| a.value.as_str())) {
        return None;
    }

    let mut unwrapped = inner_query.clone();

    // Outer LIMIT carries over; when both exist the smaller literal wins.
    match (&outer_query.limit_clause, &unwrapped.limit_clause) {
        (Some(outer_limit), None) => {
            unwrapped.limit_clause = Some(outer_limit.clone());
        }
        (Some(outer_limit), Some(inner_limit)) => {
            let outer_value = facade::limit_clause_value(outer_limit);
            let inner_value = facade::limit_clause_value(inner_limit);
            if let (Some(o), Some(i)) = (outer_value, inner_value) {
                if o < i {
                    unwrapped.limit_clause = Some(outer_limit.clone());
                }
            }
        }
        _ => {}
    }

    Some(Statement::Query(Box::new(unwrapped)))
}

fn star_projection(projection: &[SelectItem], alias: Option<&str>) -> bool {
    if projection.len() != 1 {
        return false;
    }
    match &projection[0] {
        SelectItem::Wildcard(_) => true,
        SelectItem::QualifiedWildcard(kind, _) => {
            let qualifier = kind.to_string();
            alias
                .map(|a| qualifier.eq_ignore_ascii_case(a))
                .unwrap_or(false)
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_sql_frontend::parser::parse_one;

    fn unwrap_sql(sql: &str) -> Option<String> {
        let stmt = parse_one(sql).unwrap();
        unwrap_wrapper(&stmt).map(|s| s.to_string())
    }

    #[test]
    fn test_star_wrapper_dropped() {
        let out = unwrap_sql(
            "SELECT * FROM (SELECT category, SUM(amount) FROM sales \
             WHERE cob_date = '2024-01-15') sub",
        )
        .unwrap();
        assert_eq!(
            out,
            "SELECT category, SUM(amount) FROM sales WHERE cob_date = '2024-01-15'"
        );
    }

    #[test]
    fn test_backtick_alias_wrapper() {
        let out = unwrap_sql(
            "SELECT * FROM (SELECT a FROM t WHERE date_index = -1) `Custom SQL Query`",
        )
        .unwrap();
        assert_eq!(out, "SELECT a FROM t WHERE date_index = -1");
    }

    #[test]
    fn test_outer_limit_carried() {
        let out =
            unwrap_sql("SELECT * FROM (SELECT a FROM t WHERE date_index = -1) sub LIMIT 100")
                .unwrap();
        assert_eq!(out, "SELECT a FROM t WHERE date_index = -1 LIMIT 100");
    }

    #[test]
    fn test_min_limit_wins() {
        let out = unwrap_sql(
            "SELECT * FROM (SELECT a FROM t WHERE date_index = -1 LIMIT 10) sub LIMIT 3",
        )
        .unwrap();
        assert!(out.ends_with("LIMIT 3"), "got: {out}");
    }

    #[test]
    fn test_outer_where_defers_to_flattener() {
        assert!(unwrap_sql("SELECT * FROM (SELECT a FROM t) sub WHERE a = 1").is_none());
    }

    #[test]
    fn test_outer_order_defers() {
        assert!(unwrap_sql("SELECT * FROM (SELECT a FROM t) sub ORDER BY a").is_none());
    }

    #[test]
    fn test_alias_projection_defers_to_flattener() {
        assert!(unwrap_sql("SELECT sub.a FROM (SELECT a FROM t) sub").is_none());
    }

    #[test]
    fn test_plain_select_not_matched() {
        assert!(unwrap_sql("SELECT a FROM t WHERE cob_date = '2024-01-15'").is_none());
    }

    #[test]
    fn test_qualified_star_matching_alias() {
        let out = unwrap_sql("SELECT sub.* FROM (SELECT a FROM t WHERE date_index = -1) sub")
            .unwrap();
        assert_eq!(out, "SELECT a FROM t WHERE date_index = -1");
    }
}
