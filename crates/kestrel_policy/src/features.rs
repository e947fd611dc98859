//! Unsupported-feature rejection.
//!
//! The backend's dialect has no JOINs, set operations, window functions or
//! COUNT. Statements using a configured-unsupported feature are rejected
//! before dispatch with a message naming the feature and suggesting an
//! alternative where one exists.

use kestrel_common::config::CapabilitiesConfig;
use kestrel_common::error::PolicyError;
use kestrel_sql_frontend::facade::{walk_query_exprs, QueryFacade};
use sqlparser::ast::{Expr, Statement};

pub struct UnsupportedDetector {
    capabilities: CapabilitiesConfig,
}

impl UnsupportedDetector {
    pub fn new(capabilities: CapabilitiesConfig) -> Self {
        Self { capabilities }
    }

    /// Check the final (post-rewrite) AST for unsupported features.
    pub fn check(&self, stmt: &Statement) -> Result<(), PolicyError> {
        let facade = QueryFacade::new(stmt);

        if self.capabilities.feature_unsupported("joins") && facade.has_join() {
            return Err(rejection(
                "joins",
                "JOINs are not supported\n\n\
                 Your query joins tables, which the backend cannot execute.\n\n\
                 Suggestions:\n\
                 \x20 - query a denormalized view that combines the required data\n\
                 \x20 - use Tableau data blending instead of SQL joins",
            ));
        }

        if self.capabilities.feature_unsupported("unions") && facade.has_union() {
            return Err(rejection(
                "unions",
                "UNIONs are not supported\n\n\
                 Your query combines result sets with UNION, which the backend cannot \
                 execute.\n\n\
                 Suggestions:\n\
                 \x20 - split into separate queries and combine the results client-side\n\
                 \x20 - create a unified view in the database",
            ));
        }

        if self.capabilities.feature_unsupported("window_functions")
            && facade.has_window_functions()
        {
            return Err(rejection(
                "window_functions",
                "Window functions are not supported\n\n\
                 Your query uses an OVER clause, which the backend cannot execute.\n\n\
                 Suggestions:\n\
                 \x20 - use Tableau table calculations for ranking and windowing\n\
                 \x20 - pre-compute these values in a database view",
            ));
        }

        if self.capabilities.feature_unsupported("case_statements") && has_case(stmt) {
            return Err(rejection(
                "case_statements",
                "CASE expressions are not supported\n\n\
                 Your query uses CASE, which the backend cannot execute.\n\n\
                 Suggestion: move the conditional logic into the client or a view",
            ));
        }

        self.check_functions(&facade)
    }

    fn check_functions(&self, facade: &QueryFacade<'_>) -> Result<(), PolicyError> {
        let mut found: Vec<String> = facade
            .functions_used()
            .into_iter()
            .filter(|name| self.capabilities.function_unsupported(name))
            .collect();
        found.sort();
        found.dedup();

        if found.is_empty() {
            return Ok(());
        }

        if found.iter().any(|name| name == "COUNT") {
            return Err(rejection(
                "count_function",
                "COUNT() is not supported\n\n\
                 Your query uses the COUNT() aggregate, which the backend cannot \
                 execute.\n\n\
                 Alternative: use SUM(1) instead of COUNT(*)\n\
                 \x20 Example: SELECT category, SUM(1) AS record_count\n\
                 \x20          FROM sales\n\
                 \x20          WHERE cob_date = '2024-01-15'\n\
                 \x20          GROUP BY category\n\n\
                 Alternative: use SUM(CASE WHEN col IS NOT NULL THEN 1 ELSE 0 END) \
                 instead of COUNT(col)",
            ));
        }

        let list = found.join(", ");
        Err(rejection(
            "unsupported_function",
            &format!(
                "Unsupported function(s): {list}\n\n\
                 Your query uses function(s) the backend cannot execute.\n\n\
                 Suggestion: perform the calculation client-side, or use a supported \
                 alternative"
            ),
        ))
    }
}

fn has_case(stmt: &Statement) -> bool {
    let facade = QueryFacade::new(stmt);
    let mut found = false;
    if let Some(query) = facade.query() {
        walk_query_exprs(query, &mut |expr| {
            if matches!(expr, Expr::Case { .. }) {
                found = true;
            }
            true
        });
    }
    found
}

fn rejection(feature: &str, message: &str) -> PolicyError {
    PolicyError::UnsupportedFeature {
        feature: feature.to_string(),
        message: message.to_string(),
    }
}
