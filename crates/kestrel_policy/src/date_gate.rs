//! Mandatory date-partition predicate.
//!
//! Every data SELECT must pin a date partition: the WHERE clause of the
//! outermost SELECT has to mention one of the configured date columns
//! (`cob_date` or `date_index` by default). A mention inside a subquery of
//! the final statement does not satisfy the gate — the outer scan would
//! still be unbounded.

use kestrel_common::config::BusinessRulesConfig;
use kestrel_common::error::PolicyError;
use kestrel_sql_frontend::facade::QueryFacade;
use sqlparser::ast::Statement;

pub struct DatePredicateGate {
    rules: BusinessRulesConfig,
}

impl DatePredicateGate {
    pub fn new(rules: BusinessRulesConfig) -> Self {
        Self { rules }
    }

    /// Check a data SELECT. Metadata, static and info-schema statements
    /// never reach this gate.
    pub fn check(&self, stmt: &Statement) -> Result<(), PolicyError> {
        if !self.rules.require_cob_date {
            return Ok(());
        }

        let facade = QueryFacade::new(stmt);
        if facade.select().is_none() {
            return Ok(());
        }

        let satisfied = self
            .rules
            .date_columns
            .iter()
            .any(|column| facade.where_mentions(column));
        if satisfied {
            return Ok(());
        }

        let columns = self.rules.date_columns.join(" or ");
        let first = self
            .rules
            .date_columns
            .first()
            .cloned()
            .unwrap_or_else(|| "cob_date".to_string());
        Err(PolicyError::MissingDatePredicate {
            message: format!(
                "A date filter is mandatory\n\n\
                 Every query must filter on {columns} in its WHERE clause so it operates \
                 on one date partition.\n\n\
                 Examples:\n\
                 \x20 SELECT col1, col2 FROM table_name WHERE {first} = '2024-01-15'\n\
                 \x20 SELECT col1, col2 FROM table_name WHERE date_index = -1"
            ),
        })
    }
}
