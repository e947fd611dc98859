//! Rewrite coordination.
//!
//! Applies the rewrite passes in their documented order — paren unwrap,
//! wrapper unwrap, subquery flatten, GROUP BY completion — re-parsing
//! between passes, and records each applied rewrite for audit. Rewrites
//! never raise user-visible errors: a pass that cannot apply declines and
//! the statement continues unchanged.

use std::fmt;

use kestrel_common::config::TransformationsConfig;
use sqlparser::ast::Statement;

use kestrel_sql_frontend::parser::parse_one;

use crate::{flatten, group_by, paren, wrapper};

/// Which rewrite produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RewriteKind {
    ParenUnwrap,
    WrapperUnwrap,
    SubqueryFlatten,
    GroupByComplete,
}

impl fmt::Display for RewriteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RewriteKind::ParenUnwrap => "PAREN_UNWRAP",
            RewriteKind::WrapperUnwrap => "WRAPPER_UNWRAP",
            RewriteKind::SubqueryFlatten => "SUBQUERY_FLATTEN",
            RewriteKind::GroupByComplete => "GROUP_BY_COMPLETE",
        };
        f.write_str(name)
    }
}

/// Ordered audit record of one applied rewrite. The final `after` of the
/// last record is what the backend (or synthesizer) sees.
#[derive(Debug, Clone)]
pub struct RewriteRecord {
    pub sequence: usize,
    pub kind: RewriteKind,
    pub before: String,
    pub after: String,
}

/// Result of one transformer application.
pub struct RewriteOutcome {
    pub sql: String,
    pub ast: Option<Statement>,
    pub records: Vec<RewriteRecord>,
}

impl RewriteOutcome {
    pub fn was_rewritten(&self) -> bool {
        !self.records.is_empty()
    }
}

/// Applies all enabled rewrite passes once, in order.
pub struct Transformer {
    config: TransformationsConfig,
}

impl Transformer {
    pub fn new(config: TransformationsConfig) -> Self {
        Self { config }
    }

    /// Run the pass sequence over one statement. `start_sequence` numbers
    /// the first record produced (the orchestrator keeps a running count
    /// across its rewrite iterations).
    pub fn apply(
        &self,
        sql: &str,
        ast: Option<&Statement>,
        start_sequence: usize,
    ) -> RewriteOutcome {
        let mut current_sql = sql.to_string();
        let mut current_ast = ast.cloned();
        let mut records = Vec::new();
        let mut sequence = start_sequence;

        // Paren unwrap is textual; the parser keeps the outer parentheses
        // on round-trip, so this runs before any AST pass.
        if paren::needs_unwrapping(&current_sql) {
            if let Some(unwrapped) = paren::unwrap(&current_sql) {
                self.record(
                    &mut records,
                    &mut sequence,
                    RewriteKind::ParenUnwrap,
                    &current_sql,
                    &unwrapped,
                );
                current_ast = reparse(&unwrapped);
                current_sql = unwrapped;
            }
        }

        if self.config.unwrap_subqueries {
            if let Some(stmt) = current_ast.as_ref() {
                if let Some(unwrapped) = wrapper::unwrap_wrapper(stmt) {
                    let after = unwrapped.to_string();
                    self.record(
                        &mut records,
                        &mut sequence,
                        RewriteKind::WrapperUnwrap,
                        &current_sql,
                        &after,
                    );
                    current_sql = after;
                    current_ast = reparse(&current_sql).or(Some(unwrapped));
                }
            }

            if let Some(stmt) = current_ast.as_ref() {
                if let Some(flattened) = flatten::flatten(stmt, self.config.max_subquery_depth) {
                    let after = flattened.to_string();
                    self.record(
                        &mut records,
                        &mut sequence,
                        RewriteKind::SubqueryFlatten,
                        &current_sql,
                        &after,
                    );
                    current_sql = after;
                    current_ast = reparse(&current_sql).or(Some(flattened));
                }
            }
        }

        if self.config.auto_fix_group_by {
            if let Some(stmt) = current_ast.as_ref() {
                if let Some((fixed, added)) = group_by::complete_group_by(stmt) {
                    let after = fixed.to_string();
                    tracing::debug!(columns = ?added, "completed GROUP BY");
                    self.record(
                        &mut records,
                        &mut sequence,
                        RewriteKind::GroupByComplete,
                        &current_sql,
                        &after,
                    );
                    current_sql = after;
                    current_ast = reparse(&current_sql).or(Some(fixed));
                }
            }
        }

        RewriteOutcome {
            sql: current_sql,
            ast: current_ast,
            records,
        }
    }

    fn record(
        &self,
        records: &mut Vec<RewriteRecord>,
        sequence: &mut usize,
        kind: RewriteKind,
        before: &str,
        after: &str,
    ) {
        records.push(RewriteRecord {
            sequence: *sequence,
            kind,
            before: before.to_string(),
            after: after.to_string(),
        });
        *sequence += 1;
    }
}

fn reparse(sql: &str) -> Option<Statement> {
    parse_one(sql).ok()
}
