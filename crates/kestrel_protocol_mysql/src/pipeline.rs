//! The per-statement processing pipeline.
//!
//! received → classified → rewritten → gated → dispatched → adapted →
//! replied, with synthesize/empty/reject branches after gating. Every
//! stage logs a structured record keyed by the statement id; rewrites loop
//! to a fixed point under a hard iteration bound.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use kestrel_backend::BackendGateway;
use kestrel_common::config::ProxyConfig;
use kestrel_common::error::{ProxyError, SqlError};
use kestrel_common::row::{ColumnDef, ScalarValue};
use kestrel_policy::{DatePredicateGate, UnsupportedDetector, WriteBlocker};
use kestrel_rewrite::{RewriteRecord, Transformer};
use kestrel_sql_frontend::classifier::{classify, StatementKind};
use kestrel_sql_frontend::info_schema::{self, InfoSchemaRewrite};
use kestrel_sql_frontend::parser::parse_one;
use sqlparser::ast::Statement;

use crate::adapter;
use crate::middleware::Middleware;
use crate::session::ProxySession;
use crate::synth::{self, LocalReply};

/// Oscillating rewrites are cut off here.
pub const MAX_REWRITE_ITERATIONS: usize = 4;

/// A statement's decided fate.
pub enum Fate {
    /// Answer locally from session state.
    Synthesize(LocalReply),
    /// Send the original text to the backend.
    PassThrough(String),
    /// Send rewritten text to the backend.
    RewriteAndPass(String),
    /// Answer with zero columns, zero rows.
    EmptyOk,
    /// Refuse with a user-facing error.
    Reject(ProxyError),
}

/// What one statement produced. On success every row's width equals the
/// column count; on failure columns and rows are empty and `error` carries
/// the user-facing message.
pub struct PipelineResult {
    pub success: bool,
    pub columns: Vec<ColumnDef>,
    pub rows: Vec<Vec<ScalarValue>>,
    pub rewrites: Vec<RewriteRecord>,
    pub elapsed: Duration,
    pub error: Option<ProxyError>,
}

impl PipelineResult {
    fn ok(
        columns: Vec<ColumnDef>,
        rows: Vec<Vec<ScalarValue>>,
        rewrites: Vec<RewriteRecord>,
        elapsed: Duration,
    ) -> Self {
        Self {
            success: true,
            columns,
            rows,
            rewrites,
            elapsed,
            error: None,
        }
    }

    fn fail(error: ProxyError, rewrites: Vec<RewriteRecord>, elapsed: Duration) -> Self {
        Self {
            success: false,
            columns: Vec::new(),
            rows: Vec::new(),
            rewrites,
            elapsed,
            error: Some(error),
        }
    }
}

/// Everything `decide` produces for `execute` to act on.
struct Decision {
    fate: Fate,
    rewrites: Vec<RewriteRecord>,
    /// For INFORMATION_SCHEMA translations: the original statement and
    /// relation, used to reshape the SHOW reply into the asked projection.
    reshape: Option<(Statement, String)>,
}

impl Decision {
    fn plain(fate: Fate, rewrites: Vec<RewriteRecord>) -> Self {
        Self {
            fate,
            rewrites,
            reshape: None,
        }
    }
}

/// Per-statement orchestrator, shared by every connection.
pub struct QueryPipeline {
    gateway: Arc<BackendGateway>,
    transformer: Transformer,
    write_blocker: WriteBlocker,
    unsupported: UnsupportedDetector,
    date_gate: DatePredicateGate,
    middleware: Middleware,
    next_statement_id: AtomicU64,
}

impl QueryPipeline {
    pub fn new(config: &ProxyConfig, gateway: Arc<BackendGateway>) -> Self {
        Self {
            gateway,
            transformer: Transformer::new(config.transformations.clone()),
            write_blocker: WriteBlocker::new(&config.security),
            unsupported: UnsupportedDetector::new(config.capabilities.clone()),
            date_gate: DatePredicateGate::new(config.business_rules.clone()),
            middleware: Middleware::new(config.business_rules.clone()),
            next_statement_id: AtomicU64::new(1),
        }
    }

    /// Process one statement for one session.
    pub async fn process(&self, session: &mut ProxySession, sql: &str) -> PipelineResult {
        let statement_id = self.next_statement_id.fetch_add(1, Ordering::Relaxed);
        let started = Instant::now();
        tracing::info!(
            statement_id,
            connection_id = session.connection_id,
            "received: {}",
            sql.trim()
        );

        let decision = self.decide(statement_id, session, sql);
        let result = self.execute(statement_id, decision, started).await;

        let fate_label = match (result.success, &result.error) {
            (true, _) if result.rewrites.is_empty() => "ok",
            (true, _) => "ok_rewritten",
            (false, Some(e)) if matches!(e, ProxyError::Policy(_) | ProxyError::Sql(_)) => {
                "rejected"
            }
            (false, _) => "backend_error",
        };
        kestrel_observability::record_statement(fate_label, result.elapsed.as_micros() as u64);
        result
    }

    /// The decision tree: middleware, classification, rewrites, gates.
    fn decide(&self, statement_id: u64, session: &mut ProxySession, sql: &str) -> Decision {
        let ast = parse_one(sql).ok();

        // Local middleware chain: SET variants, static SELECT, USE.
        match self.middleware.handle_locally(session, sql, ast.as_ref()) {
            Ok(Some(reply)) => {
                tracing::debug!(statement_id, "handled locally by middleware");
                return Decision::plain(Fate::Synthesize(reply), Vec::new());
            }
            Ok(None) => {}
            Err(error) => {
                tracing::info!(statement_id, "rejected by middleware: {}", error);
                return Decision::plain(Fate::Reject(error), Vec::new());
            }
        }

        let mut current_sql = sql.to_string();
        let mut current_ast = ast;
        let kind = classify(&current_sql, current_ast.as_ref());
        tracing::debug!(statement_id, kind = ?kind, "classified");

        // Remaining metadata statements (SHOW/DESCRIBE/KILL/transaction
        // control) pass through untouched and bypass every gate.
        if kind == StatementKind::DdlMeta {
            return Decision::plain(Fate::PassThrough(current_sql), Vec::new());
        }

        // Rewrite to a fixed point, bounded.
        let mut rewrites: Vec<RewriteRecord> = Vec::new();
        for _ in 0..MAX_REWRITE_ITERATIONS {
            let outcome =
                self.transformer
                    .apply(&current_sql, current_ast.as_ref(), rewrites.len() + 1);
            if outcome.records.is_empty() {
                break;
            }
            for record in &outcome.records {
                tracing::info!(
                    statement_id,
                    rewrite = %record.kind,
                    before = %record.before,
                    after = %record.after,
                    "rewrite applied"
                );
                kestrel_observability::record_rewrite(&record.kind.to_string());
            }
            rewrites.extend(outcome.records);
            current_sql = outcome.sql;
            current_ast = outcome.ast;
        }
        let kind = classify(&current_sql, current_ast.as_ref());
        tracing::debug!(statement_id, kind = ?kind, "classified after rewrites");

        // A rewrite can surface a statement the synthesizer owns.
        if kind == StatementKind::StaticSelect {
            if let Some(stmt) = current_ast.as_ref() {
                return match synth::eval_static(session, stmt) {
                    Ok(reply) => Decision {
                        fate: Fate::Synthesize(reply),
                        rewrites,
                        reshape: None,
                    },
                    Err(error) => Decision::plain(Fate::Reject(error), rewrites),
                };
            }
        }

        if kind == StatementKind::InfoSchemaSelect {
            return self.decide_info_schema(statement_id, current_ast, rewrites);
        }

        // Policy gates run on the final text and AST.
        if let Err(error) = self.write_blocker.check(&current_sql, kind) {
            tracing::info!(statement_id, "rejected: write blocked");
            kestrel_observability::record_rejection("write_blocked");
            return Decision::plain(Fate::Reject(error.into()), rewrites);
        }

        let Some(stmt) = current_ast else {
            tracing::info!(statement_id, "rejected: parse failure");
            kestrel_observability::record_rejection("parse_error");
            let message = format!(
                "Failed to parse SQL statement\n\n{}\n\nCheck the statement's syntax and retry.",
                current_sql.trim()
            );
            return Decision::plain(
                Fate::Reject(ProxyError::Sql(SqlError::Parse(message))),
                rewrites,
            );
        };

        if let Err(error) = self.unsupported.check(&stmt) {
            tracing::info!(statement_id, "rejected: unsupported feature");
            kestrel_observability::record_rejection("unsupported_feature");
            return Decision::plain(Fate::Reject(error.into()), rewrites);
        }

        if matches!(
            kind,
            StatementKind::DataSelect | StatementKind::WrappedSelect | StatementKind::ParenSelect
        ) {
            if let Err(error) = self.date_gate.check(&stmt) {
                tracing::info!(statement_id, "rejected: missing date predicate");
                kestrel_observability::record_rejection("missing_date_predicate");
                return Decision::plain(Fate::Reject(error.into()), rewrites);
            }
        }

        let fate = if rewrites.is_empty() {
            Fate::PassThrough(current_sql)
        } else {
            Fate::RewriteAndPass(current_sql)
        };
        Decision::plain(fate, rewrites)
    }

    fn decide_info_schema(
        &self,
        statement_id: u64,
        current_ast: Option<Statement>,
        rewrites: Vec<RewriteRecord>,
    ) -> Decision {
        let Some(stmt) = current_ast else {
            return Decision::plain(Fate::EmptyOk, rewrites);
        };
        match info_schema::rewrite_info_schema(&stmt) {
            InfoSchemaRewrite::Show(show_sql) => {
                tracing::info!(
                    statement_id,
                    "translated INFORMATION_SCHEMA query to: {}",
                    show_sql
                );
                let relation = info_schema::relation_of(&stmt).unwrap_or_default();
                Decision {
                    fate: Fate::RewriteAndPass(show_sql),
                    rewrites,
                    reshape: Some((stmt, relation)),
                }
            }
            InfoSchemaRewrite::Empty => {
                tracing::info!(
                    statement_id,
                    "INFORMATION_SCHEMA query has no translation; returning empty result"
                );
                Decision::plain(Fate::EmptyOk, rewrites)
            }
        }
    }

    async fn execute(
        &self,
        statement_id: u64,
        decision: Decision,
        started: Instant,
    ) -> PipelineResult {
        let Decision {
            fate,
            rewrites,
            reshape,
        } = decision;

        match fate {
            Fate::Synthesize(LocalReply::Ok) => {
                PipelineResult::ok(Vec::new(), Vec::new(), rewrites, started.elapsed())
            }
            Fate::Synthesize(LocalReply::Rows { columns, rows }) => {
                let (columns, rows) = adapter::adapt(statement_id, columns, rows);
                PipelineResult::ok(columns, rows, rewrites, started.elapsed())
            }
            Fate::EmptyOk => {
                PipelineResult::ok(Vec::new(), Vec::new(), rewrites, started.elapsed())
            }
            Fate::Reject(error) => PipelineResult::fail(error, rewrites, started.elapsed()),
            Fate::PassThrough(sql) | Fate::RewriteAndPass(sql) => {
                let dispatched = self.gateway.execute(statement_id, &sql).await;
                let pool_stats = self.gateway.pool().stats();
                kestrel_observability::record_pool_stats(
                    pool_stats.total_checkouts,
                    pool_stats.total_timeouts,
                    pool_stats.idle,
                );
                match dispatched {
                    Ok(output) => {
                        let (columns, rows) = match &reshape {
                            Some((stmt, relation)) => {
                                synth::project_show_output(stmt, relation, output)
                            }
                            None => (output.columns, output.rows),
                        };
                        let (columns, rows) = adapter::adapt(statement_id, columns, rows);
                        tracing::info!(
                            statement_id,
                            rows = rows.len(),
                            elapsed_ms = started.elapsed().as_millis() as u64,
                            "replied"
                        );
                        PipelineResult::ok(columns, rows, rewrites, started.elapsed())
                    }
                    Err(error) => {
                        tracing::warn!(statement_id, "backend failure: {}", error);
                        PipelineResult::fail(error.into(), rewrites, started.elapsed())
                    }
                }
            }
        }
    }
}
