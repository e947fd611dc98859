//! Local-handling middleware.
//!
//! An explicit, ordered list of handlers checked before anything is
//! dispatched: session-variable SET, general SET, static SELECT, USE. The
//! first handler that claims a statement answers it from session state;
//! everything else falls through to the pipeline's classifier.

use kestrel_common::config::BusinessRulesConfig;
use kestrel_common::error::ProxyError;
use kestrel_sql_frontend::classifier::{self, StatementKind};
use sqlparser::ast::Statement;

use crate::session::ProxySession;
use crate::synth::{self, LocalReply};

pub struct Middleware {
    rules: BusinessRulesConfig,
}

impl Middleware {
    pub fn new(rules: BusinessRulesConfig) -> Self {
        Self { rules }
    }

    /// Run the handler chain. `Ok(None)` means no handler claimed the
    /// statement and the pipeline proceeds.
    pub fn handle_locally(
        &self,
        session: &mut ProxySession,
        sql: &str,
        ast: Option<&Statement>,
    ) -> Result<Option<LocalReply>, ProxyError> {
        // 1. session-variable SET (NAMES / CHARACTER SET / TRANSACTION /
        //    system variables)
        // 2. general SET (user variables, remaining SET forms)
        if let Some(reply) = self.handle_set(session, sql, ast)? {
            return Ok(Some(reply));
        }

        // 3. static SELECT
        if let Some(stmt) = ast {
            if classifier::classify(sql, Some(stmt)) == StatementKind::StaticSelect {
                return synth::eval_static(session, stmt).map(Some);
            }
        }

        // 4. USE <database>
        if let Some(Statement::Use(use_stmt)) = ast {
            let rules = &self.rules;
            return synth::apply_use(session, use_stmt, |db| rules.database_allowed(db))
                .map(Some);
        }

        Ok(None)
    }

    fn handle_set(
        &self,
        session: &mut ProxySession,
        sql: &str,
        ast: Option<&Statement>,
    ) -> Result<Option<LocalReply>, ProxyError> {
        // `SET CHARACTER SET <cs>` is matched token-wise first; parsers
        // disagree on how (or whether) to model it.
        if let Some(charset) = parse_set_character_set(sql) {
            session.set_character_set(&charset);
            return Ok(Some(LocalReply::Ok));
        }

        if let Some(Statement::Set(set)) = ast {
            return synth::apply_set(session, set).map(Some);
        }

        // Remaining SET forms the parser did not model still must not
        // reach the backend.
        if classifier::first_keyword(sql).as_deref() == Some("SET") {
            tracing::warn!("accepting unparsed SET statement locally: {}", sql.trim());
            return Ok(Some(LocalReply::Ok));
        }

        Ok(None)
    }
}

/// `SET CHARACTER SET <cs>` / `SET CHARSET <cs>`, matched token-wise.
fn parse_set_character_set(sql: &str) -> Option<String> {
    let tokens: Vec<&str> = sql.trim().trim_end_matches(';').split_whitespace().collect();
    match tokens.as_slice() {
        [set, character, set_kw, charset]
            if set.eq_ignore_ascii_case("set")
                && character.eq_ignore_ascii_case("character")
                && set_kw.eq_ignore_ascii_case("set") =>
        {
            Some(charset.trim_matches('\'').trim_matches('`').to_string())
        }
        [set, charset_kw, charset]
            if set.eq_ignore_ascii_case("set") && charset_kw.eq_ignore_ascii_case("charset") =>
        {
            Some(charset.trim_matches('\'').trim_matches('`').to_string())
        }
        _ => None,
    }
}
