//! Write blocking.
//!
//! The proxy is read-only. Statement-kind classification catches parsed
//! writes; a word-bounded keyword scan over the raw text backs it up for
//! statements the parser could not make sense of. The keyword list is
//! configurable (`security.write_operations`).

use kestrel_common::config::SecurityConfig;
use kestrel_common::error::PolicyError;
use kestrel_sql_frontend::classifier::StatementKind;
use regex::Regex;

pub struct WriteBlocker {
    enabled: bool,
    keyword_pattern: Option<Regex>,
}

impl WriteBlocker {
    pub fn new(config: &SecurityConfig) -> Self {
        let keyword_pattern = if config.block_writes && !config.write_operations.is_empty() {
            let alternation = config
                .write_operations
                .iter()
                .map(|kw| regex::escape(kw))
                .collect::<Vec<_>>()
                .join("|");
            Regex::new(&format!(r"(?i)\b({alternation})\b")).ok()
        } else {
            None
        };
        Self {
            enabled: config.block_writes,
            keyword_pattern,
        }
    }

    /// Reject write statements. Runs on the final (post-rewrite) text.
    pub fn check(&self, sql: &str, kind: StatementKind) -> Result<(), PolicyError> {
        if !self.enabled {
            return Ok(());
        }

        if kind == StatementKind::WriteDml {
            let operation = sql
                .trim()
                .split_whitespace()
                .next()
                .unwrap_or("write")
                .to_ascii_uppercase();
            return Err(self.rejection(operation));
        }

        // Safety net: word-bounded keyword scan on the raw text. SELECT and
        // meta statements never carry these verbs at word boundaries.
        if !matches!(
            kind,
            StatementKind::DdlMeta | StatementKind::StaticSelect | StatementKind::InfoSchemaSelect
        ) {
            if let Some(pattern) = &self.keyword_pattern {
                if let Some(found) = pattern.find(sql) {
                    return Err(self.rejection(found.as_str().to_ascii_uppercase()));
                }
            }
        }

        Ok(())
    }

    fn rejection(&self, operation: String) -> PolicyError {
        let message = format!(
            "Write operations are not permitted\n\n\
             Your statement performs a write operation ({operation}); this proxy provides \
             read-only access to the backend.\n\n\
             Blocked operations: INSERT, UPDATE, DELETE, REPLACE, TRUNCATE, DROP, CREATE, \
             ALTER, GRANT, REVOKE, RENAME"
        );
        PolicyError::WriteBlocked { operation, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocker() -> WriteBlocker {
        WriteBlocker::new(&SecurityConfig::default())
    }

    #[test]
    fn test_insert_rejected_by_kind() {
        let err = blocker()
            .check("INSERT INTO t VALUES (1)", StatementKind::WriteDml)
            .unwrap_err();
        match err {
            PolicyError::WriteBlocked { operation, .. } => assert_eq!(operation, "INSERT"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_keyword_safety_net_on_unparsed_text() {
        // Parser failed → kind Other; the raw-text scan still fires.
        let err = blocker()
            .check("delete from t where", StatementKind::Other)
            .unwrap_err();
        match err {
            PolicyError::WriteBlocked { operation, .. } => assert_eq!(operation, "DELETE"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_plain_select_passes() {
        assert!(blocker()
            .check(
                "SELECT a FROM t WHERE cob_date = '2024-01-15'",
                StatementKind::DataSelect
            )
            .is_ok());
    }

    #[test]
    fn test_word_boundary_spares_similar_column_names() {
        assert!(blocker()
            .check(
                "SELECT created_at, update_count FROM t WHERE cob_date = '2024-01-15'",
                StatementKind::DataSelect
            )
            .is_ok());
    }

    #[test]
    fn test_meta_statements_exempt_from_scan() {
        // SHOW CREATE TABLE carries a write verb but is metadata.
        assert!(blocker()
            .check("SHOW CREATE TABLE t", StatementKind::DdlMeta)
            .is_ok());
    }

    #[test]
    fn test_disabled_blocker_admits_writes() {
        let config = SecurityConfig {
            block_writes: false,
            ..Default::default()
        };
        let blocker = WriteBlocker::new(&config);
        assert!(blocker
            .check("INSERT INTO t VALUES (1)", StatementKind::WriteDml)
            .is_ok());
    }
}
