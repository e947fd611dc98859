mod common;

use common::{setup, setup_with_config};
use kestrel_common::config::ProxyConfig;
use kestrel_common::error::{PolicyError, ProxyError};
use kestrel_common::row::ScalarValue;
use kestrel_rewrite::RewriteKind;

// ── Literal end-to-end scenarios ─────────────────────────────────────────

#[tokio::test]
async fn test_tableau_wrapper_with_aggregate_projection() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "SELECT * FROM (SELECT category, SUM(amount) FROM sales \
             WHERE cob_date='2024-01-15') sub",
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(
        backend.dispatched(),
        vec![
            "SELECT category, SUM(amount) FROM sales WHERE cob_date = '2024-01-15' \
             GROUP BY category"
                .to_string()
        ]
    );
    let kinds: Vec<RewriteKind> = result.rewrites.iter().map(|r| r.kind).collect();
    assert_eq!(
        kinds,
        vec![RewriteKind::WrapperUnwrap, RewriteKind::GroupByComplete]
    );
}

#[tokio::test]
async fn test_paren_select_with_limit_zero() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "(SELECT col1, col2 FROM my_table WHERE date_index = -1) LIMIT 0",
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(
        backend.dispatched(),
        vec!["SELECT col1, col2 FROM my_table WHERE date_index = -1 LIMIT 0".to_string()]
    );
}

#[tokio::test]
async fn test_schemata_probe_translated_and_reshaped() {
    let (pipeline, mut session, backend) = setup();
    backend.respond(
        "SHOW DATABASES",
        &["Database"],
        vec![
            vec![ScalarValue::Text("analytics".into())],
            vec![ScalarValue::Text("reporting".into())],
        ],
    );

    let result = pipeline
        .process(
            &mut session,
            "SELECT NULL, NULL, NULL, SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA \
             WHERE SCHEMA_NAME LIKE '%' ORDER BY SCHEMA_NAME",
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(backend.dispatched(), vec!["SHOW DATABASES".to_string()]);

    let names: Vec<&str> = result.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["expr_1", "expr_2", "expr_3", "SCHEMA_NAME"]);
    assert_eq!(result.rows.len(), 2);
    for row in &result.rows {
        assert_eq!(row.len(), 4);
    }
    assert_eq!(result.rows[0][3], ScalarValue::Text("analytics".into()));
}

#[tokio::test]
async fn test_unconvertible_information_schema_probe_is_empty() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "SELECT table_name, column_name FROM information_schema.columns \
             WHERE data_type='enum' AND table_schema=''",
        )
        .await;

    assert!(result.success, "error: {:?}", result.error);
    assert!(result.columns.is_empty());
    assert!(result.rows.is_empty());
    assert!(backend.dispatched().is_empty(), "no backend call expected");
}

#[tokio::test]
async fn test_connection_id_synthesized_locally() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline.process(&mut session, "SELECT CONNECTION_ID()").await;

    assert!(result.success);
    assert_eq!(result.columns.len(), 1);
    assert_eq!(result.rows, vec![vec![ScalarValue::UInt(42)]]);
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_insert_rejected_before_backend() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(&mut session, "INSERT INTO t VALUES (1)")
        .await;

    assert!(!result.success);
    assert!(result.columns.is_empty() && result.rows.is_empty());
    assert!(matches!(
        result.error,
        Some(ProxyError::Policy(PolicyError::WriteBlocked { .. }))
    ));
    assert!(backend.dispatched().is_empty());
}

// ── Invariants ───────────────────────────────────────────────────────────

#[tokio::test]
async fn test_no_write_verb_ever_reaches_backend() {
    let (pipeline, mut session, backend) = setup();
    for sql in [
        "INSERT INTO t VALUES (1)",
        "UPDATE t SET a = 1 WHERE cob_date = '2024-01-15'",
        "DELETE FROM t WHERE cob_date = '2024-01-15'",
        "DROP TABLE t",
        "TRUNCATE TABLE t",
        "CREATE TABLE t (a INT)",
    ] {
        let result = pipeline.process(&mut session, sql).await;
        assert!(!result.success, "expected rejection for: {sql}");
    }
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_metadata_statements_bypass_gates() {
    // None of these carry a date predicate; all must succeed.
    let (pipeline, mut session, backend) = setup();
    for sql in ["SHOW TABLES", "SHOW DATABASES", "DESCRIBE sales", "BEGIN", "COMMIT"] {
        let result = pipeline.process(&mut session, sql).await;
        assert!(result.success, "expected success for: {sql}");
    }
    // All of them pass through to the backend untouched.
    assert_eq!(backend.dispatched().len(), 5);
}

#[tokio::test]
async fn test_static_and_session_statements_bypass_gates() {
    let (pipeline, mut session, backend) = setup();
    for sql in [
        "SELECT 1",
        "SELECT @@version_comment LIMIT 1",
        "SET NAMES utf8mb4",
        "SET autocommit = 1",
        "USE analytics",
    ] {
        let result = pipeline.process(&mut session, sql).await;
        assert!(result.success, "expected success for: {sql}");
    }
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_missing_date_predicate_rejected() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(&mut session, "SELECT a FROM t WHERE x = 1")
        .await;
    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(ProxyError::Policy(PolicyError::MissingDatePredicate { .. }))
    ));
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_join_rejected() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "SELECT a FROM t JOIN u ON t.id = u.id WHERE cob_date = '2024-01-15'",
        )
        .await;
    assert!(!result.success);
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_count_rejected_with_alternative() {
    let (pipeline, mut session, _backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "SELECT COUNT(*) FROM sales WHERE cob_date = '2024-01-15'",
        )
        .await;
    assert!(!result.success);
    let message = result.error.unwrap().to_string();
    assert!(message.contains("SUM(1)"), "message was: {message}");
}

#[tokio::test]
async fn test_rewrite_preserves_date_gate_compliance() {
    // A statement that passes the gate still passes after rewriting.
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "SELECT sub.col1 FROM (SELECT col1 FROM t WHERE cob_date = '2024-01-15') sub \
             WHERE sub.col1 > 0",
        )
        .await;
    assert!(result.success, "error: {:?}", result.error);
    let dispatched = backend.dispatched();
    assert_eq!(dispatched.len(), 1);
    assert!(dispatched[0].contains("cob_date = '2024-01-15'"));
    assert!(dispatched[0].contains("col1 > 0"));
}

#[tokio::test]
async fn test_flattener_decline_still_gated() {
    // Date predicate lives only inside the subquery and the flattener
    // declines (unresolvable outer name): the gate must fire.
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(
            &mut session,
            "SELECT sub.other FROM (SELECT col1 FROM t WHERE cob_date = '2024-01-15') sub",
        )
        .await;
    assert!(!result.success);
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_backend_query_error_relayed() {
    let (pipeline, mut session, backend) = setup();
    backend.fail_with("SELECT a FROM missing_table WHERE cob_date = '2024-01-15'", 1146);
    let result = pipeline
        .process(
            &mut session,
            "SELECT a FROM missing_table WHERE cob_date = '2024-01-15'",
        )
        .await;
    assert!(!result.success);
    let error = result.error.unwrap();
    assert_eq!(error.mysql_errno(), 1146);
}

#[tokio::test]
async fn test_arity_invariant_on_success() {
    let (pipeline, mut session, backend) = setup();
    backend.respond(
        "SELECT a, b FROM t WHERE cob_date = '2024-01-15'",
        &["a", "b"],
        vec![vec![ScalarValue::Int(1), ScalarValue::Int(2)]],
    );
    let result = pipeline
        .process(&mut session, "SELECT a, b FROM t WHERE cob_date = '2024-01-15'")
        .await;
    assert!(result.success);
    for row in &result.rows {
        assert_eq!(row.len(), result.columns.len());
    }
}

#[tokio::test]
async fn test_failure_results_carry_no_rows() {
    let (pipeline, mut session, _backend) = setup();
    let result = pipeline.process(&mut session, "SELECT a FROM t").await;
    assert!(!result.success);
    assert!(result.columns.is_empty());
    assert!(result.rows.is_empty());
    assert!(result.error.is_some());
}

#[tokio::test]
async fn test_set_then_read_back_shadow_variable() {
    let (pipeline, mut session, backend) = setup();
    let set_result = pipeline.process(&mut session, "SET NAMES latin1").await;
    assert!(set_result.success);

    let read_result = pipeline
        .process(&mut session, "SELECT @@character_set_client")
        .await;
    assert!(read_result.success);
    assert_eq!(
        read_result.rows,
        vec![vec![ScalarValue::Text("latin1".into())]]
    );
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_use_statement_tracked_per_session() {
    let (pipeline, mut session, _backend) = setup();
    pipeline.process(&mut session, "USE analytics").await;
    let result = pipeline.process(&mut session, "SELECT DATABASE()").await;
    assert_eq!(
        result.rows,
        vec![vec![ScalarValue::Text("analytics".into())]]
    );
}

#[tokio::test]
async fn test_use_of_blocked_database_rejected() {
    let (pipeline, mut session, _backend) = setup();
    let result = pipeline.process(&mut session, "USE mysql").await;
    assert!(!result.success);
    assert!(matches!(
        result.error,
        Some(ProxyError::Policy(PolicyError::DatabaseBlocked { .. }))
    ));
}

#[tokio::test]
async fn test_parse_failure_rejected_with_echo() {
    let (pipeline, mut session, backend) = setup();
    let result = pipeline
        .process(&mut session, "SELECT FROM WHERE nonsense !!")
        .await;
    assert!(!result.success);
    let message = result.error.unwrap().to_string();
    assert!(message.contains("SELECT FROM WHERE nonsense"), "got: {message}");
    assert!(backend.dispatched().is_empty());
}

#[tokio::test]
async fn test_columns_probe_translated_to_show_columns() {
    let (pipeline, mut session, backend) = setup();
    backend.respond(
        "SHOW COLUMNS FROM users",
        &["Field", "Type", "Null", "Key", "Default", "Extra"],
        vec![vec![
            ScalarValue::Text("id".into()),
            ScalarValue::Text("bigint".into()),
            ScalarValue::Text("NO".into()),
            ScalarValue::Text("PRI".into()),
            ScalarValue::Null,
            ScalarValue::Text("".into()),
        ]],
    );
    let result = pipeline
        .process(
            &mut session,
            "SELECT COLUMN_NAME, DATA_TYPE FROM INFORMATION_SCHEMA.COLUMNS \
             WHERE TABLE_NAME = 'users'",
        )
        .await;
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(backend.dispatched(), vec!["SHOW COLUMNS FROM users".to_string()]);
    assert_eq!(result.columns[0].name, "COLUMN_NAME");
    assert_eq!(result.rows[0][0], ScalarValue::Text("id".into()));
    assert_eq!(result.rows[0][1], ScalarValue::Text("bigint".into()));
}

#[tokio::test]
async fn test_date_gate_disabled_by_config() {
    let config = ProxyConfig::from_yaml(
        r#"
backend:
  connection_string: "mysql://kestrel@backend:3306/analytics"
  pool_pre_ping: false
business_rules:
  require_cob_date: false
"#,
    )
    .unwrap();
    let (pipeline, mut session, backend) = setup_with_config(config);
    let result = pipeline.process(&mut session, "SELECT a FROM t").await;
    assert!(result.success, "error: {:?}", result.error);
    assert_eq!(backend.dispatched().len(), 1);
}
