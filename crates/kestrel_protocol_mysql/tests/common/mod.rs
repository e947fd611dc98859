#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use kestrel_backend::{
    BackendConnection, BackendGateway, BackendPool, Connector, PoolSettings, QueryOutput,
    HEALTH_PROBE_SQL,
};
use kestrel_common::config::ProxyConfig;
use kestrel_common::error::BackendError;
use kestrel_common::row::{ColumnDef, ScalarValue};
use kestrel_protocol_mysql::{ProxySession, QueryPipeline};

/// Backend double that records every dispatched statement and replies from
/// a canned table.
#[derive(Clone)]
pub struct RecordingBackend {
    pub executed: Arc<Mutex<Vec<String>>>,
    canned: Arc<Mutex<Vec<(String, Result<QueryOutput, u16>)>>>,
}

impl RecordingBackend {
    pub fn new() -> Self {
        Self {
            executed: Arc::new(Mutex::new(Vec::new())),
            canned: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Reply to an exact statement with the given output.
    pub fn respond(&self, sql: &str, columns: &[&str], rows: Vec<Vec<ScalarValue>>) {
        let output = QueryOutput {
            columns: columns.iter().map(|name| ColumnDef::text(*name)).collect(),
            rows,
        };
        self.canned.lock().push((sql.to_string(), Ok(output)));
    }

    /// Reply to an exact statement with a backend query error.
    pub fn fail_with(&self, sql: &str, code: u16) {
        self.canned.lock().push((sql.to_string(), Err(code)));
    }

    /// Statements the backend actually saw (health probes excluded).
    pub fn dispatched(&self) -> Vec<String> {
        self.executed
            .lock()
            .iter()
            .filter(|sql| sql.as_str() != HEALTH_PROBE_SQL)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Connector for RecordingBackend {
    async fn connect(&self) -> Result<Box<dyn BackendConnection>, BackendError> {
        Ok(Box::new(RecordingConnection {
            backend: self.clone(),
        }))
    }
}

struct RecordingConnection {
    backend: RecordingBackend,
}

#[async_trait]
impl BackendConnection for RecordingConnection {
    async fn execute(&mut self, sql: &str) -> Result<QueryOutput, BackendError> {
        self.backend.executed.lock().push(sql.to_string());
        if sql == HEALTH_PROBE_SQL {
            return Ok(QueryOutput::default());
        }
        let canned = self.backend.canned.lock();
        for (key, response) in canned.iter() {
            if key == sql {
                return match response {
                    Ok(output) => Ok(output.clone()),
                    Err(code) => Err(BackendError::Query {
                        code: Some(*code),
                        message: format!("backend rejected statement (error {code})"),
                    }),
                };
            }
        }
        Ok(QueryOutput::default())
    }

    async fn close(self: Box<Self>) {}
}

pub fn test_config() -> ProxyConfig {
    ProxyConfig::from_yaml(
        r#"
backend:
  connection_string: "mysql://kestrel@backend:3306/analytics"
  pool_size: 1
  timeout: 5
  pool_pre_ping: false
"#,
    )
    .unwrap()
}

/// A pipeline wired to the recording backend, plus a fresh session.
pub fn setup() -> (QueryPipeline, ProxySession, RecordingBackend) {
    setup_with_config(test_config())
}

pub fn setup_with_config(config: ProxyConfig) -> (QueryPipeline, ProxySession, RecordingBackend) {
    let backend = RecordingBackend::new();
    let pool = BackendPool::new(
        Arc::new(backend.clone()),
        PoolSettings::from_config(&config.backend),
    );
    let gateway = Arc::new(BackendGateway::new(pool, config.backend.timeout));
    let pipeline = QueryPipeline::new(&config, gateway);
    let session = ProxySession::new(42);
    (pipeline, session, backend)
}
