//! MySQL wire server.
//!
//! The accept loop owns admission control and connection lifecycle; the
//! wire protocol itself (handshake, auth, packet framing, prepared
//! statement bookkeeping) is opensrv-mysql's job. Each connection gets one
//! task, one `ProxySession`, and drives the shared `QueryPipeline`.

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use opensrv_mysql::{
    AsyncMysqlIntermediary, AsyncMysqlShim, Column, ColumnFlags, ColumnType, ErrorKind,
    InitWriter, OkResponse, ParamParser, QueryResultWriter, RowWriter, StatementMetaWriter,
};
use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};

use kestrel_backend::BackendGateway;
use kestrel_common::config::ProxyConfig;
use kestrel_common::error::ProxyError;
use kestrel_common::row::{ColumnDef, ColumnTypeHint, ScalarValue};

use crate::pipeline::QueryPipeline;
use crate::session::{ProxySession, SERVER_VERSION};

/// MySQL-protocol proxy server.
pub struct ProxyServer {
    config: Arc<ProxyConfig>,
    pipeline: Arc<QueryPipeline>,
    active_connections: Arc<AtomicUsize>,
    next_connection_id: AtomicU32,
}

impl ProxyServer {
    pub fn new(config: Arc<ProxyConfig>, gateway: Arc<BackendGateway>) -> Self {
        let pipeline = Arc::new(QueryPipeline::new(&config, gateway));
        Self {
            config,
            pipeline,
            active_connections: Arc::new(AtomicUsize::new(0)),
            next_connection_id: AtomicU32::new(1),
        }
    }

    pub fn active_connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    /// Serve until the process is killed.
    pub async fn run(&self) -> Result<(), ProxyError> {
        self.run_with_shutdown(std::future::pending::<()>(), Duration::from_secs(30))
            .await
    }

    /// Serve until `shutdown` resolves, then stop accepting and wait up to
    /// `drain_timeout` for active connections to finish.
    pub async fn run_with_shutdown(
        &self,
        shutdown: impl std::future::Future<Output = ()>,
        drain_timeout: Duration,
    ) -> Result<(), ProxyError> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| ProxyError::Internal(format!("failed to bind {addr}: {e}")))?;
        tracing::info!("KestrelProxy listening on {}", addr);

        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            tracing::debug!("new connection from {}", peer);
                            self.spawn_connection(stream);
                        }
                        Err(e) => {
                            tracing::warn!("accept error: {}", e);
                        }
                    }
                }
                _ = &mut shutdown => {
                    tracing::info!("shutdown signal received, no longer accepting connections");
                    break;
                }
            }
        }

        let active = self.active_connections.load(Ordering::Relaxed);
        if active > 0 {
            tracing::info!(
                "draining {} active connection(s) (timeout: {:?})",
                active,
                drain_timeout
            );
            let deadline = tokio::time::Instant::now() + drain_timeout;
            loop {
                let remaining = self.active_connections.load(Ordering::Relaxed);
                if remaining == 0 {
                    tracing::info!("all connections drained");
                    break;
                }
                if tokio::time::Instant::now() >= deadline {
                    tracing::warn!(
                        "drain timeout reached with {} connection(s) still active",
                        remaining
                    );
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        }

        tracing::info!("graceful shutdown complete");
        Ok(())
    }

    /// Shared handle to the active-connection counter.
    pub fn active_connections_handle(&self) -> Arc<AtomicUsize> {
        self.active_connections.clone()
    }

    fn spawn_connection(&self, stream: TcpStream) {
        let max_connections = self.config.proxy.max_connections;
        let active = self.active_connections.clone();
        let connection_id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let now_active = active.fetch_add(1, Ordering::Relaxed) + 1;
        kestrel_observability::record_active_connections(now_active);

        // The admission check fires **after** the startup handshake, inside
        // the shim, so the client receives a properly framed
        // Too-many-connections error it can display, rather than a
        // silently dropped socket.
        let refusal = admission_refusal(now_active, max_connections);
        if refusal.is_some() {
            tracing::warn!(
                connection_id,
                "admission bound exceeded: {} active (max {})",
                now_active,
                max_connections
            );
        }

        let shim = ShimConnection {
            pipeline: self.pipeline.clone(),
            config: self.config.clone(),
            session: ProxySession::new(connection_id),
            prepared: HashMap::new(),
            next_statement_id: 1,
            refusal,
        };

        tokio::spawn(async move {
            let (reader, writer) = stream.into_split();
            if let Err(e) = AsyncMysqlIntermediary::run_on(shim, reader, writer).await {
                tracing::debug!(connection_id, "connection ended with error: {}", e);
            }
            let now_active = active.fetch_sub(1, Ordering::Relaxed) - 1;
            kestrel_observability::record_active_connections(now_active);
            tracing::info!(connection_id, "connection closed");
        });
    }
}

/// Refusal message when the admission bound is exceeded (0 = unlimited).
fn admission_refusal(active: usize, max_connections: usize) -> Option<String> {
    if max_connections > 0 && active > max_connections {
        Some(format!(
            "sorry, too many clients already ({active} of {max_connections} connections used)"
        ))
    } else {
        None
    }
}

/// Terminates an over-capacity session once the framed error is out.
fn refused_session_error() -> io::Error {
    io::Error::new(
        io::ErrorKind::ConnectionAborted,
        "connection refused: too many clients",
    )
}

/// One client connection as seen by the wire library.
struct ShimConnection {
    pipeline: Arc<QueryPipeline>,
    config: Arc<ProxyConfig>,
    session: ProxySession,
    /// Prepared-statement id → stored SQL text.
    prepared: HashMap<u32, String>,
    next_statement_id: u32,
    /// Set when the connection exceeded the admission bound at accept
    /// time: the first client interaction gets this message as a framed
    /// error and the session ends.
    refusal: Option<String>,
}

impl ShimConnection {
    async fn run_query<'a, W: AsyncWrite + Send + Unpin>(
        &'a mut self,
        sql: &str,
        results: QueryResultWriter<'a, W>,
    ) -> io::Result<()> {
        if let Some(message) = self.refusal.clone() {
            results
                .error(ErrorKind::ER_CON_COUNT_ERROR, message.as_bytes())
                .await?;
            return Err(refused_session_error());
        }

        let result = self.pipeline.process(&mut self.session, sql).await;

        if !result.success {
            let error = result
                .error
                .unwrap_or_else(|| ProxyError::Internal("result shape error".into()));
            error.log_if_fatal();
            return results
                .error(wire_error_kind(&error), error.to_string().as_bytes())
                .await;
        }

        if result.columns.is_empty() {
            // Zero-column replies (SET, USE, EmptyOk) are OK packets.
            return results.completed(OkResponse::default()).await;
        }

        let columns: Vec<Column> = result.columns.iter().map(wire_column).collect();
        let mut row_writer = results.start(&columns).await?;
        for row in &result.rows {
            for value in row {
                write_value(&mut row_writer, value)?;
            }
            row_writer.end_row().await?;
        }
        row_writer.finish().await
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin> AsyncMysqlShim<W> for ShimConnection {
    type Error = io::Error;

    fn version(&self) -> String {
        SERVER_VERSION.to_string()
    }

    fn connect_id(&self) -> u32 {
        self.session.connection_id
    }

    async fn on_prepare<'a>(
        &'a mut self,
        query: &'a str,
        info: StatementMetaWriter<'a, W>,
    ) -> Result<(), Self::Error> {
        if let Some(message) = self.refusal.clone() {
            info.error(ErrorKind::ER_CON_COUNT_ERROR, message.as_bytes())
                .await?;
            return Err(refused_session_error());
        }
        if query.contains('?') {
            // Parameter binding is not offered; Tableau's probes all use
            // literal SQL.
            return info
                .error(
                    ErrorKind::ER_NOT_SUPPORTED_YET,
                    b"prepared-statement parameters are not supported by this proxy",
                )
                .await;
        }
        let id = self.next_statement_id;
        self.next_statement_id += 1;
        self.prepared.insert(id, query.to_string());
        // No parameters and no advertised schema: the proxy cannot know
        // result shapes without executing.
        info.reply(id, &[], &[]).await
    }

    async fn on_execute<'a>(
        &'a mut self,
        id: u32,
        _params: ParamParser<'a>,
        results: QueryResultWriter<'a, W>,
    ) -> Result<(), Self::Error> {
        match self.prepared.get(&id).cloned() {
            Some(sql) => self.run_query(&sql, results).await,
            None => {
                results
                    .error(ErrorKind::ER_UNKNOWN_ERROR, b"unknown prepared statement")
                    .await
            }
        }
    }

    async fn on_close<'a>(&'a mut self, id: u32) {
        self.prepared.remove(&id);
    }

    async fn on_init<'a>(
        &'a mut self,
        database: &'a str,
        writer: InitWriter<'a, W>,
    ) -> Result<(), Self::Error> {
        if let Some(message) = self.refusal.clone() {
            writer
                .error(ErrorKind::ER_CON_COUNT_ERROR, message.as_bytes())
                .await?;
            return Err(refused_session_error());
        }
        if !self.config.business_rules.database_allowed(database) {
            tracing::info!(
                connection_id = self.session.connection_id,
                "USE of blocked database refused: {}",
                database
            );
            let message = format!("Access to database '{database}' is not permitted");
            return writer
                .error(ErrorKind::ER_DBACCESS_DENIED_ERROR, message.as_bytes())
                .await;
        }
        tracing::info!(
            connection_id = self.session.connection_id,
            "switching to database: {}",
            database
        );
        self.session.current_database = Some(database.to_string());
        writer.ok().await
    }

    async fn on_query<'a>(
        &'a mut self,
        query: &'a str,
        results: QueryResultWriter<'a, W>,
    ) -> Result<(), Self::Error> {
        self.run_query(query, results).await
    }
}

fn wire_column(column: &ColumnDef) -> Column {
    Column {
        table: String::new(),
        column: column.name.clone(),
        coltype: match column.ty {
            ColumnTypeHint::Integer => ColumnType::MYSQL_TYPE_LONGLONG,
            ColumnTypeHint::Double => ColumnType::MYSQL_TYPE_DOUBLE,
            ColumnTypeHint::Decimal => ColumnType::MYSQL_TYPE_NEWDECIMAL,
            ColumnTypeHint::Text => ColumnType::MYSQL_TYPE_VAR_STRING,
            ColumnTypeHint::Bytes => ColumnType::MYSQL_TYPE_BLOB,
            ColumnTypeHint::Date => ColumnType::MYSQL_TYPE_DATE,
            ColumnTypeHint::Time => ColumnType::MYSQL_TYPE_TIME,
            ColumnTypeHint::DateTime => ColumnType::MYSQL_TYPE_DATETIME,
        },
        colflags: ColumnFlags::empty(),
    }
}

fn write_value<W: AsyncWrite + Unpin>(
    writer: &mut RowWriter<'_, W>,
    value: &ScalarValue,
) -> io::Result<()> {
    match value {
        ScalarValue::Null => writer.write_col(None::<String>),
        ScalarValue::Int(v) => writer.write_col(*v),
        ScalarValue::UInt(v) => writer.write_col(*v),
        ScalarValue::Double(v) => writer.write_col(*v),
        ScalarValue::Text(s) => writer.write_col(s.as_str()),
        ScalarValue::Bytes(b) => writer.write_col(&b[..]),
    }
}

/// Map the proxy error taxonomy onto wire error kinds. The numeric code a
/// client sees comes from this kind; the message carries the detail.
fn wire_error_kind(error: &ProxyError) -> ErrorKind {
    match error.mysql_errno() {
        1044 => ErrorKind::ER_DBACCESS_DENIED_ERROR,
        1053 => ErrorKind::ER_SERVER_SHUTDOWN,
        1054 => ErrorKind::ER_BAD_FIELD_ERROR,
        1064 => ErrorKind::ER_PARSE_ERROR,
        1065 => ErrorKind::ER_EMPTY_QUERY,
        1146 => ErrorKind::ER_NO_SUCH_TABLE,
        1205 => ErrorKind::ER_LOCK_WAIT_TIMEOUT,
        1235 => ErrorKind::ER_NOT_SUPPORTED_YET,
        1290 => ErrorKind::ER_OPTION_PREVENTS_STATEMENT,
        _ => ErrorKind::ER_UNKNOWN_ERROR,
    }
}
