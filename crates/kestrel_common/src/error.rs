use thiserror::Error;

/// Convenience alias for `Result<T, ProxyError>`.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Error classification for slot lifecycle and surfacing decisions.
///
/// - `UserError`  — the statement itself is at fault (bad SQL, blocked
///   operation, missing mandatory predicate); the backend was never touched
///   or is untouched by the failure.
/// - `Transient`  — connectivity-shaped backend failure; the slot that
///   produced it is destroyed and the pool self-heals; the client may retry.
/// - `QueryError` — the backend rejected the statement; the slot stays
///   usable and the backend's message is relayed verbatim.
/// - `Fatal`      — process-level failure; the connection is closed and the
///   supervisor is expected to restart the proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Transient,
    QueryError,
    Fatal,
}

/// Top-level error type that all crate-specific errors convert into.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("SQL error: {0}")]
    Sql(#[from] SqlError),

    #[error("{0}")]
    Policy(#[from] PolicyError),

    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// SQL frontend errors.
#[derive(Error, Debug)]
pub enum SqlError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Empty statement")]
    Empty,
}

/// Policy gate rejections. Message text is the full user-facing body,
/// suggestions included, and is relayed into the wire error payload.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("{message}")]
    WriteBlocked { operation: String, message: String },

    #[error("{message}")]
    UnsupportedFeature { feature: String, message: String },

    #[error("{message}")]
    MissingDatePredicate { message: String },

    #[error("{message}")]
    DatabaseBlocked { database: String, message: String },
}

/// Backend gateway errors.
#[derive(Error, Debug)]
pub enum BackendError {
    /// Connectivity-shaped failure: the slot is destroyed before reuse.
    #[error("backend connection lost: {0}")]
    Transient(String),

    /// The backend executed and rejected the statement. `code` is the
    /// backend's own MySQL error number when it supplied one.
    #[error("{message}")]
    Query { code: Option<u16>, message: String },

    /// No slot became free before the per-statement deadline.
    #[error("timed out waiting for a backend connection ({waited_ms}ms)")]
    PoolExhausted { waited_ms: u64 },

    /// The backend round-trip outlived the per-statement deadline.
    #[error("statement timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Unrecoverable: the pool is torn down.
    #[error("fatal backend failure: {0}")]
    Fatal(String),
}

/// Configuration errors. Always fatal at startup (exit 1).
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(String),

    #[error("environment variable '{0}' is not set and has no default")]
    MissingEnvVar(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

impl ProxyError {
    /// Classify this error for slot-lifecycle and surfacing decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Sql(_) => ErrorKind::UserError,
            ProxyError::Policy(_) => ErrorKind::UserError,
            ProxyError::Backend(BackendError::Transient(_)) => ErrorKind::Transient,
            ProxyError::Backend(BackendError::Query { .. }) => ErrorKind::QueryError,
            ProxyError::Backend(BackendError::PoolExhausted { .. }) => ErrorKind::Transient,
            ProxyError::Backend(BackendError::Timeout { .. }) => ErrorKind::Transient,
            ProxyError::Backend(BackendError::Fatal(_)) => ErrorKind::Fatal,
            ProxyError::Config(_) => ErrorKind::Fatal,
            ProxyError::Internal(_) => ErrorKind::Fatal,
        }
    }

    /// Returns true if the client may retry this statement unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// Map to the MySQL error number carried in the wire error packet.
    pub fn mysql_errno(&self) -> u16 {
        match self {
            ProxyError::Sql(SqlError::Parse(_)) => 1064, // ER_PARSE_ERROR
            ProxyError::Sql(SqlError::Empty) => 1065,    // ER_EMPTY_QUERY
            ProxyError::Policy(PolicyError::WriteBlocked { .. }) => 1290, // ER_OPTION_PREVENTS_STATEMENT
            ProxyError::Policy(PolicyError::UnsupportedFeature { .. }) => 1235, // ER_NOT_SUPPORTED_YET
            ProxyError::Policy(PolicyError::MissingDatePredicate { .. }) => 1105, // ER_UNKNOWN_ERROR
            ProxyError::Policy(PolicyError::DatabaseBlocked { .. }) => 1044, // ER_DBACCESS_DENIED_ERROR
            ProxyError::Backend(BackendError::Transient(_)) => 1053, // ER_SERVER_SHUTDOWN
            ProxyError::Backend(BackendError::Query { code, .. }) => code.unwrap_or(1105),
            ProxyError::Backend(BackendError::PoolExhausted { .. }) => 1205, // ER_LOCK_WAIT_TIMEOUT
            ProxyError::Backend(BackendError::Timeout { .. }) => 1205,
            ProxyError::Backend(BackendError::Fatal(_)) => 1105,
            ProxyError::Config(_) => 1105,
            ProxyError::Internal(_) => 1105,
        }
    }

    /// Emit a structured log entry for Fatal errors. Called once per fatal
    /// error before the connection is closed.
    pub fn log_if_fatal(&self) {
        if self.kind() == ErrorKind::Fatal {
            tracing::error!(
                errno = self.mysql_errno(),
                category = "Fatal",
                "fatal proxy error: {}",
                self
            );
        }
    }
}
