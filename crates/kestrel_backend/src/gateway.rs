//! Backend gateway: serialized dispatch with a per-statement deadline.
//!
//! The deadline spans the whole backend interaction: waiting for a free
//! slot and the round-trip itself. A timeout mid-flight abandons the call
//! and destroys the slot, because the connection's protocol state is no
//! longer known.

use std::time::{Duration, Instant};

use kestrel_common::error::BackendError;

use crate::connector::QueryOutput;
use crate::pool::{BackendPool, HEALTH_PROBE_SQL};

pub struct BackendGateway {
    pool: BackendPool,
    /// Per-statement deadline. None = unbounded.
    statement_timeout: Option<Duration>,
}

impl BackendGateway {
    /// `timeout_secs` comes from `backend.timeout`; 0 disables the deadline.
    pub fn new(pool: BackendPool, timeout_secs: u64) -> Self {
        Self {
            pool,
            statement_timeout: (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs)),
        }
    }

    /// Dispatch one statement to the backend.
    pub async fn execute(&self, statement_id: u64, sql: &str) -> Result<QueryOutput, BackendError> {
        let started = Instant::now();
        let mut slot = self.pool.acquire(self.statement_timeout).await?;
        tracing::debug!(
            statement_id,
            slot_id = slot.slot_id(),
            "dispatching to backend: {}",
            sql
        );

        let remaining = match self.statement_timeout {
            Some(limit) => {
                let remaining = limit.saturating_sub(started.elapsed());
                if remaining.is_zero() {
                    slot.mark_defunct();
                    return Err(BackendError::Timeout {
                        timeout_ms: limit.as_millis() as u64,
                    });
                }
                Some(remaining)
            }
            None => None,
        };

        let result = match remaining {
            Some(remaining) => match tokio::time::timeout(remaining, slot.execute(sql)).await {
                Ok(result) => result,
                Err(_) => {
                    // The in-flight call is abandoned; the connection may
                    // still be mid-result-set, so it cannot be reused.
                    slot.mark_defunct();
                    let timeout_ms = self
                        .statement_timeout
                        .map(|t| t.as_millis() as u64)
                        .unwrap_or(0);
                    tracing::warn!(statement_id, "backend round-trip timed out");
                    return Err(BackendError::Timeout { timeout_ms });
                }
            },
            None => slot.execute(sql).await,
        };

        match &result {
            Ok(output) => tracing::debug!(
                statement_id,
                rows = output.rows.len(),
                columns = output.columns.len(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "backend reply"
            ),
            Err(e) => tracing::debug!(statement_id, "backend error: {}", e),
        }
        result
    }

    /// One-shot connectivity check, used at startup before serving.
    pub async fn probe(&self) -> Result<(), BackendError> {
        self.execute(0, HEALTH_PROBE_SQL).await.map(|_| ())
    }

    pub fn pool(&self) -> &BackendPool {
        &self.pool
    }
}
