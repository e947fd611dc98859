//! Observability setup: structured logging and Prometheus metrics.

use std::path::Path;

use kestrel_common::config::LoggingConfig;
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Guard keeping the non-blocking file writer alive for the process
/// lifetime. Dropping it loses buffered log lines.
pub struct LogGuard {
    _file_guard: Option<tracing_appender::non_blocking::WorkerGuard>,
}

/// Initialize the global tracing subscriber from the `logging.*` config.
/// `level_override` (from `--log-level`) wins over the configured level.
pub fn init_tracing(config: &LoggingConfig, level_override: Option<&str>) -> LogGuard {
    let level = level_override.unwrap_or(&config.level);
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("{level},kestrel=debug")));

    let mut file_guard = None;
    match &config.file {
        Some(path) => {
            let path = Path::new(path);
            let directory = path.parent().unwrap_or_else(|| Path::new("."));
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "kestrel.log".to_string());
            let appender = tracing_appender::rolling::daily(directory, file_name);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            file_guard = Some(guard);

            if config.json {
                let layer = fmt::layer().json().with_target(true).with_writer(writer);
                tracing_subscriber::registry().with(env_filter).with(layer).init();
            } else {
                let layer = fmt::layer()
                    .with_target(true)
                    .with_ansi(false)
                    .with_writer(writer);
                tracing_subscriber::registry().with(env_filter).with(layer).init();
            }
        }
        None => {
            if config.json {
                let layer = fmt::layer().json().with_target(true);
                tracing_subscriber::registry().with(env_filter).with(layer).init();
            } else {
                let layer = fmt::layer().with_target(true);
                tracing_subscriber::registry().with(env_filter).with(layer).init();
            }
        }
    }

    LogGuard {
        _file_guard: file_guard,
    }
}

/// Initialize the Prometheus metrics exporter. Failure to bind is a
/// warning at the call site, never fatal.
pub fn init_metrics(listen_addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let addr: std::net::SocketAddr = listen_addr.parse()?;
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!("Prometheus metrics endpoint on http://{}/metrics", addr);
    Ok(())
}

/// Record one processed statement, labeled by its terminal fate.
pub fn record_statement(fate: &str, duration_us: u64) {
    metrics::counter!("kestrel_statements_total", "fate" => fate.to_string()).increment(1);
    metrics::histogram!("kestrel_statement_duration_us", "fate" => fate.to_string())
        .record(duration_us as f64);
}

/// Record one applied rewrite by kind.
pub fn record_rewrite(kind: &str) {
    metrics::counter!("kestrel_rewrites_total", "kind" => kind.to_string()).increment(1);
}

/// Record one policy rejection by reason.
pub fn record_rejection(reason: &str) {
    metrics::counter!("kestrel_rejections_total", "reason" => reason.to_string()).increment(1);
}

pub fn record_active_connections(count: usize) {
    metrics::gauge!("kestrel_active_connections").set(count as f64);
}

/// Record backend pool gauges from a stats snapshot.
pub fn record_pool_stats(checkouts: u64, timeouts: u64, idle: usize) {
    metrics::counter!("kestrel_pool_checkouts_total").absolute(checkouts);
    metrics::counter!("kestrel_pool_timeouts_total").absolute(timeouts);
    metrics::gauge!("kestrel_pool_idle_slots").set(idle as f64);
}
