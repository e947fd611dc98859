use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};

use kestrel_backend::{connector, BackendGateway, BackendPool, PoolSettings};
use kestrel_common::config::ProxyConfig;
use kestrel_protocol_mysql::ProxyServer;

#[derive(Parser, Debug)]
#[command(
    name = "kestrel",
    about = "KestrelProxy — MySQL protocol proxy for restricted analytics backends",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start the proxy server.
    Serve {
        /// Config file path.
        #[arg(short, long, default_value = "config/kestrel.yaml")]
        config: String,

        /// Override the configured log level.
        #[arg(short = 'l', long)]
        log_level: Option<String>,

        /// Prometheus metrics listen address (metrics disabled when unset).
        #[arg(long)]
        metrics_addr: Option<String>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    match cli.command {
        Command::Serve {
            config,
            log_level,
            metrics_addr,
        } => {
            if let Err(e) = serve(&config, log_level.as_deref(), metrics_addr.as_deref()).await {
                eprintln!("Fatal: {e}");
                std::process::exit(1);
            }
        }
    }
}

async fn serve(
    config_path: &str,
    log_level: Option<&str>,
    metrics_addr: Option<&str>,
) -> Result<()> {
    // Config problems print to stderr and exit 1: logging is not up yet.
    let config = ProxyConfig::load(config_path)?;
    let _log_guard = kestrel_observability::init_tracing(&config.logging, log_level);

    tracing::info!("KestrelProxy starting");
    tracing::info!("config: {}", config_path);
    tracing::info!("listen address: {}", config.listen_addr());
    tracing::info!("backend pool size: {}", config.backend.pool_size);
    tracing::info!("write blocking: {}", config.security.block_writes);
    tracing::info!(
        "date gate: {} (columns: {})",
        config.business_rules.require_cob_date,
        config.business_rules.date_columns.join(", ")
    );
    tracing::info!(
        "rewrites: unwrap_subqueries={}, auto_fix_group_by={}",
        config.transformations.unwrap_subqueries,
        config.transformations.auto_fix_group_by
    );

    if let Some(addr) = metrics_addr {
        if let Err(e) = kestrel_observability::init_metrics(addr) {
            tracing::warn!("failed to initialize metrics: {}", e);
        }
    }

    let connector = connector::build_connector(&config.backend)?;
    let pool = BackendPool::new(
        Arc::new(connector),
        PoolSettings::from_config(&config.backend),
    );
    let gateway = Arc::new(BackendGateway::new(pool.clone(), config.backend.timeout));

    tracing::info!("probing backend connectivity");
    gateway
        .probe()
        .await
        .map_err(|e| anyhow::anyhow!("backend initial probe failed: {e}"))?;
    tracing::info!("backend connection successful");

    let server = ProxyServer::new(Arc::new(config), gateway);
    server
        .run_with_shutdown(wait_for_shutdown_signal(), Duration::from_secs(30))
        .await?;

    pool.close().await;
    tracing::info!("KestrelProxy stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(e) => {
                tracing::error!("failed to register SIGTERM handler: {}", e);
                let _ = tokio::signal::ctrl_c().await;
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => tracing::info!("SIGINT received"),
            _ = sigterm.recv() => tracing::info!("SIGTERM received"),
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("SIGINT received");
    }
}
