//! dbwatch_agent: database health monitor with SSE / WebSocket push.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dbwatch_agent::config::{AgentConfig, ConfigError};
use dbwatch_agent::http::router;
use dbwatch_agent::logsink::LogSink;
use dbwatch_agent::monitor::{Monitor, MonitorHandle};
use dbwatch_agent::pg::PgStatsSource;
use dbwatch_agent::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("dbwatch_agent=info")),
        )
        .init();

    let cfg = match AgentConfig::from_env().and_then(|c| c.apply_args(std::env::args())) {
        Ok(c) => c,
        Err(ConfigError::Usage(text)) => {
            println!("{text}");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    let sink = LogSink::open(&cfg.log_file)
        .with_context(|| format!("opening status log {}", cfg.log_file.display()))?;

    let (err_tx, mut err_rx) = mpsc::unbounded_channel::<String>();
    let source = Arc::new(PgStatsSource::new(&cfg.db, err_tx));
    let monitor = Monitor::new(source, sink, cfg.monitor());
    let handle = monitor.handle();

    // forward out-of-band connection errors into the monitor
    {
        let handle = handle.clone();
        tokio::spawn(async move {
            while let Some(msg) = err_rx.recv().await {
                handle.report_source_error(msg);
            }
        });
    }
    let monitor_task = tokio::spawn(monitor.run());

    let app = router(AppState::new(handle.clone()));
    let addr = SocketAddr::from(([0, 0, 0, 0], cfg.listen_port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    info!(
        "dbwatch agent listening on http://{} (db {}:{}/{}, poll every {:?})",
        listener.local_addr().unwrap_or(addr),
        cfg.db.host,
        cfg.db.port,
        cfg.db.dbname,
        cfg.poll_interval
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(handle))
        .await
        .context("http server")?;

    if let Err(e) = monitor_task.await {
        error!("monitor task ended abnormally: {e}");
    }
    info!("dbwatch agent stopped");
    Ok(())
}

/// Wait for SIGINT/SIGTERM, then shut the monitor down so subscriber streams
/// end and the HTTP server can drain.
async fn shutdown_signal(monitor: MonitorHandle) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("failed to listen for ctrl-c: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
    monitor.shutdown().await;
}
