//! servelm-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from flags and `SERVELM_*` variables.
//! 2. Initialise tracing on a non-blocking stderr writer.
//! 3. Open the audit sink.
//! 4. Resolve and load the model on a blocking thread.
//! 5. Start the completion worker.
//! 6. Build the Axum router and serve with graceful shutdown.

mod config;
mod error;
mod middleware;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use servelm_candle::CandleEngine;
use servelm_core::{AuditLogger, Orchestrator};
use tracing::{info, warn};

use crate::config::Config;
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::parse();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    let _log_guard = init_tracing(&cfg);
    info!(version = env!("CARGO_PKG_VERSION"), "servelm-server starting");

    // ── 3. Audit sink ──────────────────────────────────────────────────────────
    let sink = cfg.audit_sink();
    let audit = AuditLogger::open(&sink).with_context(|| format!("opening audit sink {sink:?}"))?;
    info!(?sink, "audit sink ready");

    // ── 4. Model ───────────────────────────────────────────────────────────────
    let source = cfg.model_source();
    let sampling = cfg.sampling();
    info!(model = %source.model, "loading model");
    let engine = tokio::task::spawn_blocking(move || {
        let files = source.resolve()?;
        CandleEngine::load(&files, sampling)
    })
    .await
    .context("model loading task panicked")?
    .context("failed to load model")?;

    // ── 5. Completion worker ───────────────────────────────────────────────────
    let orchestrator = Orchestrator::start(engine, cfg.model.clone(), Arc::new(audit), cfg.queue_capacity)
        .context("failed to spawn completion worker")?;

    let state = Arc::new(AppState {
        config: Arc::new(cfg.clone()),
        orchestrator,
    });

    // ── 6. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(state);
    let addr: SocketAddr = cfg
        .bind_address()
        .parse()
        .with_context(|| format!("invalid bind address {}", cfg.bind_address()))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("servelm-server stopped");
    Ok(())
}

/// Install the global subscriber. Diagnostics go to stderr so stdout stays
/// free for the audit sink; keep the guard alive to flush on exit.
fn init_tracing(cfg: &Config) -> tracing_appender::non_blocking::WorkerGuard {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: SERVELM_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let (writer, guard) = tracing_appender::non_blocking(std::io::stderr());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
    guard
}

/// Returns a future that resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install CTRL+C signal handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received; starting graceful shutdown");
}
