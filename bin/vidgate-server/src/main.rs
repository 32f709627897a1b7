//! vidgate-server – entry point.
//!
//! Startup order:
//! 1. Parse configuration from environment variables.
//! 2. Initialise structured tracing (stdout or a daily-rolling file).
//! 3. Resolve the ffmpeg binary and probe it.
//! 4. Build the shared state and prepare the scratch directory.
//! 5. Build the Axum router and start the HTTP server with graceful shutdown.

mod config;
mod error;
mod handlers;
mod middleware;
mod routes;
mod state;
#[cfg(all(test, unix))]
mod test_support;

use std::sync::Arc;

use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::fmt::writer::BoxMakeWriter;

use crate::config::Config;
use crate::handlers::transcode::{resolve_program, Transcoder};
use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Configuration ───────────────────────────────────────────────────────
    let cfg = Config::from_env();

    // ── 2. Tracing ─────────────────────────────────────────────────────────────
    // Held until exit so buffered file records are flushed.
    let _log_guard = init_tracing(&cfg)?;

    info!(version = env!("CARGO_PKG_VERSION"), "vidgate-server starting");

    // ── 3. ffmpeg ──────────────────────────────────────────────────────────────
    let program = resolve_program(&cfg).await?;
    let transcoder = Transcoder::new(program, cfg.encode_timeout());
    match transcoder.probe().await {
        Ok(version) => info!(program = %transcoder.program().display(), %version, "ffmpeg ready"),
        // Requests will fail with a 500 until ffmpeg becomes available.
        Err(e) => warn!(error = %e, "ffmpeg probe failed"),
    }

    // ── 4. Shared state + scratch directory ────────────────────────────────────
    let addr = cfg.bind_address();
    let state = Arc::new(AppState::new(cfg, transcoder));
    tokio::fs::create_dir_all(state.temp_files.dir()).await?;
    info!(temp_dir = %state.temp_files.dir().display(), "scratch directory ready");

    // ── 5. HTTP server with graceful shutdown ──────────────────────────────────
    let app = routes::build(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("vidgate-server stopped");
    Ok(())
}

fn init_tracing(cfg: &Config) -> anyhow::Result<Option<WorkerGuard>> {
    // Build the log-level filter, warning loudly if the configured value is
    // not a valid tracing filter expression.
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match cfg.log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: VIDGATE_LOG='{}' is not a valid tracing filter ({}); \
                     falling back to 'info'",
                    cfg.log_level, e
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    let (writer, guard) = match &cfg.log_dir {
        Some(dir) => {
            let appender = RollingFileAppender::builder()
                .rotation(Rotation::DAILY)
                .filename_prefix("vidgate-server")
                .filename_suffix("log")
                .build(dir)?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(writer), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(writer)
        .with_ansi(cfg.log_dir.is_none())
        .with_target(true)
        .with_thread_ids(true);

    if cfg.log_json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    Ok(guard)
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
        use tokio::signal::unix::{signal, SignalKind};
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
