// backend/src/main.rs

use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing_subscriber::EnvFilter;

use memoya_backend::clock::SystemClock;
use memoya_backend::state::{AppState, Config};
use memoya_backend::store::MemoryStore;

// Sessions this far past their deadline are safe to drop.
const REAPER_GRACE_MINUTES: i64 = 30;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    memoya_backend::routes::health::mark_started();

    let config = Config::from_env();
    tracing::debug!(?config, "loaded configuration");

    let store = Arc::new(MemoryStore::new());
    let reaper = config.session_reaper_interval.map(|every| {
        store.clone().spawn_reaper(
            Arc::new(SystemClock),
            every,
            chrono::Duration::minutes(REAPER_GRACE_MINUTES),
        )
    });

    let port = config.port;
    let state = AppState::try_new(config, store)?;
    let app = memoya_backend::app_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!("memoya backend listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(reaper) = reaper {
        reaper.abort();
    }
    tracing::info!("server exited");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!("failed to install SIGTERM handler: {}", e),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutting down server...");
}
