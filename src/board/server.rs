use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::CorsLayer;

use super::api::{self, AppState, SharedState};
use super::db::{BoardDb, DbHandle};
use crate::engine::allocator::DEFAULT_RENUMBER_THRESHOLD;
use crate::engine::presence::PresenceMap;

/// Configuration for the board server.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub db_path: PathBuf,
    /// Bind on all interfaces and allow any origin.
    pub dev_mode: bool,
    pub renumber_threshold: f64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3141,
            db_path: PathBuf::from(".corkboard/board.db"),
            dev_mode: false,
            renumber_threshold: DEFAULT_RENUMBER_THRESHOLD,
        }
    }
}

/// Wrap an opened database into the state every handler shares.
pub fn build_state(db: BoardDb, renumber_threshold: f64) -> SharedState {
    let (ws_tx, _rx) = broadcast::channel::<String>(256);
    Arc::new(AppState {
        db: DbHandle::new(db),
        ws_tx,
        presence: PresenceMap::new(),
        renumber_threshold,
    })
}

/// Build the application router: REST API, `/ws` and `/health`.
pub fn build_router(state: SharedState, dev_mode: bool) -> Router {
    let app = api::api_router().with_state(state);
    if dev_mode {
        app.layer(CorsLayer::permissive())
    } else {
        app
    }
}

/// Serve `state` on an already-bound listener until `shutdown` resolves.
pub async fn run_server<F>(
    listener: TcpListener,
    state: SharedState,
    dev_mode: bool,
    shutdown: F,
) -> Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let app = build_router(state, dev_mode);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}

/// Open the database, bind and serve until Ctrl+C.
pub async fn start_server(config: ServerConfig) -> Result<()> {
    let db = BoardDb::new(&config.db_path).with_context(|| {
        format!(
            "Failed to initialize board database at {}",
            config.db_path.display()
        )
    })?;
    let state = build_state(db, config.renumber_threshold);

    let host = if config.dev_mode { "0.0.0.0" } else { "127.0.0.1" };
    let addr = format!("{}:{}", host, config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    let local_addr = listener.local_addr()?;
    tracing::info!(%local_addr, db = %config.db_path.display(), dev_mode = config.dev_mode, "board server listening");
    println!("Corkboard running at http://{}", local_addr);

    run_server(listener, state, config.dev_mode, shutdown_signal()).await?;

    println!("Server shut down gracefully.");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        // Without a signal handler the server runs until killed.
        tracing::error!(error = %e, "failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown requested");
}
