pub mod config;
pub mod feed;
pub mod state;
pub mod ws_client;

pub use config::RelayConfig;
pub use state::AppState;

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use feed::{FeedError, FeedSession, FeedStatus};
use relay_core::util::signal_handler;
use relay_core::{Broadcaster, ClientConnector, ConnectionRegistry, FeedSink, bridge};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("feed: {0}")]
    Feed(#[from] FeedError),
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },
    #[error("server: {0}")]
    Serve(std::io::Error),
}

/// Wire the registry, the bridge and the lifecycle handler together.
pub fn assemble(cfg: &RelayConfig, feed: FeedStatus) -> (AppState, FeedSink, Broadcaster) {
    let registry = Arc::new(ConnectionRegistry::new());
    let (sink, broadcaster) = bridge(Arc::clone(&registry), cfg.ingest_capacity);
    let connector = ClientConnector::new(registry, cfg.client_queue_depth);
    let state = AppState::new(
        connector,
        broadcaster.stats(),
        feed,
        cfg.client_send_timeout,
    );
    (state, sink, broadcaster)
}

pub fn build_router(state: AppState, ws_path: &str, frontend_dir: &Path) -> Router {
    let router = Router::new()
        .route(ws_path, get(ws_client::ws_client_handler))
        .route("/health", get(health));

    let router = if frontend_dir.is_dir() {
        info!(dir = %frontend_dir.display(), "serving frontend");
        router.fallback_service(ServeDir::new(frontend_dir))
    } else {
        warn!(dir = %frontend_dir.display(), "frontend directory not found");
        let notice = format!("frontend not found at {}", frontend_dir.display());
        router.route(
            "/",
            get(move || async move { Json(serde_json::json!({ "message": notice })) }),
        )
    };

    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Serve `router` on `listener` with peer addresses available to handlers.
pub async fn serve(listener: TcpListener, router: Router) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Run the relay until ctrl-c.
pub async fn run(cfg: RelayConfig) -> Result<(), RelayError> {
    let feed_status = FeedStatus::new();
    let (state, sink, broadcaster) = assemble(&cfg, feed_status.clone());
    let broadcaster_task = tokio::spawn(broadcaster.run());

    let feed = FeedSession::connect(cfg.broker.clone(), feed_status, move |topic, payload| {
        sink.on_message(topic, payload);
    })?;

    let router = build_router(state, &cfg.ws_path, &cfg.frontend_dir);
    let listener = TcpListener::bind(&cfg.bind_addr)
        .await
        .map_err(|source| RelayError::Bind {
            addr: cfg.bind_addr.clone(),
            source,
        })?;
    info!(addr = %cfg.bind_addr, ws_path = %cfg.ws_path, "relay listening");

    let result = tokio::select! {
        result = serve(listener, router) => result.map_err(RelayError::Serve),
        () = signal_handler() => {
            info!("shutdown requested");
            Ok(())
        }
    };

    tokio::task::spawn_blocking(move || feed.shutdown())
        .await
        .unwrap_or_else(|e| error!(error = %e, "feed shutdown task failed"));
    broadcaster_task.abort();
    result
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
    feed: &'static str,
    clients: usize,
    messages_broadcast: u64,
    messages_dropped: u64,
}

async fn health(State(state): State<AppState>) -> Json<Health> {
    let stats = state.stats.snapshot();
    Json(Health {
        status: "ok",
        feed: state.feed.state().as_str(),
        clients: state.client_count(),
        messages_broadcast: stats.broadcast,
        messages_dropped: stats.dropped,
    })
}
