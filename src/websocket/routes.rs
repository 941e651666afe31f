//! HTTP route setup: the `/ws` upgrade endpoint and a `/health` check,
//! wrapped in the same CORS/tracing layers the transport has always used.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::connect_info::ConnectInfo;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::hub::HubState;

use super::connection::handle_socket;

pub fn create_router(hub: Arc<HubState>) -> Router {
    Router::new()
        .route("/ws", get(websocket_handler))
        .route("/health", get(health_check))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(hub)
}

async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(hub): State<Arc<HubState>>,
) -> axum::response::Response {
    ws.on_upgrade(move |socket| handle_socket(socket, hub, addr))
}

async fn health_check(State(hub): State<Arc<HubState>>) -> &'static str {
    let _ = hub.peers.len();
    "OK"
}

/// Binds the configured port, surfacing the raw I/O error so callers can
/// distinguish a bind failure from any other startup or runtime failure.
pub async fn bind(port: u16) -> std::io::Result<tokio::net::TcpListener> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tokio::net::TcpListener::bind(addr).await
}

/// Serves the Hub's router on an already-bound listener until the process
/// is signalled to shut down.
pub async fn serve(hub: Arc<HubState>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    let app = create_router(hub);
    tracing::info!(%addr, "match3 battle hub listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}

/// Binds the configured port and serves the Hub's router until the process
/// is signalled to shut down.
pub async fn run_server(hub: Arc<HubState>) -> anyhow::Result<()> {
    let listener = bind(hub.config.port).await?;
    serve(hub, listener).await
}
