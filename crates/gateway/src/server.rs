//! Axum application wiring: the `/ws` upgrade, a `/health` probe, the idle
//! session sweeper, and graceful shutdown.

use std::{sync::Arc, time::Duration};

use {
    axum::{
        Json, Router,
        extract::{State, WebSocketUpgrade},
        response::Response,
        routing::get,
    },
    tracing::{info, warn},
};

use veil_protocol::{PROTOCOL_VERSION, close_codes, error_codes};

use crate::{state::GatewayState, ws};

pub fn build_app(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/ws", get(ws_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

async fn ws_upgrade(State(state): State<Arc<GatewayState>>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| ws::handle_connection(socket, state))
}

async fn health(State(state): State<Arc<GatewayState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "protocol": PROTOCOL_VERSION,
        "connections": state.connections.session_count(),
    }))
}

/// Serve until ctrl-c. Every live session is closed with a recoverable code
/// on the way down so clients reconnect and re-sync.
pub async fn serve(state: Arc<GatewayState>, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, "gateway listening");

    let sweeper = tokio::spawn(heartbeat_sweeper(Arc::clone(&state)));
    let app = build_app(Arc::clone(&state));

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(Arc::clone(&state)))
        .await?;

    sweeper.abort();
    Ok(())
}

/// Close sessions whose heartbeat went quiet for more than
/// `interval * miss_threshold`.
async fn heartbeat_sweeper(state: Arc<GatewayState>) {
    let interval = Duration::from_secs(state.config.heartbeat.interval_seconds);
    let window = interval * state.config.heartbeat.miss_threshold;
    let mut ticker = tokio::time::interval(interval);
    ticker.tick().await; // immediate first tick

    loop {
        ticker.tick().await;
        for session in state.connections.idle_sessions(window) {
            warn!(conn = %session.conn_id, idle_secs = session.idle_for().as_secs(), "closing idle session");
            session.close(close_codes::RECOVERABLE, error_codes::HEARTBEAT_LOST);
        }
    }
}

async fn shutdown_signal(state: Arc<GatewayState>) {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, closing sessions");
    state
        .connections
        .close_all(close_codes::RECOVERABLE, error_codes::SHUTTING_DOWN);
}
