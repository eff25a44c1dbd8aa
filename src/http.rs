//! HTTP collaborator: room provisioning, health, and metrics.
//!
//! Runs on a separate tokio task beside the WebSocket gateway and serves:
//!
//! - `GET /room/{room_id}/` — lazily provisions the room record and
//!   reports current occupancy.
//! - `GET /healthz` — readiness probe.
//! - `GET /metrics` — Prometheus text exposition.

use crate::state::Hub;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Response body for `GET /room/{room_id}/`.
#[derive(Debug, Serialize)]
struct RoomResponse {
    room_id: String,
    title: String,
    max_users: u32,
    current_users: u64,
    created: bool,
}

async fn room_handler(
    State(state): State<AppState>,
    Path(room_id): Path<String>,
) -> Result<Json<RoomResponse>, StatusCode> {
    let (record, created) = state
        .hub
        .db
        .get_or_create_room(&room_id, state.default_max_users)
        .await
        .map_err(|e| {
            error!(room = %room_id, error = %e, "Room lookup failed");
            StatusCode::INTERNAL_SERVER_ERROR
        })?;

    // Occupancy is advisory here; admission re-checks it on connect.
    let current_users = match state.hub.presence.count(&room_id).await {
        Ok(count) => count,
        Err(e) => {
            warn!(room = %room_id, error = %e, "Presence count failed - reporting zero");
            0
        }
    };

    Ok(Json(RoomResponse {
        room_id: record.room_id,
        title: record.title,
        max_users: record.max_users,
        current_users,
        created,
    }))
}

async fn healthz_handler() -> &'static str {
    "ok"
}

async fn metrics_handler() -> String {
    crate::metrics::gather_metrics()
}

#[derive(Clone)]
struct AppState {
    hub: Arc<Hub>,
    default_max_users: u32,
}

/// Build the collaborator router.
fn router(hub: Arc<Hub>, default_max_users: u32) -> Router {
    let state = AppState {
        hub,
        default_max_users,
    };
    Router::new()
        .route("/room/:room_id", get(room_handler))
        .route("/room/:room_id/", get(room_handler))
        .route("/healthz", get(healthz_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the HTTP collaborator.
///
/// This is a long-running task that should be spawned in the background.
pub async fn run_http_server(addr: SocketAddr, hub: Arc<Hub>, default_max_users: u32) {
    let app = router(hub, default_max_users);
    info!(%addr, "HTTP collaborator listening");

    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(%addr, error = %e, "Failed to bind HTTP server");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "HTTP server error");
    }
}
