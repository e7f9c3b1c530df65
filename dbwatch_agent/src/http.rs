//! HTTP surface: push endpoints plus a one-shot status read.

use axum::{extract::State, routing::get, Json, Router};
use time::OffsetDateTime;

use crate::sse::sse_handler;
use crate::state::AppState;
use crate::types::Status;
use crate::ws::ws_handler;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/events", get(sse_handler))
        .route("/ws", get(ws_handler))
        .route("/status", get(status_handler))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Current snapshot, or a Disconnected placeholder before the first poll.
async fn status_handler(State(state): State<AppState>) -> Json<Status> {
    let status = state.hub.last_status().unwrap_or_else(|| {
        let now_ms = OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000;
        Status::disconnected(now_ms as i64)
    });
    Json(status)
}
