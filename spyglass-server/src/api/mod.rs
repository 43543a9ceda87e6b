//! Relay API handlers.
//!
//! # Endpoints
//!
//! - `POST /forward/{endpoint}` – accept one forwarded event for an endpoint
//! - `GET  /ws`                 – live channel, one JSON envelope per frame

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

mod forward;
mod ws;

/// Build the relay API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/forward/{endpoint}", post(forward::forward_event))
        .route("/ws", get(ws::live_channel))
}
