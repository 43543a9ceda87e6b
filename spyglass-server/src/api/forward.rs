use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use kanau::processor::Processor;
use spyglass_core::config::RouteError;
use spyglass_core::events::Forward;
use spyglass_sdk::objects::{ForwardedEvent, SpyEnvelope};

use crate::state::AppState;

/// `POST /forward/{endpoint}` — publish one event received by `endpoint`.
///
/// Responds with the envelope that went out on the live channel.
pub(super) async fn forward_event(
    State(state): State<AppState>,
    Path(endpoint): Path<String>,
    Json(event): Json<ForwardedEvent>,
) -> Result<Json<SpyEnvelope>, ForwardError> {
    let envelope = state.forwarder.process(Forward { endpoint, event }).await?;
    Ok(Json(envelope))
}

#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    /// The endpoint or the event's identity is not in the routing document.
    #[error(transparent)]
    Unroutable(#[from] RouteError),
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> axum::response::Response {
        match self {
            ForwardError::Unroutable(e) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        }
    }
}
