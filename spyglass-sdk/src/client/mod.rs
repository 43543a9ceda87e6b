//! Network transports for the listener and the relay.
//!
//! Gated behind the `client` cargo feature so crates that only need the
//! shared types and an in-process listener do not pull in `reqwest` or a
//! websocket stack.

mod relay;
mod ws;

pub use relay::RelayClient;
pub use ws::connect;

use reqwest::StatusCode;

/// Errors produced by the SDK network clients.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Transport-level failure (DNS, TLS, connection reset, …).
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The live channel could not be opened.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The relay returned a non-2xx status code.
    #[error("api error: status {status}, body: {body}")]
    Api { status: StatusCode, body: String },

    /// Response body could not be deserialized.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The base URL could not be joined with the endpoint path.
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
}
