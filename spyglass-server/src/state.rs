//! Application state shared across all request handlers.

use spyglass_core::config::SharedConfig;
use spyglass_core::events::{EnvelopeSender, envelope_channel};
use spyglass_core::processors::Forwarder;
use tokio::sync::watch;

/// Application state that is shared across all request handlers.
///
/// This is cloneable and cheap to pass around (everything is behind Arc).
#[derive(Clone)]
pub struct AppState {
    /// Runtime configuration (routing can be reloaded via SIGHUP).
    pub config: SharedConfig,
    /// Resolves and publishes forwarded events.
    pub forwarder: Forwarder,
    /// Live channel; every websocket session subscribes to it.
    pub envelopes: EnvelopeSender,
    /// Flips to `true` when the server starts shutting down.
    pub shutdown: watch::Receiver<bool>,
}

impl AppState {
    /// Create a new AppState with a fresh envelope channel.
    pub fn new(config: SharedConfig, channel_buffer: usize, shutdown: watch::Receiver<bool>) -> Self {
        let (envelopes, _) = envelope_channel(channel_buffer);
        let forwarder = Forwarder::new(config.routing.clone(), envelopes.clone());
        Self {
            config,
            forwarder,
            envelopes,
            shutdown,
        }
    }
}
