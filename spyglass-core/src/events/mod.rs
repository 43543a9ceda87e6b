//! Relay event flow.
//!
//! # Event Flow
//!
//! 1. An HTTP handler receives a `ForwardedEvent` for one endpoint and
//!    hands it to the `Forwarder` as a [`Forward`].
//! 2. The `Forwarder` resolves the service key and publishes a
//!    `SpyEnvelope` on the envelope broadcast channel.
//! 3. Every websocket session subscribed to the channel writes the
//!    envelope out as one text frame.
//!
//! Envelopes are ephemeral: a session that lags behind loses the oldest
//! ones and nothing is persisted.

pub mod channels;

pub use channels::{
    DEFAULT_CHANNEL_BUFFER, EnvelopeReceiver, EnvelopeSender, envelope_channel,
};

use spyglass_sdk::objects::ForwardedEvent;

/// One forwarded event addressed to a forwarding endpoint.
#[derive(Debug, Clone)]
pub struct Forward {
    /// Function name of the endpoint the event was posted to.
    pub endpoint: String,
    pub event: ForwardedEvent,
}
