//! Envelope channel factory and handles.

use spyglass_sdk::objects::SpyEnvelope;
use tokio::sync::broadcast;

/// Default buffer size for the envelope channel.
///
/// Sessions that fall further behind than this skip ahead.
pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

/// Sender handle for published envelopes.
pub type EnvelopeSender = broadcast::Sender<SpyEnvelope>;
/// Receiver handle for published envelopes. One per live session.
pub type EnvelopeReceiver = broadcast::Receiver<SpyEnvelope>;

/// Create a new envelope broadcast channel.
///
/// Receivers are created with [`broadcast::Sender::subscribe`]; the
/// returned receiver can be dropped when sessions subscribe on their own.
pub fn envelope_channel(capacity: usize) -> (EnvelopeSender, EnvelopeReceiver) {
    broadcast::channel(capacity.max(1))
}
