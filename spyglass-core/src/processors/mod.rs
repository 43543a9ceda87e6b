//! Event processors of the relay.
//!
//! - `Forwarder`: Receives `Forward`, publishes `SpyEnvelope`

pub mod forwarder;

pub use forwarder::Forwarder;
