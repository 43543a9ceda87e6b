#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

//! Shared types and the live event listener for Spyglass.
//!
//! The listener half ([`listener::SpyListener`]) is always available and
//! can be fed by hand through a [`listener::FrameSender`]. The
//! websocket and HTTP transports live behind the `client` feature.

#[cfg(feature = "client")]
pub mod client;
pub mod env;
pub mod listener;
pub mod objects;
pub mod service_key;

pub use listener::{
    FrameSender, ListenerConfig, ListenerError, SpyEvent, SpyListener, WaitError, WaitExpression,
    WaitOptions, WaitState,
};
pub use service_key::{FunctionPhase, ServiceKey, ServiceKind};
