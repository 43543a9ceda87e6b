#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![forbid(unsafe_code)]

pub mod config;
pub mod constants;
pub mod events;
pub mod instrument;
pub mod pool;
pub mod processors;
pub mod registry;
pub mod topology;
