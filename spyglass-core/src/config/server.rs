//! Relay server configuration.

use std::net::SocketAddr;
use std::path::PathBuf;

/// Relay configuration with runtime values.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The address and port to listen on.
    pub listen: SocketAddr,
    /// Envelope broadcast buffer per live session.
    pub channel_buffer: usize,
    /// Routing document produced by `spyglass instrument`.
    pub routing_file: PathBuf,
}

impl ServerConfig {
    /// Whether moving from `self` to `next` needs a process restart.
    pub fn requires_restart(&self, next: &ServerConfig) -> bool {
        self.listen != next.listen || self.channel_buffer != next.channel_buffer
    }
}
