//! TOML file configuration structures.
//!
//! These structs directly map to the `spyglass-config.toml` file format.

use serde::{Deserialize, Serialize};
use spyglass_core::events::DEFAULT_CHANNEL_BUFFER;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;

/// Root configuration structure as read from the TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    pub routing: RoutingConfig,
}

/// Server configuration section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// The address and port to listen on (e.g., "0.0.0.0:8080").
    #[serde(default = "default_listen_addr")]
    pub listen: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from((Ipv4Addr::LOCALHOST, 8080))
}

/// Live channel section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelConfig {
    /// Envelopes buffered per session before a slow session skips ahead.
    #[serde(default = "default_channel_buffer")]
    pub buffer: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            buffer: default_channel_buffer(),
        }
    }
}

fn default_channel_buffer() -> usize {
    DEFAULT_CHANNEL_BUFFER
}

/// Routing section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingConfig {
    /// Routing document written by `spyglass instrument`. Relative paths
    /// are resolved against the config file's directory.
    pub file: PathBuf,
}
