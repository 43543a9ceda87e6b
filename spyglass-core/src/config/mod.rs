//! Configuration types for the Spyglass relay.
//!
//! These types represent the validated runtime configuration. The actual
//! config loading/parsing is handled by the server crate.

mod routing_store;
mod server;

pub use routing_store::{RouteError, RoutingStore};
pub use server::ServerConfig;

use std::sync::Arc;

/// Shared configuration state.
///
/// Routing is reloadable at run time. The server section is what the
/// process was started with; changing it takes a restart.
#[derive(Clone)]
pub struct SharedConfig {
    pub server: Arc<ServerConfig>,
    pub routing: RoutingStore,
}

impl SharedConfig {
    pub fn new(server: ServerConfig, routing: RoutingStore) -> Self {
        Self {
            server: Arc::new(server),
            routing,
        }
    }
}
