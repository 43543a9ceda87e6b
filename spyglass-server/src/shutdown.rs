//! Signal handling for graceful shutdown and routing reload.

use crate::config::{ConfigLoader, LoadedConfig};
use crate::state::AppState;
use std::sync::Arc;
use tokio::signal::unix::{SignalKind, signal};
use tokio::sync::Notify;

/// Creates a future that completes when a shutdown signal is received.
///
/// Listens for SIGTERM and SIGINT (Ctrl+C). If the handlers cannot be
/// installed, falls back to Ctrl+C alone.
pub async fn shutdown_signal() {
    let (mut sigterm, mut sigint) =
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to install signal handlers, waiting for Ctrl+C");
                if let Err(e) = tokio::signal::ctrl_c().await {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                    std::future::pending::<()>().await;
                }
                return;
            }
        };

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM, initiating graceful shutdown");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT, initiating graceful shutdown");
        }
    }
}

/// Swap in the reloaded routing document and return its version.
///
/// Server settings are fixed for the life of the process; a change is
/// reported and otherwise ignored.
pub async fn apply_reload(state: &AppState, loaded_config: LoadedConfig) -> u64 {
    if state.config.server.requires_restart(&loaded_config.server) {
        tracing::warn!(
            listen = %loaded_config.server.listen,
            channel_buffer = loaded_config.server.channel_buffer,
            "Server settings changed; restart to apply them"
        );
    }
    let endpoints = loaded_config.routing.len();
    let version = state.config.routing.replace(loaded_config.routing).await;
    tracing::info!(version, endpoints, "Configuration reloaded successfully");
    version
}

/// Spawns a task that listens for SIGHUP and reloads the configuration.
///
/// The routing document is swapped atomically; envelopes already in
/// flight keep the key they were resolved with.
///
/// Returns a Notify that can be used to signal when shutdown is complete.
pub fn spawn_config_reload_handler(state: AppState, config_loader: Arc<ConfigLoader>) -> Arc<Notify> {
    let shutdown_notify = Arc::new(Notify::new());
    let shutdown_notify_clone = shutdown_notify.clone();

    tokio::spawn(async move {
        let mut sighup = match signal(SignalKind::hangup()) {
            Ok(sighup) => sighup,
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGHUP handler, reload disabled");
                return;
            }
        };

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    tracing::info!("Received SIGHUP, reloading configuration");
                    match config_loader.reload() {
                        Ok(loaded_config) => {
                            apply_reload(&state, loaded_config).await;
                        }
                        Err(e) => {
                            tracing::error!("Failed to reload configuration: {}", e);
                        }
                    }
                }
                _ = shutdown_notify_clone.notified() => {
                    tracing::debug!("Config reload handler shutting down");
                    break;
                }
            }
        }
    });

    shutdown_notify
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use spyglass_core::config::{RoutingStore, ServerConfig, SharedConfig};
    use spyglass_core::pool::RoutingDocument;
    use tokio::sync::watch;

    fn server(listen: &str) -> ServerConfig {
        ServerConfig {
            listen: listen.parse().unwrap(),
            channel_buffer: 16,
            routing_file: "routing.json".into(),
        }
    }

    fn routing(identity: &str) -> RoutingDocument {
        serde_json::from_value(json!({
            "endpoints": { "SpyglassSubscription0": {identity: "Table#Orders"} }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn test_reload_swaps_routing_but_keeps_server_settings() {
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let config = SharedConfig::new(
            server("127.0.0.1:8080"),
            RoutingStore::new(routing("arn:table/Old")),
        );
        let state = AppState::new(config, 16, shutdown_rx);

        let reloaded = LoadedConfig {
            server: server("127.0.0.1:9090"),
            routing: routing("arn:table/Orders"),
        };
        assert_eq!(apply_reload(&state, reloaded).await, 1);

        assert_eq!(state.config.routing.version(), 1);
        assert_eq!(state.config.server.listen.port(), 8080);
        assert!(
            state
                .config
                .routing
                .resolve(
                    "SpyglassSubscription0",
                    &spyglass_sdk::objects::ForwardedEvent::Resource {
                        source: "arn:table/Orders".to_owned(),
                        data: json!({}),
                    },
                )
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_restart_needed_only_for_listen_or_buffer() {
        let running = server("127.0.0.1:8080");
        let mut moved = running.clone();
        moved.routing_file = "other.json".into();
        assert!(!running.requires_restart(&moved));
        moved.channel_buffer = 32;
        assert!(running.requires_restart(&moved));
    }
}
