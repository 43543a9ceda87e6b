//! Configuration module for the relay.
//!
//! Handles loading configuration from TOML files and CLI arguments, and
//! reading the routing document the configuration points at.

pub mod file;

use crate::config::file::FileConfig;
use spyglass_core::config::{RoutingStore, ServerConfig, SharedConfig};
use spyglass_core::pool::RoutingDocument;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("failed to read routing document {path:?}: {source}")]
    RoutingIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse routing document {path:?}: {source}")]
    RoutingParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("validation error: {0}")]
    ValidationError(String),
}

/// Loaded configuration result containing all parts.
pub struct LoadedConfig {
    pub server: ServerConfig,
    pub routing: RoutingDocument,
}

impl LoadedConfig {
    /// Convert into a SharedConfig; routing goes into a reloadable store.
    pub fn into_shared(self) -> SharedConfig {
        SharedConfig::new(self.server, RoutingStore::new(self.routing))
    }
}

/// Configuration loader that handles the complete loading process.
pub struct ConfigLoader {
    config_path: PathBuf,
    listen_override: Option<SocketAddr>,
}

impl ConfigLoader {
    /// Create a new config loader.
    pub fn new(config_path: impl AsRef<Path>, listen_override: Option<SocketAddr>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            listen_override,
        }
    }

    /// Load and process the configuration.
    ///
    /// This will:
    /// 1. Read the TOML file
    /// 2. Apply CLI overrides
    /// 3. Validate the configuration
    /// 4. Read the routing document it names
    pub fn load(&self) -> Result<LoadedConfig, ConfigError> {
        let config_content = std::fs::read_to_string(&self.config_path)?;
        let mut file_config: FileConfig = toml::from_str(&config_content)?;

        if let Some(listen) = self.listen_override {
            file_config.server.listen = listen;
        }

        self.validate(&file_config)?;

        let routing_file = self.resolve_relative(&file_config.routing.file);
        let routing = load_routing_document(&routing_file)?;
        tracing::info!(
            path = ?routing_file,
            endpoints = routing.len(),
            "Routing document loaded"
        );

        Ok(LoadedConfig {
            server: ServerConfig {
                listen: file_config.server.listen,
                channel_buffer: file_config.channel.buffer,
                routing_file,
            },
            routing,
        })
    }

    /// Reload the configuration (used during SIGHUP).
    pub fn reload(&self) -> Result<LoadedConfig, ConfigError> {
        self.load()
    }

    fn validate(&self, config: &FileConfig) -> Result<(), ConfigError> {
        if config.channel.buffer == 0 {
            return Err(ConfigError::ValidationError(
                "channel buffer must be at least 1".to_owned(),
            ));
        }
        if config.routing.file.as_os_str().is_empty() {
            return Err(ConfigError::ValidationError(
                "routing file must not be empty".to_owned(),
            ));
        }
        Ok(())
    }

    fn resolve_relative(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            return path.to_path_buf();
        }
        match self.config_path.parent() {
            Some(dir) => dir.join(path),
            None => path.to_path_buf(),
        }
    }
}

/// Read a routing document (endpoint tables and observed functions) from JSON.
pub fn load_routing_document(path: &Path) -> Result<RoutingDocument, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::RoutingIo {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_str(&content).map_err(|source| ConfigError::RoutingParse {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fresh scratch directory under the system temp dir.
    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "spyglass-config-{}-{name}",
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_load_resolves_routing_next_to_config() {
        let dir = scratch("load");
        std::fs::write(
            dir.join("routing.json"),
            r#"{"endpoints":{"SpyglassSubscription0":{"arn:table/T":"Table#T"}},"functions":["F"]}"#,
        )
        .unwrap();
        std::fs::write(
            dir.join("spyglass-config.toml"),
            "[channel]\nbuffer = 8\n\n[routing]\nfile = \"routing.json\"\n",
        )
        .unwrap();

        let override_addr: SocketAddr = "127.0.0.1:4000".parse().unwrap();
        let loaded = ConfigLoader::new(dir.join("spyglass-config.toml"), Some(override_addr))
            .load()
            .unwrap();
        assert_eq!(loaded.server.listen, override_addr);
        assert_eq!(loaded.server.channel_buffer, 8);
        assert_eq!(loaded.server.routing_file, dir.join("routing.json"));
        assert_eq!(loaded.routing.len(), 1);
        assert!(loaded.routing.table("SpyglassSubscription0").is_some());
        assert!(loaded.routing.knows_function("F"));
    }

    #[test]
    fn test_zero_buffer_is_rejected() {
        let dir = scratch("zero");
        std::fs::write(
            dir.join("spyglass-config.toml"),
            "[channel]\nbuffer = 0\n\n[routing]\nfile = \"routing.json\"\n",
        )
        .unwrap();
        let err = ConfigLoader::new(dir.join("spyglass-config.toml"), None)
            .load()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::ValidationError(_)));
    }

    #[test]
    fn test_missing_routing_document_names_the_path() {
        let dir = scratch("missing");
        std::fs::write(
            dir.join("spyglass-config.toml"),
            "[routing]\nfile = \"nowhere.json\"\n",
        )
        .unwrap();
        let err = ConfigLoader::new(dir.join("spyglass-config.toml"), None)
            .load()
            .err()
            .unwrap();
        assert!(matches!(err, ConfigError::RoutingIo { ref path, .. } if path.ends_with("nowhere.json")));
    }
}
