//! Heliograph configuration
//!
//! Configuration comes from:
//! 1. Environment variables (HG_NODE, HG_SOCKET_DIR)
//! 2. Attach handshake with the gateway (Attached.config)

use std::collections::HashMap;
use std::path::PathBuf;

/// Heliograph configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Node name, used for the socket file name
    pub node_name: String,
    /// Socket directory
    pub socket_dir: PathBuf,
    /// PostgreSQL connection string (from Attached.config)
    pub database_url: Option<String>,
    /// Secret for verifying bearer tokens (from Attached.config)
    pub token_secret: Option<String>,
}

impl Config {
    /// Create config from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let node_name = std::env::var("HG_NODE").map_err(|_| ConfigError::MissingEnv("HG_NODE"))?;

        let socket_dir = std::env::var("HG_SOCKET_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_socket_dir());

        Ok(Self {
            node_name,
            socket_dir,
            database_url: None,
            token_secret: None,
        })
    }

    /// Apply configuration from the Attached handshake response
    pub fn apply_attach_config(&mut self, config: &HashMap<String, String>) {
        if let Some(url) = config.get("database_url") {
            self.database_url = Some(url.clone());
        }

        if let Some(secret) = config.get("token_secret")
            && !secret.is_empty()
        {
            self.token_secret = Some(secret.clone());
        }
    }

    /// Get the Unix socket path
    pub fn socket_path(&self) -> PathBuf {
        self.socket_dir.join(format!("{}.sock", self.node_name))
    }
}

/// Get default socket directory
fn default_socket_dir() -> PathBuf {
    std::env::var("XDG_RUNTIME_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| std::env::temp_dir())
        .join("heliograph")
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    MissingEnv(&'static str),
    #[error("missing required config key: {0}")]
    MissingKey(&'static str),
}
