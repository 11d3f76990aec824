//! Server configuration, read from an optional JSON file.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use webshell_core::config::{MonitorConfig, PoolConfig, TerminalConfig};

/// Top-level server configuration. Every field is optional in the file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Listen address, `host:port`.
    #[serde(default = "default_bind")]
    pub bind: String,
    /// JSON file holding the connection records.
    #[serde(default = "default_connections_file")]
    pub connections_file: PathBuf,
    /// Request body limit for uploads, in megabytes.
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: usize,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub monitor: MonitorConfig,
    #[serde(default)]
    pub terminal: TerminalConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            connections_file: default_connections_file(),
            max_upload_mb: default_max_upload_mb(),
            pool: PoolConfig::default(),
            monitor: MonitorConfig::default(),
            terminal: TerminalConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Read and parse `path`. Unlike the connection store, a broken config
    /// file is a startup error.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }
}

// --- Default value functions ---

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_connections_file() -> PathBuf {
    PathBuf::from("connections.json")
}

fn default_max_upload_mb() -> usize {
    100
}
