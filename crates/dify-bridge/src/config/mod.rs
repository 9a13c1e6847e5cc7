use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{BridgeError, Result};

/// Main configuration structure for dify-bridge
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Inbound HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,
    /// Portal backend configuration
    #[serde(default)]
    pub backend: BackendConfig,
}

impl Config {
    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            BridgeError::Config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        toml::from_str(&content)
            .map_err(|e| BridgeError::Config(format!("Failed to parse config: {e}")))
    }

    /// Load from an explicit path, else the first default location that
    /// exists, else defaults
    pub fn load(config_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = config_path {
            tracing::info!("Loading config from: {}", path.display());
            return Self::from_file(path);
        }

        for path in default_config_paths().iter().flatten() {
            if path.exists() {
                tracing::info!("Loading config from: {}", path.display());
                return Self::from_file(path);
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Config::default())
    }
}

fn default_config_paths() -> [Option<PathBuf>; 3] {
    [
        dirs::home_dir().map(|h| h.join(".dify-bridge").join("config.toml")),
        dirs::config_dir().map(|c| c.join("dify-bridge").join("config.toml")),
        Some(PathBuf::from("config.toml")),
    ]
}

/// Inbound HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on (e.g., "0.0.0.0:5000")
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    /// Request header carrying the caller's session key
    #[serde(default = "default_session_header")]
    pub session_header: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            session_header: default_session_header(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:5000".to_string()
}

fn default_session_header() -> String {
    "x-session-id".to_string()
}

/// Portal backend configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
    /// Portal origin; API paths are appended to it
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Portal config URL carrying `userToken` and `appId`
    #[serde(default)]
    pub config_url: Option<String>,
    /// User-Agent presented to the portal
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Delete the backend conversation after every turn
    #[serde(default = "default_auto_delete_conversations")]
    pub auto_delete_conversations: bool,
    /// TCP connect timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Maximum wait for response headers or the next body chunk, in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            config_url: None,
            user_agent: default_user_agent(),
            auto_delete_conversations: default_auto_delete_conversations(),
            connect_timeout_secs: default_connect_timeout_secs(),
            idle_timeout_secs: default_idle_timeout_secs(),
        }
    }
}

fn default_base_url() -> String {
    "https://agi.chd.edu.cn".to_string()
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) \
     Chrome/138.0.0.0 Safari/537.36 Edg/138.0.0.0"
        .to_string()
}

fn default_auto_delete_conversations() -> bool {
    true
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_idle_timeout_secs() -> u64 {
    300
}
