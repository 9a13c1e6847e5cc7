//! Error types for dify-bridge

use thiserror::Error;

/// Main error type for dify-bridge operations
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Credential bootstrap errors (config URL, user info, app info)
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Proxy/HTTP errors
    #[error("Proxy error: {0}")]
    Proxy(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for dify-bridge operations
pub type Result<T> = std::result::Result<T, BridgeError>;
