use thiserror::Error;

#[derive(Error, Debug)]
pub enum CartwatchError {
    #[error("CDP connection failed: {0}")]
    CdpConnectionFailed(String),

    #[error("Catalog page not found. Open a tab on {0} first.")]
    PageNotFound(String),

    #[error("Element not found: {0}")]
    ElementNotFound(String),

    #[error("JavaScript execution failed: {0}")]
    JavaScriptError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Status bridge error: {0}")]
    BridgeError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, CartwatchError>;
