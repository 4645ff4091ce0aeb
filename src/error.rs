use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, FilterError>;

#[derive(Error, Debug)]
pub enum FilterError {
    #[error("Invalid MAC address '{0}': expected six hex byte pairs, e.g. AA:BB:CC:DD:EE:FF")]
    InvalidMac(String),

    #[error("Invalid interface name '{0}'")]
    InvalidInterface(String),

    #[error("Invalid VLAN id {0}: must be between 1 and 4094")]
    InvalidVlan(u16),

    #[error("Missing required parameter: {0}")]
    MissingParameter(String),

    #[error("Config error in {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("Cannot read {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Packet filter binary '{0}' not found")]
    EngineNotFound(String),

    #[error("'{command}' failed ({status}): {stderr}")]
    Engine {
        command: String,
        status: String,
        stderr: String,
    },

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("System error: {0}")]
    SystemError(String),

    #[error("History encoding error: {0}")]
    History(#[from] serde_json::Error),
}

impl From<std::io::Error> for FilterError {
    fn from(err: std::io::Error) -> Self {
        FilterError::SystemError(err.to_string())
    }
}

impl From<tempfile::PersistError> for FilterError {
    fn from(err: tempfile::PersistError) -> Self {
        FilterError::SystemError(format!("Failed to persist file: {}", err.error))
    }
}
