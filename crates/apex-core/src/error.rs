use thiserror::Error;

pub type Result<T> = std::result::Result<T, ApexError>;

#[derive(Error, Debug)]
pub enum ApexError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to load config from {path}: {source}")]
    ConfigLoadFailed {
        path: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid configuration: {issue} ({suggestion})")]
    ConfigInvalid { issue: String, suggestion: String },

    #[error("Transport error: {message}")]
    Transport { message: String },

    #[error("Telemetry error: {message}")]
    Telemetry { message: String },
}
