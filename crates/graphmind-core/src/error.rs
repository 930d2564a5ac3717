use thiserror::Error;

/// Top-level error type for the GraphMind core.
#[derive(Error, Debug)]
pub enum GraphmindError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid namespace: {0}")]
    InvalidNamespace(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<config::ConfigError> for GraphmindError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}
