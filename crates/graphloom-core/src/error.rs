use thiserror::Error;

/// Top-level error type shared by the graphloom crates.
#[derive(Error, Debug)]
pub enum GraphloomError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<config::ConfigError> for GraphloomError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
