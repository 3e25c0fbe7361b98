use thiserror::Error;

pub type TargetingResult<T> = Result<T, TargetingError>;

#[derive(Error, Debug)]
pub enum TargetingError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid condition configuration: {0}")]
    InvalidCondition(String),

    #[error("Unknown condition type: {0}")]
    UnknownCondition(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<config::ConfigError> for TargetingError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
