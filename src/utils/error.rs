use crate::store::StoreError;
use config::ConfigError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Logging error: {0}")]
    LoggingError(String),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Database error: {0}")]
    DatabaseError(#[from] StoreError),
    #[error("Network error: {0}")]
    NetworkError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("API error: {0}")]
    ApiError(String),
    #[error("JSON parse error: {0}")]
    JsonParseError(String),
    #[error("Task error: {0}")]
    TaskError(String),
}

pub type AppResult<T> = Result<T, AppError>;
