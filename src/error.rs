use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum HarvestError {
    #[error("invalid geoid: {0}")]
    InvalidGeoid(String),

    #[error("invalid geography level: {0}")]
    InvalidLevel(String),

    #[error("cannot determine parent state for {level} {geoid}")]
    MissingParentState { geoid: String, level: String },

    #[error("duplicate entity in reference data: {0}")]
    DuplicateEntity(String),

    #[error("request failed: {0}")]
    Http(String),

    #[error("{url} returned status {status}: {message}")]
    HttpStatus {
        url: String,
        status: u16,
        message: String,
    },

    #[error("malformed search response: {0}")]
    MalformedResponse(String),

    #[error("batch of {0} geographies exceeds the limit of 6")]
    BatchTooLarge(usize),

    #[error("batch must contain at least one geography")]
    EmptyBatch,

    #[error("invalid storage key: {0}")]
    InvalidKey(String),

    #[error("object not found in storage: {0}")]
    ObjectNotFound(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("invalid config value: {0}")]
    ConfigValue(String),

    #[error("failed to load reference entities: {0}")]
    Reference(String),

    #[error("worker pool failed: {0}")]
    Worker(String),
}

impl HarvestError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, HarvestError::Http(_) | HarvestError::HttpStatus { .. })
    }
}
