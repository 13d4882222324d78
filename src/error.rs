use thiserror::Error;

#[derive(Error, Debug)]
pub enum ComLensError {
    #[error("API request failed with status {status}: {message}")]
    Api { status: u16, message: String },

    #[error("API request still failing with status {status} after {attempts} attempts")]
    ApiAfterRetries { status: u16, attempts: u32 },

    #[error("GraphQL query returned errors: {0}")]
    GraphQL(String),

    #[error("GraphQL response contained no data")]
    NoResponseData,

    #[error("Unexpected response payload: {0}")]
    Validation(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ComLensError>;
