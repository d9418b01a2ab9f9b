use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request to store failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("store returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode store response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("{0} not found")]
    NotFound(String),

    /// Conditional write lost; carries the value currently stored
    #[error("record changed remotely")]
    Conflict { current: Vec<String> },

    #[error("invalid cursor: {0}")]
    InvalidCursor(String),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
