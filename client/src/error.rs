use thiserror::Error;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Agent request failed: {0}")]
    Agent(String),

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },
}

pub type ClientResult<T> = Result<T, ClientError>;
