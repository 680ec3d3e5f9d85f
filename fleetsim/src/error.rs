use thiserror::Error;

/// Errors surfaced by the simulator library.
///
/// Only `IllegalState` is fatal at bootstrap; the delivery paths log and absorb
/// the other variants.
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Illegal state: {0}")]
    IllegalState(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Unexpected status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },
    #[error("Invalid URL: {0}")]
    Url(String),
    #[error("Streaming channel error: {0}")]
    Stream(String),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SimResult<T> = Result<T, SimError>;
