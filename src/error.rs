use thiserror::Error;

#[derive(Error, Debug)]
pub enum GateLensError {
    #[error("status endpoint did not return a JSON mapping")]
    BadStatusDocument,

    #[error("invalid review: {0}")]
    InvalidReview(String),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("git error: {0}")]
    Git(#[from] git2::Error),

    #[error("invalid glob pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GateLensError>;
