use graphsync::errors::SyncError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OtisFetcherError {
    #[error("invalid parameter: {0}")]
    InvalidParam(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, OtisFetcherError>;

impl From<OtisFetcherError> for SyncError {
    fn from(err: OtisFetcherError) -> Self {
        SyncError::Fetch(err.to_string())
    }
}
