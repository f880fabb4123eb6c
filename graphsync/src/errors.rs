use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("SQLite operation failed: {0}")]
    SQLite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// A hierarchy level the mapper walks through is missing from the graph.
    #[error("Mapping hierarchy level '{level}' named '{name}' not found")]
    MappingNotFound { level: &'static str, name: String },

    #[error("No mapping for natural key '{0}'")]
    MappingMiss(String),

    #[error("Upsert failed for '{key}': {reason}")]
    Upsert { key: String, reason: String },

    #[error("Fetch failed: {0}")]
    Fetch(String),

    #[error("Cycle timed out after {0} ms")]
    Timeout(u64),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SyncError {
    pub fn upsert(key: impl Into<String>, reason: impl ToString) -> Self {
        SyncError::Upsert {
            key: key.into(),
            reason: reason.to_string(),
        }
    }

    /// Errors that make a whole sync epoch unusable rather than a single record.
    pub fn is_fatal_for_epoch(&self) -> bool {
        matches!(self, SyncError::MappingNotFound { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
