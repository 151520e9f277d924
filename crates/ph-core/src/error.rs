use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Not found: {id}")]
    NotFound { id: String },

    #[error("Invalid record: {0}")]
    Validation(String),

    #[error("No active environment (run `ph --env <path>` first)")]
    NoActiveEnvironment,

    #[error("Environment source not found: {0}")]
    SourceNotFound(String),

    #[error("Environment {id} is corrupt: {reason}")]
    CorruptEnvironment { id: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Pending writes could not be flushed: {0}")]
    Flush(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid ID: {0}")]
    InvalidId(String),
}
