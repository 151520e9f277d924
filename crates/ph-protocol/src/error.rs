use ph_core::error::CoreError;
use ph_core::model::EnvironmentId;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("Git operation failed: {0}")]
    GitOperation(String),

    #[error("Nothing to commit: environment {environment} has no new commands since its last snapshot")]
    NothingToCommit { environment: EnvironmentId },

    #[error("Remote {remote} unavailable: {reason}")]
    RemoteUnavailable { remote: String, reason: String },

    #[error("No environment snapshot found in {remote}")]
    NoEnvironmentFound { remote: String },

    #[error("Fetch cancelled")]
    Cancelled,

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ProtocolError {
    /// Only remote availability failures are worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProtocolError::RemoteUnavailable { .. })
    }
}
