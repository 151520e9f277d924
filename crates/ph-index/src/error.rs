use ph_core::error::CoreError;
use ph_core::model::EnvironmentId;

#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("Index for environment {environment} has not been built (run `ph --reindex`)")]
    Unavailable { environment: EnvironmentId },

    #[error("Environment {environment} has no indexed commands")]
    EmptyEnvironment { environment: EnvironmentId },

    #[error("Vector has {actual} dimensions, index expects {expected}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("Index worker stopped")]
    WorkerStopped,

    #[error("Answer composition failed: {0}")]
    Compose(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
