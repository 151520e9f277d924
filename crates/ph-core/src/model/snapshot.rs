use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::environment::EnvironmentId;

/// A git commit that serialized an environment's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitSnapshot {
    pub commit: String,
    pub environment: EnvironmentId,
    pub first_seq: u64,
    pub last_seq: u64,
    pub message: String,
    pub created_at: DateTime<Utc>,
    /// Previous commit on the branch; `None` when this is the root commit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl CommitSnapshot {
    pub fn record_count(&self) -> u64 {
        self.last_seq + 1 - self.first_seq
    }
}
