use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::environment::EnvironmentId;
use crate::error::CoreError;

/// Identifier of a record: `<environment-id>-<seq>`, seq zero-padded to six digits.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub String);

impl RecordId {
    pub fn new(environment: &EnvironmentId, seq: u64) -> Self {
        Self(format!("{}-{seq:06}", environment.as_str()))
    }

    /// Split into the owning environment and the sequence number.
    pub fn parts(&self) -> Result<(EnvironmentId, u64), CoreError> {
        let (env, seq) = self
            .0
            .rsplit_once('-')
            .ok_or_else(|| CoreError::InvalidId(format!("malformed record ID '{}'", self.0)))?;
        let seq = seq
            .parse::<u64>()
            .map_err(|_| CoreError::InvalidId(format!("malformed record ID '{}'", self.0)))?;
        Ok((EnvironmentId::parse(env)?, seq))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RecordId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// One captured terminal command. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandRecord {
    pub id: RecordId,
    pub seq: u64,
    pub command: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    pub cwd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub captured_at: DateTime<Utc>,
}

/// The caller-supplied part of a record; the store assigns id, seq and timestamp.
#[derive(Debug, Clone, Default)]
pub struct RecordDraft {
    pub command: String,
    pub output: Option<String>,
    pub cwd: PathBuf,
    pub exit_code: Option<i32>,
    pub duration_ms: Option<u64>,
}

impl RecordDraft {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            ..Default::default()
        }
    }

    pub fn exit_code(mut self, code: i32) -> Self {
        self.exit_code = Some(code);
        self
    }

    pub fn output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn duration_ms(mut self, ms: u64) -> Self {
        self.duration_ms = Some(ms);
        self
    }
}
