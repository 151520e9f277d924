use std::fs;

use chrono::{DateTime, Utc};

use super::layout::{write_atomic, DataDir};
use crate::error::CoreError;
use crate::model::EnvironmentId;

/// The data directory's record of which environment is active.
///
/// Format: `"<env-id> <rfc3339-timestamp>"`. Replaced with a rename, so
/// readers see either the old or the new pointer, never a mix.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivePointer {
    pub environment: EnvironmentId,
    pub since: DateTime<Utc>,
}

impl ActivePointer {
    pub fn new(environment: EnvironmentId) -> Self {
        Self {
            environment,
            since: Utc::now(),
        }
    }

    /// Read the pointer. A missing or malformed file means no environment.
    pub fn read(data: &DataDir) -> Option<Self> {
        let content = fs::read_to_string(data.pointer_path()).ok()?;
        let mut parts = content.split_whitespace();
        let environment = EnvironmentId::parse(parts.next()?).ok()?;
        let since = parts
            .next()
            .and_then(|ts| ts.parse::<DateTime<Utc>>().ok())
            .unwrap_or_else(Utc::now);
        Some(Self { environment, since })
    }

    pub fn write(&self, data: &DataDir) -> Result<(), CoreError> {
        let content = format!("{} {}\n", self.environment, self.since.to_rfc3339());
        write_atomic(&data.pointer_path(), content.as_bytes())
    }

    pub fn clear(data: &DataDir) -> Result<(), CoreError> {
        match fs::remove_file(data.pointer_path()) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
