use std::fs::{File, OpenOptions};

use ph_core::model::EnvironmentId;
use ph_core::storage::DataDir;

use crate::error::ProtocolError;

/// Exclusive, non-blocking lock held for the duration of a git operation.
///
/// A second operation on the same key is rejected rather than queued.
pub struct GitLock {
    file: File,
    key: String,
}

impl GitLock {
    pub fn acquire(data: &DataDir, key: &str) -> Result<Self, ProtocolError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(data.lock_path(key))?;
        fs2::FileExt::try_lock_exclusive(&file).map_err(|_| {
            ProtocolError::GitOperation(format!(
                "another git operation is in progress for {key}"
            ))
        })?;
        tracing::debug!(key, "acquired git lock");
        Ok(Self {
            file,
            key: key.to_string(),
        })
    }
}

impl Drop for GitLock {
    fn drop(&mut self) {
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            tracing::warn!(key = %self.key, "failed to release git lock: {e}");
        }
    }
}

/// Lock key shared by every git operation on one environment.
pub fn env_lock_key(id: &EnvironmentId) -> String {
    format!("env-{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_overlapping_lock_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let data = DataDir::open(tmp.path()).unwrap();

        let held = GitLock::acquire(&data, "env-ab").unwrap();
        assert!(matches!(
            GitLock::acquire(&data, "env-ab"),
            Err(ProtocolError::GitOperation(_))
        ));
        // Other keys are independent.
        let _other = GitLock::acquire(&data, "env-cd").unwrap();

        drop(held);
        assert!(GitLock::acquire(&data, "env-ab").is_ok());
    }
}
