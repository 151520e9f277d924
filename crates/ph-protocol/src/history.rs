use std::fs;

use ph_core::model::{CommitSnapshot, EnvironmentId};
use ph_core::storage::layout::write_atomic;
use ph_core::storage::DataDir;

use crate::error::ProtocolError;

/// Snapshot history of an environment, oldest first.
/// Stored as `envs/<id>/snapshots.json`.
#[derive(Debug, Clone, Default)]
pub struct SnapshotHistory {
    pub snapshots: Vec<CommitSnapshot>,
}

impl SnapshotHistory {
    pub fn load(data: &DataDir, environment: &EnvironmentId) -> Result<Self, ProtocolError> {
        let path = data.snapshots_path(environment);
        let snapshots = match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { snapshots })
    }

    pub fn save(&self, data: &DataDir, environment: &EnvironmentId) -> Result<(), ProtocolError> {
        let json = serde_json::to_vec_pretty(&self.snapshots)?;
        write_atomic(&data.snapshots_path(environment), &json)?;
        Ok(())
    }

    pub fn latest(&self) -> Option<&CommitSnapshot> {
        self.snapshots.last()
    }

    /// Sequence number covered by the latest snapshot, 0 if none.
    pub fn last_seq(&self) -> u64 {
        self.latest().map(|s| s.last_seq).unwrap_or(0)
    }

    pub fn push(&mut self, snapshot: CommitSnapshot) {
        self.snapshots.push(snapshot);
    }
}
