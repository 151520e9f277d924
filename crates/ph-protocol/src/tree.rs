use git2::{Commit, ObjectType, Repository, Tree};
use serde::{Deserialize, Serialize};

use ph_core::model::{CommandRecord, CommitSnapshot, Environment, EnvironmentId};

use crate::error::ProtocolError;

/// Directory at the repository root that holds environment snapshots.
pub const SNAPSHOT_ROOT: &str = ".ph";

/// Commit message trailer naming the environment a commit snapshots.
pub const ENVIRONMENT_TRAILER: &str = "Ph-Environment";

const MANIFEST_VERSION: u32 = 1;

/// Describes the environment serialized under `.ph/<id>/`.
///
/// Tree layout:
///   .ph/<id>/manifest.json
///   .ph/<id>/chunks/<first_seq>-<last_seq>.jsonl   (one per snapshot)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SnapshotManifest {
    pub version: u32,
    pub environment: Environment,
    pub last_seq: u64,
    /// Snapshots preceding the commit that carries this manifest.
    #[serde(default)]
    pub history: Vec<CommitSnapshot>,
}

impl SnapshotManifest {
    pub fn new(environment: Environment, last_seq: u64, history: Vec<CommitSnapshot>) -> Self {
        Self {
            version: MANIFEST_VERSION,
            environment,
            last_seq,
            history,
        }
    }
}

pub fn env_root(id: &EnvironmentId) -> String {
    format!("{SNAPSHOT_ROOT}/{id}")
}

pub fn manifest_path(id: &EnvironmentId) -> String {
    format!("{}/manifest.json", env_root(id))
}

pub fn chunk_path(id: &EnvironmentId, first_seq: u64, last_seq: u64) -> String {
    format!("{}/chunks/{first_seq:06}-{last_seq:06}.jsonl", env_root(id))
}

pub fn chunk_bytes(records: &[CommandRecord]) -> Result<Vec<u8>, ProtocolError> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// Full commit message: the user's summary plus the environment trailers.
pub fn commit_message(message: &str, id: &EnvironmentId, first_seq: u64, last_seq: u64) -> String {
    format!(
        "{}\n\n{ENVIRONMENT_TRAILER}: {id}\nPh-Records: {first_seq}-{last_seq}\n",
        message.trim_end()
    )
}

/// The environment named by a commit's `Ph-Environment` trailer.
pub fn trailer_environment(message: &str) -> Option<EnvironmentId> {
    let prefix = format!("{ENVIRONMENT_TRAILER}:");
    message
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(prefix.as_str()))
        .and_then(|value| EnvironmentId::parse(value.trim()).ok())
}

/// Summary line of a message written by [`commit_message`].
pub fn summary(message: &str) -> String {
    message.lines().next().unwrap_or_default().to_string()
}

/// Everything a snapshot commit carries for one environment.
#[derive(Debug)]
pub struct SnapshotContents {
    pub manifest: SnapshotManifest,
    pub records: Vec<CommandRecord>,
}

/// Read the manifest and every chunk of `id` from a commit's tree.
///
/// Returns `Ok(None)` when the commit has no manifest for the environment.
pub fn read_snapshot(
    repo: &Repository,
    commit: &Commit<'_>,
    id: &EnvironmentId,
) -> Result<Option<SnapshotContents>, ProtocolError> {
    let tree = commit.tree()?;
    let manifest_entry = match tree.get_path(std::path::Path::new(&manifest_path(id))) {
        Ok(entry) => entry,
        Err(e) if e.code() == git2::ErrorCode::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let blob = repo.find_blob(manifest_entry.id())?;
    let manifest: SnapshotManifest = serde_json::from_slice(blob.content())?;

    let mut records = Vec::new();
    if let Some(chunks) = chunks_tree(repo, &tree, id)? {
        let mut names: Vec<(String, git2::Oid)> = chunks
            .iter()
            .filter(|e| e.kind() == Some(ObjectType::Blob))
            .filter_map(|e| e.name().map(|n| (n.to_string(), e.id())))
            .collect();
        // Zero-padded names sort in sequence order.
        names.sort();
        for (name, oid) in names {
            let blob = repo.find_blob(oid)?;
            let text = std::str::from_utf8(blob.content()).map_err(|_| {
                ProtocolError::GitOperation(format!("chunk {name} is not valid UTF-8"))
            })?;
            for line in text.lines().filter(|l| !l.trim().is_empty()) {
                records.push(serde_json::from_str::<CommandRecord>(line)?);
            }
        }
    }
    records.sort_by_key(|r| r.seq);
    records.dedup_by_key(|r| r.seq);
    records.retain(|r| r.seq <= manifest.last_seq);

    Ok(Some(SnapshotContents { manifest, records }))
}

fn chunks_tree<'r>(
    repo: &'r Repository,
    tree: &Tree<'_>,
    id: &EnvironmentId,
) -> Result<Option<Tree<'r>>, ProtocolError> {
    let path = format!("{}/chunks", env_root(id));
    match tree.get_path(std::path::Path::new(&path)) {
        Ok(entry) => Ok(Some(repo.find_tree(entry.id())?)),
        Err(e) if e.code() == git2::ErrorCode::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths() {
        let id = EnvironmentId("0123456789abcdef".into());
        assert_eq!(manifest_path(&id), ".ph/0123456789abcdef/manifest.json");
        assert_eq!(
            chunk_path(&id, 1, 12),
            ".ph/0123456789abcdef/chunks/000001-000012.jsonl"
        );
    }

    #[test]
    fn test_trailer_roundtrip() {
        let id = EnvironmentId("0123456789abcdef".into());
        let message = commit_message("fix build\n", &id, 3, 7);
        assert_eq!(summary(&message), "fix build");
        assert_eq!(trailer_environment(&message), Some(id));
        assert_eq!(trailer_environment("plain commit\n\nSigned-off-by: x"), None);
    }
}
