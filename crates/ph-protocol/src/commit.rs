use std::fs;
use std::path::Path;

use chrono::Utc;
use git2::build::TreeUpdateBuilder;
use git2::{Delta, DiffOptions, FileMode, Repository, Signature, Tree};

use ph_core::config::PhConfig;
use ph_core::model::environment::remote_url;
use ph_core::model::{CommandRecord, CommitSnapshot, EnvironmentId, RepoRef};
use ph_core::storage::RecordStore;

use crate::error::ProtocolError;
use crate::history::SnapshotHistory;
use crate::tree::{self, SnapshotManifest};

/// Commit the records added since the last snapshot of `id` onto the
/// current branch of the repository containing the environment's workdir.
///
/// The caller holds the environment's git lock.
pub fn commit_environment(
    store: &RecordStore,
    config: &PhConfig,
    id: &EnvironmentId,
    message: &str,
) -> Result<CommitSnapshot, ProtocolError> {
    let data = store.data_dir();
    let mut env = data.read_environment(id)?;
    let mut history = SnapshotHistory::load(data, id)?;

    let records = store
        .list(id, Some(history.last_seq()))
        .collect::<Result<Vec<CommandRecord>, _>>()?;
    let (first_seq, last_seq) = match (records.first(), records.last()) {
        (Some(first), Some(last)) => (first.seq, last.seq),
        _ => {
            return Err(ProtocolError::NothingToCommit {
                environment: id.clone(),
            })
        }
    };

    let repo = Repository::discover(&env.workdir).map_err(|_| {
        ProtocolError::GitOperation(format!(
            "{} is not inside a git repository",
            env.workdir.display()
        ))
    })?;
    let root = repo
        .workdir()
        .ok_or_else(|| ProtocolError::GitOperation("repository is bare".into()))?
        .to_path_buf();
    if repo.head_detached()? {
        return Err(ProtocolError::GitOperation(
            "HEAD is detached; check out a branch first".into(),
        ));
    }
    if repo.index()?.has_conflicts() {
        return Err(ProtocolError::GitOperation(
            "index has unresolved conflicts".into(),
        ));
    }

    let parent = match repo.head() {
        Ok(head) => Some(head.peel_to_commit()?),
        Err(e)
            if e.code() == git2::ErrorCode::UnbornBranch
                || e.code() == git2::ErrorCode::NotFound =>
        {
            None
        }
        Err(e) => return Err(e.into()),
    };
    let head_tree = parent.as_ref().map(|c| c.tree()).transpose()?;
    ensure_snapshot_path_clean(&repo, head_tree.as_ref(), id)?;

    env.repo = Some(RepoRef {
        remote: remote_url(&repo),
        commit: parent.as_ref().map(|c| c.id().to_string()),
    });
    let manifest = SnapshotManifest::new(env.clone(), last_seq, history.snapshots.clone());
    let manifest_bytes = serde_json::to_vec_pretty(&manifest)?;
    let chunk_bytes = tree::chunk_bytes(&records)?;
    let manifest_path = tree::manifest_path(id);
    let chunk_path = tree::chunk_path(id, first_seq, last_seq);

    // Tree = HEAD's tree plus the snapshot files; the index is left alone
    // so unrelated staged changes stay uncommitted.
    let manifest_oid = repo.blob(&manifest_bytes)?;
    let chunk_oid = repo.blob(&chunk_bytes)?;
    let base_tree = match head_tree {
        Some(tree) => tree,
        None => {
            let empty = repo.treebuilder(None)?.write()?;
            repo.find_tree(empty)?
        }
    };
    let mut update = TreeUpdateBuilder::new();
    update.upsert(manifest_path.as_str(), manifest_oid, FileMode::Blob);
    update.upsert(chunk_path.as_str(), chunk_oid, FileMode::Blob);
    let tree_oid = update.create_updated(&repo, &base_tree)?;
    let tree = repo.find_tree(tree_oid)?;

    let sig = repo
        .signature()
        .or_else(|_| Signature::now(&config.signature_name, &config.signature_email))?;
    let full_message = tree::commit_message(message, id, first_seq, last_seq);
    let parents: Vec<&git2::Commit<'_>> = parent.iter().collect();
    let commit_oid = repo.commit(Some("HEAD"), &sig, &sig, &full_message, &tree, &parents)?;

    let snapshot = CommitSnapshot {
        commit: commit_oid.to_string(),
        environment: id.clone(),
        first_seq,
        last_seq,
        message: tree::summary(&full_message),
        created_at: Utc::now(),
        parent: parent.as_ref().map(|c| c.id().to_string()),
    };
    history.push(snapshot.clone());
    history.save(data, id)?;

    if let Some(repo_ref) = env.repo.as_mut() {
        repo_ref.commit = Some(snapshot.commit.clone());
    }
    data.write_environment(&env)?;

    // The commit already holds the files; a failed mirror only leaves the
    // working tree behind HEAD.
    let mirrored = [
        (manifest_path.as_str(), manifest_bytes.as_slice()),
        (chunk_path.as_str(), chunk_bytes.as_slice()),
    ];
    if let Err(e) = mirror_into_worktree(&repo, &root, &mirrored) {
        tracing::warn!(
            environment = %id,
            commit = %snapshot.commit,
            "committed snapshot but could not update the working tree: {e}"
        );
    }

    tracing::info!(
        environment = %id,
        commit = %snapshot.commit,
        records = snapshot.record_count(),
        "committed environment snapshot"
    );
    Ok(snapshot)
}

/// Refuse to overwrite snapshot files whose working tree copy differs
/// from HEAD. Missing files are fine; the mirror restores them.
fn ensure_snapshot_path_clean(
    repo: &Repository,
    head_tree: Option<&Tree<'_>>,
    id: &EnvironmentId,
) -> Result<(), ProtocolError> {
    let mut opts = DiffOptions::new();
    opts.pathspec(tree::env_root(id))
        .include_untracked(true)
        .recurse_untracked_dirs(true);
    let diff = repo.diff_tree_to_workdir(head_tree, Some(&mut opts))?;
    let dirty = diff.deltas().find(|delta| delta.status() != Delta::Deleted);
    if let Some(delta) = dirty {
        let path = delta
            .new_file()
            .path()
            .or_else(|| delta.old_file().path())
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "<unknown path>".into());
        return Err(ProtocolError::GitOperation(format!(
            "snapshot file {path} has local modifications"
        )));
    }
    Ok(())
}

fn mirror_into_worktree(
    repo: &Repository,
    root: &Path,
    files: &[(&str, &[u8])],
) -> Result<(), ProtocolError> {
    let mut index = repo.index()?;
    for (rel, bytes) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, bytes)?;
        index.add_path(Path::new(rel))?;
    }
    index.write()?;
    Ok(())
}
