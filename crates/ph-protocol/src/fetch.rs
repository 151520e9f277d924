use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use git2::build::RepoBuilder;
use git2::{FetchOptions, Oid, RemoteCallbacks, Repository, Sort};

use ph_core::model::{CommitSnapshot, Environment, EnvironmentId, RepoRef};
use ph_core::storage::layout::write_atomic;
use ph_core::storage::{DataDir, RecordStore};

use crate::cancel::CancelToken;
use crate::error::ProtocolError;
use crate::history::SnapshotHistory;
use crate::lock::{env_lock_key, GitLock};
use crate::tree::{self, SnapshotContents};

/// Scratch data directory for one fetch, removed on drop.
///
/// The clone and the environment's new files are built here and the
/// environment directory is moved into place as a whole, so a fetch that
/// fails at any point leaves the data directory as it found it.
struct Staging {
    root: PathBuf,
    data: DataDir,
}

impl Staging {
    fn create(data: &DataDir) -> Result<Self, ProtocolError> {
        let root = data.staging_dir().join(uuid::Uuid::new_v4().to_string());
        let staged = DataDir::open(root.clone())?;
        Ok(Self { root, data: staged })
    }

    fn clone_dir(&self) -> PathBuf {
        self.root.join("clone")
    }

    fn retired_dir(&self) -> PathBuf {
        self.root.join("retired")
    }
}

impl Drop for Staging {
    fn drop(&mut self) {
        if !self.root.exists() {
            return;
        }
        if let Err(e) = fs::remove_dir_all(&self.root) {
            tracing::warn!(path = %self.root.display(), "failed to remove staging area: {e}");
        }
    }
}

/// Points at which a fetch reports progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FetchStage {
    Transfer,
    Cloned,
    Staged,
}

/// Clone `repo_ref`, locate its newest environment snapshot and
/// materialize it into the data directory.
///
/// The caller holds the per-repository git lock.
pub fn fetch_environment(
    store: &RecordStore,
    repo_ref: &str,
    cancel: &CancelToken,
) -> Result<Environment, ProtocolError> {
    fetch_observed(store, repo_ref, cancel, &|_| {})
}

pub(crate) fn fetch_observed(
    store: &RecordStore,
    repo_ref: &str,
    cancel: &CancelToken,
    observe: &dyn Fn(FetchStage),
) -> Result<Environment, ProtocolError> {
    let data = store.data_dir();
    if cancel.is_cancelled() {
        return Err(ProtocolError::Cancelled);
    }

    fs::create_dir_all(data.staging_dir())?;
    let staging = Staging::create(data)?;
    let clone_dir = staging.clone_dir();

    tracing::info!(remote = repo_ref, staging = %clone_dir.display(), "cloning");
    let repo = clone(repo_ref, &clone_dir, cancel, observe)?;
    observe(FetchStage::Cloned);
    if cancel.is_cancelled() {
        return Err(ProtocolError::Cancelled);
    }

    let (commit_oid, contents) =
        find_snapshot(&repo)?.ok_or_else(|| ProtocolError::NoEnvironmentFound {
            remote: repo_ref.to_string(),
        })?;
    let located = located_snapshot(&repo, commit_oid, &contents)?;
    drop(repo);

    let id = contents.manifest.environment.id.clone();
    let _env_lock = GitLock::acquire(data, &env_lock_key(&id))?;

    if data.has_environment(&id) {
        let local = store.last_seq(&id)?;
        if local > contents.manifest.last_seq {
            return Err(ProtocolError::GitOperation(format!(
                "local environment {id} has {local} records, ahead of the fetched snapshot ({})",
                contents.manifest.last_seq
            )));
        }
    }

    // Build the complete environment directory in staging. No vectors:
    // the index is rebuilt from the log.
    let staged = &staging.data;
    let mut env = contents.manifest.environment;
    env.workdir = data.checkout_dir(&id);
    env.repo = Some(RepoRef {
        remote: Some(repo_ref.to_string()),
        commit: Some(commit_oid.to_string()),
    });
    env.active = false;
    staged.write_environment(&env)?;
    write_atomic(&staged.records_path(&id), &tree::chunk_bytes(&contents.records)?)?;
    let mut history = SnapshotHistory {
        snapshots: contents.manifest.history.clone(),
    };
    history.push(located);
    history.save(staged, &id)?;
    fs::rename(&clone_dir, staged.checkout_dir(&id))?;

    observe(FetchStage::Staged);
    if cancel.is_cancelled() {
        return Err(ProtocolError::Cancelled);
    }
    install(&staged.env_dir(&id), &data.env_dir(&id), &staging.retired_dir())?;

    tracing::info!(
        environment = %id,
        commit = %commit_oid,
        records = contents.records.len(),
        "fetched environment"
    );
    Ok(env)
}

/// Move `staged` to `target`. An existing `target` is moved to `retired`
/// first and put back if the second rename fails.
fn install(staged: &Path, target: &Path, retired: &Path) -> Result<(), ProtocolError> {
    let replacing = target.exists();
    if replacing {
        fs::rename(target, retired)?;
    }
    if let Err(e) = fs::rename(staged, target) {
        if replacing {
            if let Err(restore) = fs::rename(retired, target) {
                tracing::error!(
                    path = %target.display(),
                    "could not restore environment after failed fetch: {restore}"
                );
            }
        }
        return Err(e.into());
    }
    Ok(())
}

fn clone(
    repo_ref: &str,
    into: &Path,
    cancel: &CancelToken,
    observe: &dyn Fn(FetchStage),
) -> Result<Repository, ProtocolError> {
    let mut callbacks = RemoteCallbacks::new();
    let token = cancel.clone();
    // Returning false aborts the transfer with a user error.
    callbacks.transfer_progress(move |_| {
        observe(FetchStage::Transfer);
        !token.is_cancelled()
    });

    let mut fetch_opts = FetchOptions::new();
    fetch_opts.remote_callbacks(callbacks);

    RepoBuilder::new()
        .fetch_options(fetch_opts)
        .clone(repo_ref, into)
        .map_err(|e| {
            if cancel.is_cancelled() || e.code() == git2::ErrorCode::User {
                ProtocolError::Cancelled
            } else {
                tracing::debug!(class = ?e.class(), code = ?e.code(), "clone failed");
                ProtocolError::RemoteUnavailable {
                    remote: repo_ref.to_string(),
                    reason: e.message().to_string(),
                }
            }
        })
}

/// Newest commit reachable from HEAD that carries an environment trailer
/// and a manifest for that environment.
fn find_snapshot(repo: &Repository) -> Result<Option<(Oid, SnapshotContents)>, ProtocolError> {
    let mut walk = repo.revwalk()?;
    match walk.push_head() {
        Ok(()) => {}
        Err(e)
            if e.code() == git2::ErrorCode::UnbornBranch
                || e.code() == git2::ErrorCode::NotFound =>
        {
            return Ok(None)
        }
        Err(e) => return Err(e.into()),
    }
    walk.set_sorting(Sort::TOPOLOGICAL | Sort::TIME)?;

    for oid in walk {
        let commit = repo.find_commit(oid?)?;
        let Some(id) = commit.message().and_then(tree::trailer_environment) else {
            continue;
        };
        if let Some(contents) = tree::read_snapshot(repo, &commit, &id)? {
            return Ok(Some((commit.id(), contents)));
        }
    }
    Ok(None)
}

fn located_snapshot(
    repo: &Repository,
    oid: Oid,
    contents: &SnapshotContents,
) -> Result<CommitSnapshot, ProtocolError> {
    let commit = repo.find_commit(oid)?;
    let previous = contents
        .manifest
        .history
        .last()
        .map(|s| s.last_seq)
        .unwrap_or(0);
    let created_at =
        DateTime::<Utc>::from_timestamp(commit.time().seconds(), 0).unwrap_or_else(Utc::now);
    Ok(CommitSnapshot {
        commit: oid.to_string(),
        environment: contents.manifest.environment.id.clone(),
        first_seq: previous + 1,
        last_seq: contents.manifest.last_seq,
        message: tree::summary(commit.message().unwrap_or_default()),
        created_at,
        parent: commit.parent_id(0).ok().map(|p| p.to_string()),
    })
}

/// Lock key for fetches of one repository reference.
pub fn fetch_lock_key(repo_ref: &str) -> String {
    let digest = EnvironmentId::derive(Path::new(repo_ref), None);
    format!("fetch-{digest}")
}
