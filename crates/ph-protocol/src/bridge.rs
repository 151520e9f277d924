use std::path::Path;

use ph_core::config::PhConfig;
use ph_core::env::SourceResolver;
use ph_core::model::environment::remote_url;
use ph_core::model::{CommitSnapshot, Environment, EnvironmentId};
use ph_core::storage::{DataDir, RecordStore};

use crate::cancel::CancelToken;
use crate::commit::commit_environment;
use crate::error::ProtocolError;
use crate::fetch::{self, fetch_lock_key};
use crate::history::SnapshotHistory;
use crate::lock::{env_lock_key, GitLock};

/// Entry point for git operations on environments.
///
/// Each operation takes a non-blocking lock first, so overlapping
/// operations on one environment (or one repository reference) fail fast
/// instead of queueing. Nothing here is retried; callers may retry errors
/// for which [`ProtocolError::is_retryable`] is true.
#[derive(Debug, Clone)]
pub struct GitBridge {
    store: RecordStore,
    config: PhConfig,
}

impl GitBridge {
    pub fn new(store: RecordStore, config: PhConfig) -> Self {
        Self { store, config }
    }

    /// Commit records added since the last snapshot onto the current branch.
    pub fn commit(
        &self,
        environment: &EnvironmentId,
        message: &str,
    ) -> Result<CommitSnapshot, ProtocolError> {
        let _lock = GitLock::acquire(self.store.data_dir(), &env_lock_key(environment))?;
        commit_environment(&self.store, &self.config, environment, message)
    }

    /// Clone `repo_ref` and materialize its newest environment snapshot.
    pub fn fetch_environment(
        &self,
        repo_ref: &str,
        cancel: &CancelToken,
    ) -> Result<Environment, ProtocolError> {
        let _lock = GitLock::acquire(self.store.data_dir(), &fetch_lock_key(repo_ref))?;
        fetch::fetch_environment(&self.store, repo_ref, cancel)
    }

    /// Snapshot history of an environment, newest last.
    pub fn snapshots(&self, environment: &EnvironmentId) -> Result<Vec<CommitSnapshot>, ProtocolError> {
        Ok(SnapshotHistory::load(self.store.data_dir(), environment)?.snapshots)
    }

    /// Remote URL of the repository containing `workdir`, if any.
    pub fn resolve_remote(workdir: &Path) -> Option<String> {
        let repo = git2::Repository::discover(workdir).ok()?;
        remote_url(&repo)
    }

    /// A resolver that fetches git references for environment loads.
    pub fn resolver(&self, cancel: CancelToken) -> FetchResolver<'_> {
        FetchResolver {
            bridge: self,
            cancel,
        }
    }
}

pub struct FetchResolver<'a> {
    bridge: &'a GitBridge,
    cancel: CancelToken,
}

impl SourceResolver for FetchResolver<'_> {
    type Error = ProtocolError;

    fn resolve(&self, _data: &DataDir, reference: &str) -> Result<Environment, ProtocolError> {
        self.bridge.fetch_environment(reference, &self.cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature, StatusOptions};
    use ph_core::env::{EnvSource, EnvironmentManager};
    use ph_core::model::RecordDraft;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _repo_dir: TempDir,
        _data_dir: TempDir,
        workdir: std::path::PathBuf,
        store: RecordStore,
        bridge: GitBridge,
        env: Environment,
    }

    fn init_repo(path: &Path, with_commit: bool) -> Repository {
        let repo = Repository::init(path).unwrap();
        if with_commit {
            fs::write(path.join("README.md"), "# project\n").unwrap();
            let mut index = repo.index().unwrap();
            index.add_path(Path::new("README.md")).unwrap();
            index.write().unwrap();
            let tree_oid = index.write_tree().unwrap();
            let tree = repo.find_tree(tree_oid).unwrap();
            let sig = Signature::now("test", "test@example.com").unwrap();
            repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
                .unwrap();
        }
        repo
    }

    fn fixture(with_commit: bool) -> Fixture {
        let repo_dir = TempDir::new().unwrap();
        let data_dir = TempDir::new().unwrap();
        let workdir = repo_dir.path().canonicalize().unwrap();
        init_repo(&workdir, with_commit);

        let data = DataDir::open(data_dir.path()).unwrap();
        let id = EnvironmentId::derive(&workdir, None);
        let mut env = Environment::new(id, workdir.clone(), None);
        data.write_environment(&env).unwrap();
        env.active = true;

        let store = RecordStore::new(data);
        let bridge = GitBridge::new(store.clone(), PhConfig::default());
        Fixture {
            _repo_dir: repo_dir,
            _data_dir: data_dir,
            workdir,
            store,
            bridge,
            env,
        }
    }

    fn record(fx: &Fixture, command: &str) {
        fx.store
            .append(Some(&fx.env), RecordDraft::new(command, &fx.workdir))
            .unwrap();
    }

    fn head(path: &Path) -> git2::Oid {
        Repository::open(path)
            .unwrap()
            .head()
            .unwrap()
            .target()
            .unwrap()
    }

    #[test]
    fn test_commit_writes_snapshot_and_keeps_worktree_clean() {
        let fx = fixture(true);
        record(&fx, "cargo build");
        record(&fx, "git commit -m fix");

        let snapshot = fx.bridge.commit(&fx.env.id, "checkpoint").unwrap();
        assert_eq!((snapshot.first_seq, snapshot.last_seq), (1, 2));
        assert_eq!(snapshot.message, "checkpoint");
        assert!(snapshot.parent.is_some());

        let repo = Repository::open(&fx.workdir).unwrap();
        let commit = repo.head().unwrap().peel_to_commit().unwrap();
        assert_eq!(commit.id().to_string(), snapshot.commit);
        assert!(commit
            .message()
            .unwrap()
            .contains(&format!("Ph-Environment: {}", fx.env.id)));
        let tree = commit.tree().unwrap();
        assert!(tree.get_path(Path::new("README.md")).is_ok());
        let chunk = format!(".ph/{}/chunks/000001-000002.jsonl", fx.env.id);
        assert!(tree.get_path(Path::new(&chunk)).is_ok());

        let mut opts = StatusOptions::new();
        opts.include_untracked(true).recurse_untracked_dirs(true);
        assert!(repo.statuses(Some(&mut opts)).unwrap().is_empty());

        assert_eq!(fx.bridge.snapshots(&fx.env.id).unwrap(), vec![snapshot]);
    }

    #[test]
    fn test_second_commit_covers_only_new_records() {
        let fx = fixture(true);
        record(&fx, "ls");
        let first = fx.bridge.commit(&fx.env.id, "one").unwrap();
        record(&fx, "pwd");
        record(&fx, "make");
        let second = fx.bridge.commit(&fx.env.id, "two").unwrap();

        assert_eq!((second.first_seq, second.last_seq), (2, 3));
        assert_eq!(second.parent.as_deref(), Some(first.commit.as_str()));
        assert_eq!(fx.bridge.snapshots(&fx.env.id).unwrap().len(), 2);
    }

    #[test]
    fn test_nothing_to_commit_leaves_head_unchanged() {
        let fx = fixture(true);
        let before = head(&fx.workdir);

        let err = fx.bridge.commit(&fx.env.id, "empty").unwrap_err();
        assert!(matches!(err, ProtocolError::NothingToCommit { .. }));
        assert_eq!(head(&fx.workdir), before);

        record(&fx, "ls");
        fx.bridge.commit(&fx.env.id, "one").unwrap();
        let after = head(&fx.workdir);
        assert!(matches!(
            fx.bridge.commit(&fx.env.id, "again"),
            Err(ProtocolError::NothingToCommit { .. })
        ));
        assert_eq!(head(&fx.workdir), after);
    }

    #[test]
    fn test_commit_on_unborn_branch_is_root_commit() {
        let fx = fixture(false);
        record(&fx, "git init");
        let snapshot = fx.bridge.commit(&fx.env.id, "first").unwrap();
        assert!(snapshot.parent.is_none());
        assert_eq!(head(&fx.workdir).to_string(), snapshot.commit);
    }

    #[test]
    fn test_commit_rejects_detached_head() {
        let fx = fixture(true);
        record(&fx, "ls");
        let repo = Repository::open(&fx.workdir).unwrap();
        let oid = repo.head().unwrap().target().unwrap();
        repo.set_head_detached(oid).unwrap();

        let err = fx.bridge.commit(&fx.env.id, "detached").unwrap_err();
        assert!(matches!(err, ProtocolError::GitOperation(_)));
        assert_eq!(head(&fx.workdir), oid);
    }

    #[test]
    fn test_commit_rejects_locally_modified_snapshot() {
        let fx = fixture(true);
        record(&fx, "ls");
        fx.bridge.commit(&fx.env.id, "one").unwrap();
        let before = head(&fx.workdir);

        let manifest = fx.workdir.join(format!(".ph/{}/manifest.json", fx.env.id));
        fs::write(&manifest, "{}").unwrap();
        record(&fx, "pwd");

        let err = fx.bridge.commit(&fx.env.id, "two").unwrap_err();
        assert!(matches!(err, ProtocolError::GitOperation(_)));
        assert_eq!(head(&fx.workdir), before);
    }

    #[test]
    fn test_commit_survives_failed_worktree_update() {
        let fx = fixture(true);
        record(&fx, "ls");
        let index_lock = fx.workdir.join(".git/index.lock");
        fs::write(&index_lock, "").unwrap();

        let first = fx.bridge.commit(&fx.env.id, "one").unwrap();
        assert_eq!(head(&fx.workdir).to_string(), first.commit);
        assert_eq!(fx.bridge.snapshots(&fx.env.id).unwrap(), vec![first.clone()]);

        fs::remove_file(&index_lock).unwrap();
        record(&fx, "pwd");
        let second = fx.bridge.commit(&fx.env.id, "two").unwrap();
        assert_eq!((second.first_seq, second.last_seq), (2, 2));
        assert_eq!(second.parent.as_deref(), Some(first.commit.as_str()));
    }

    #[test]
    fn test_commit_restores_deleted_snapshot_files() {
        let fx = fixture(true);
        record(&fx, "ls");
        fx.bridge.commit(&fx.env.id, "one").unwrap();
        fs::remove_file(fx.workdir.join(format!(".ph/{}/manifest.json", fx.env.id))).unwrap();

        record(&fx, "pwd");
        fx.bridge.commit(&fx.env.id, "two").unwrap();
        assert!(fx
            .workdir
            .join(format!(".ph/{}/manifest.json", fx.env.id))
            .exists());
    }

    #[test]
    fn test_overlapping_operation_is_rejected() {
        let fx = fixture(true);
        record(&fx, "ls");
        let _held = GitLock::acquire(fx.store.data_dir(), &env_lock_key(&fx.env.id)).unwrap();

        let err = fx.bridge.commit(&fx.env.id, "blocked").unwrap_err();
        assert!(matches!(err, ProtocolError::GitOperation(_)));
    }

    #[test]
    fn test_fetch_materializes_committed_environment() {
        let fx = fixture(true);
        record(&fx, "cargo test");
        record(&fx, "git commit -m fix");
        fx.bridge.commit(&fx.env.id, "share").unwrap();

        let other = TempDir::new().unwrap();
        let data = DataDir::open(other.path()).unwrap();
        let store = RecordStore::new(data.clone());
        let bridge = GitBridge::new(store.clone(), PhConfig::default());

        let source = fx.workdir.to_string_lossy().to_string();
        let env = bridge
            .fetch_environment(&source, &CancelToken::new())
            .unwrap();

        assert_eq!(env.id, fx.env.id);
        assert_eq!(env.workdir, data.checkout_dir(&env.id));
        assert!(env.workdir.join("README.md").exists());
        assert_eq!(env.remote(), Some(source.as_str()));

        let commands: Vec<String> = store
            .list(&env.id, None)
            .map(|r| r.unwrap().command)
            .collect();
        assert_eq!(commands, vec!["cargo test", "git commit -m fix"]);
        assert_eq!(bridge.snapshots(&env.id).unwrap().len(), 1);
        assert_eq!(fs::read_dir(data.staging_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_fetch_rejects_when_local_is_ahead() {
        let fx = fixture(true);
        record(&fx, "ls");
        fx.bridge.commit(&fx.env.id, "share").unwrap();
        let source = fx.workdir.to_string_lossy().to_string();

        // Same data dir: local log equals the snapshot, so a refetch is fine.
        fx.bridge
            .fetch_environment(&source, &CancelToken::new())
            .unwrap();

        record(&fx, "pwd");
        let err = fx
            .bridge
            .fetch_environment(&source, &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::GitOperation(_)));
        assert_eq!(fx.store.last_seq(&fx.env.id).unwrap(), 2);
    }

    #[test]
    fn test_fetch_without_snapshot_leaves_nothing_behind() {
        let repo_dir = TempDir::new().unwrap();
        init_repo(repo_dir.path(), true);
        let data_dir = TempDir::new().unwrap();
        let data = DataDir::open(data_dir.path()).unwrap();
        let bridge = GitBridge::new(RecordStore::new(data.clone()), PhConfig::default());

        let source = repo_dir.path().to_string_lossy().to_string();
        let err = bridge
            .fetch_environment(&source, &CancelToken::new())
            .unwrap_err();

        assert!(matches!(err, ProtocolError::NoEnvironmentFound { .. }));
        assert!(!err.is_retryable());
        assert!(data.environment_ids().unwrap().is_empty());
        assert_eq!(fs::read_dir(data.staging_dir()).unwrap().count(), 0);
    }

    #[test]
    fn test_fetch_unreachable_remote_is_retryable() {
        let data_dir = TempDir::new().unwrap();
        let data = DataDir::open(data_dir.path()).unwrap();
        let bridge = GitBridge::new(RecordStore::new(data), PhConfig::default());

        let missing = data_dir.path().join("does-not-exist");
        let err = bridge
            .fetch_environment(&missing.to_string_lossy(), &CancelToken::new())
            .unwrap_err();
        assert!(matches!(err, ProtocolError::RemoteUnavailable { .. }));
        assert!(err.is_retryable());
    }

    #[test]
    fn test_cancelled_fetch() {
        let repo_dir = TempDir::new().unwrap();
        init_repo(repo_dir.path(), true);
        let data_dir = TempDir::new().unwrap();
        let data = DataDir::open(data_dir.path()).unwrap();
        let bridge = GitBridge::new(RecordStore::new(data.clone()), PhConfig::default());

        let cancel = CancelToken::new();
        cancel.cancel();
        let err = bridge
            .fetch_environment(&repo_dir.path().to_string_lossy(), &cancel)
            .unwrap_err();
        assert!(matches!(err, ProtocolError::Cancelled));
        assert!(data.environment_ids().unwrap().is_empty());
    }

    fn shared(fx: &Fixture, commands: &[&str]) -> String {
        for command in commands {
            record(fx, command);
        }
        fx.bridge.commit(&fx.env.id, "share").unwrap();
        fx.workdir.to_string_lossy().to_string()
    }

    fn cancel_at(
        store: &RecordStore,
        source: &str,
        stage: Option<fetch::FetchStage>,
    ) -> ProtocolError {
        let cancel = CancelToken::new();
        let token = cancel.clone();
        fetch::fetch_observed(store, source, &cancel, &|seen| {
            if stage.map_or(true, |s| s == seen) {
                token.cancel();
            }
        })
        .unwrap_err()
    }

    #[test]
    fn test_fetch_cancelled_mid_clone_rolls_back() {
        let fx = fixture(true);
        let source = shared(&fx, &["make"]);
        let other = TempDir::new().unwrap();
        let data = DataDir::open(other.path()).unwrap();
        let store = RecordStore::new(data.clone());

        // First progress report, whichever comes first.
        let err = cancel_at(&store, &source, None);
        assert!(matches!(err, ProtocolError::Cancelled));
        assert_eq!(fs::read_dir(data.staging_dir()).unwrap().count(), 0);
        assert!(data.environment_ids().unwrap().is_empty());

        let err = cancel_at(&store, &source, Some(fetch::FetchStage::Cloned));
        assert!(matches!(err, ProtocolError::Cancelled));
        assert_eq!(fs::read_dir(data.staging_dir()).unwrap().count(), 0);
        assert!(!data.env_dir(&fx.env.id).exists());
    }

    #[test]
    fn test_failed_refetch_keeps_existing_environment() {
        let fx = fixture(true);
        let source = shared(&fx, &["ls"]);
        let other = TempDir::new().unwrap();
        let data = DataDir::open(other.path()).unwrap();
        let store = RecordStore::new(data.clone());
        let bridge = GitBridge::new(store.clone(), PhConfig::default());
        let first = bridge
            .fetch_environment(&source, &CancelToken::new())
            .unwrap();
        fs::write(data.vectors_path(&first.id), "").unwrap();

        record(&fx, "pwd");
        fx.bridge.commit(&fx.env.id, "more").unwrap();

        let err = cancel_at(&store, &source, Some(fetch::FetchStage::Staged));
        assert!(matches!(err, ProtocolError::Cancelled));
        assert_eq!(store.last_seq(&first.id).unwrap(), 1);
        assert_eq!(bridge.snapshots(&first.id).unwrap().len(), 1);
        assert!(data.vectors_path(&first.id).exists());
        assert!(first.workdir.join("README.md").exists());
        assert_eq!(fs::read_dir(data.staging_dir()).unwrap().count(), 0);

        let refetched = bridge
            .fetch_environment(&source, &CancelToken::new())
            .unwrap();
        assert_eq!(store.last_seq(&refetched.id).unwrap(), 2);
        assert_eq!(bridge.snapshots(&refetched.id).unwrap().len(), 2);
        assert!(!data.vectors_path(&refetched.id).exists());
    }

    #[test]
    fn test_resolver_loads_fetched_environment() {
        let fx = fixture(true);
        record(&fx, "docker compose up");
        fx.bridge.commit(&fx.env.id, "share").unwrap();

        let other = TempDir::new().unwrap();
        let data = DataDir::open(other.path()).unwrap();
        let bridge = GitBridge::new(RecordStore::new(data.clone()), PhConfig::default());
        let manager = EnvironmentManager::open(data);

        let source = EnvSource::Git(fx.workdir.to_string_lossy().to_string());
        let env = manager
            .load_source(&source, &bridge.resolver(CancelToken::new()))
            .unwrap();
        assert_eq!(env.id, fx.env.id);
        assert_eq!(manager.current().unwrap().id, fx.env.id);
    }

    #[test]
    fn test_resolve_remote() {
        let tmp = TempDir::new().unwrap();
        let repo = init_repo(tmp.path(), false);
        assert_eq!(GitBridge::resolve_remote(tmp.path()), None);
        repo.remote("origin", "https://example.com/team/repo.git")
            .unwrap();
        assert_eq!(
            GitBridge::resolve_remote(tmp.path()).as_deref(),
            Some("https://example.com/team/repo.git")
        );
    }
}
