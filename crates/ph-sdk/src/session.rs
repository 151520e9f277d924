use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use ph_core::env::NoPendingWrites;
use ph_core::group::{self, GroupTag};
use ph_core::model::{CommandRecord, CommitSnapshot, Environment, EnvironmentId, RecordDraft};
use ph_core::storage::{DataDir, RecordStore};
use ph_core::{CoreError, EnvPhase, EnvSource, EnvironmentManager, PhConfig};
use ph_index::{
    Answer, AskEngine, HashingEmbedder, IndexError, IndexWorker, SearchEngine, VectorIndex,
};
use ph_protocol::{CancelToken, GitBridge};

use crate::error::SdkError;

/// A search hit resolved to its record.
#[derive(Debug, Clone, Serialize)]
pub struct SearchMatch {
    pub record: CommandRecord,
    pub score: f32,
}

/// Process-wide context for one data directory.
///
/// Owns the environment manager (and with it the handle on the active
/// environment, restored from the pointer file on open), the command log,
/// the background index worker and the git bridge. Closing the session, or
/// dropping it, drains the index worker so captured records are durable in
/// the index before the process exits.
pub struct Session {
    config: PhConfig,
    manager: EnvironmentManager,
    store: RecordStore,
    engine: Arc<SearchEngine>,
    worker: Option<IndexWorker>,
    bridge: GitBridge,
}

impl Session {
    /// Default data directory (`~/.ph`).
    pub fn default_root() -> PathBuf {
        DataDir::default_root()
    }

    /// Open the data directory at `root`, reading its config file.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, SdkError> {
        let data = DataDir::open(root)?;
        let config = PhConfig::load_from(&data)?;
        Self::with_config(data, config)
    }

    pub fn with_config(data: DataDir, config: PhConfig) -> Result<Self, SdkError> {
        let store = RecordStore::new(data.clone());
        let embedder = Arc::new(HashingEmbedder::new(config.dimensions));
        let engine = Arc::new(SearchEngine::new(data.clone(), embedder));
        let worker = IndexWorker::spawn(Arc::clone(&engine), &config)?;
        let bridge = GitBridge::new(store.clone(), config.clone());
        let manager = EnvironmentManager::open(data);
        tracing::debug!(root = %manager.data_dir().root().display(), "opened session");
        Ok(Self {
            config,
            manager,
            store,
            engine,
            worker: Some(worker),
            bridge,
        })
    }

    pub fn config(&self) -> &PhConfig {
        &self.config
    }

    pub fn data_dir(&self) -> &DataDir {
        self.manager.data_dir()
    }

    pub fn phase(&self) -> EnvPhase {
        self.manager.phase()
    }

    pub fn current(&self) -> Option<Environment> {
        self.manager.current()
    }

    pub fn environments(&self) -> Result<Vec<Environment>, SdkError> {
        Ok(self.manager.list()?)
    }

    /// Make `source` the active environment. Local directories are opened
    /// (or created); git references are fetched first.
    pub fn load(&self, source: &str, cancel: &CancelToken) -> Result<Environment, SdkError> {
        let env = match EnvSource::parse(source) {
            EnvSource::Local(path) => self.manager.load(&path)?,
            git @ EnvSource::Git(_) => self
                .manager
                .load_source(&git, &self.bridge.resolver(cancel.clone()))?,
        };
        self.ensure_index(&env.id)?;
        Ok(env)
    }

    /// Deactivate the active environment once its pending index writes
    /// are durable.
    pub fn exit(&self) -> Result<Environment, SdkError> {
        let env = match &self.worker {
            Some(worker) => self.manager.exit(worker)?,
            None => self.manager.exit(&NoPendingWrites)?,
        };
        Ok(env)
    }

    /// Record a command into the active environment and queue it for
    /// indexing.
    pub fn capture(&self, draft: RecordDraft) -> Result<CommandRecord, SdkError> {
        let active = self.manager.current();
        let record = self.store.append_record(active.as_ref(), draft)?;
        self.worker()?.submit(record.clone())?;
        Ok(record)
    }

    /// Records of the active environment, oldest first. With `limit`, only
    /// the most recent ones.
    pub fn history(&self, limit: Option<usize>) -> Result<Vec<CommandRecord>, SdkError> {
        let env = self.active()?;
        let mut records = self
            .store
            .list(&env.id, None)
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(limit) = limit {
            let skip = records.len().saturating_sub(limit);
            records.drain(..skip);
        }
        Ok(records)
    }

    /// Similarity search over the active environment.
    pub fn search(&self, query: &str, limit: Option<usize>) -> Result<Vec<SearchMatch>, SdkError> {
        let env = self.active()?;
        self.worker()?.flush()?;
        let k = limit.unwrap_or(self.config.search_limit);
        let hits = self.engine.search(query, &env.id, k)?;
        let mut matches = Vec::with_capacity(hits.len());
        for hit in hits {
            matches.push(SearchMatch {
                record: self.store.get(&hit.record)?,
                score: hit.score,
            });
        }
        Ok(matches)
    }

    /// Answer a question from the active environment's history.
    pub fn ask(&self, question: &str, limit: Option<usize>) -> Result<Answer, SdkError> {
        let env = self.active()?;
        self.worker()?.flush()?;
        let k = limit.unwrap_or(self.config.search_limit);
        let ask = AskEngine::new(Arc::clone(&self.engine), self.store.clone(), k);
        Ok(ask.ask(question, &env.id)?)
    }

    /// Commit the active environment's new records to its repository.
    pub fn commit(&self, message: &str) -> Result<CommitSnapshot, SdkError> {
        let env = self.active()?;
        Ok(self.bridge.commit(&env.id, message)?)
    }

    pub fn snapshots(&self) -> Result<Vec<CommitSnapshot>, SdkError> {
        let env = self.active()?;
        Ok(self.bridge.snapshots(&env.id)?)
    }

    /// Fetch and materialize an environment without activating it.
    pub fn fetch(&self, repo_ref: &str, cancel: &CancelToken) -> Result<Environment, SdkError> {
        let env = self.bridge.fetch_environment(repo_ref, cancel)?;
        self.engine.rebuild(&self.store, &env.id)?;
        Ok(env)
    }

    /// Rebuild the active environment's index from its log.
    pub fn reindex(&self) -> Result<usize, SdkError> {
        let env = self.active()?;
        self.worker()?.flush()?;
        Ok(self.engine.rebuild(&self.store, &env.id)?)
    }

    /// Write the hidden group file in `dir`.
    pub fn tag_group(&self, dir: &Path, name: &str) -> Result<GroupTag, SdkError> {
        let tag = group::write(dir, name)?;
        tracing::info!(dir = %dir.display(), group = %tag.name, "tagged group");
        Ok(tag)
    }

    /// Drain the index worker and release the session.
    pub fn close(mut self) -> Result<(), SdkError> {
        match self.worker.take() {
            Some(worker) => Ok(worker.shutdown()?),
            None => Ok(()),
        }
    }

    fn active(&self) -> Result<Environment, SdkError> {
        self.manager
            .current()
            .ok_or_else(|| CoreError::NoActiveEnvironment.into())
    }

    fn worker(&self) -> Result<&IndexWorker, SdkError> {
        self.worker
            .as_ref()
            .ok_or_else(|| IndexError::WorkerStopped.into())
    }

    /// Fetched environments arrive without vectors; build them on load.
    fn ensure_index(&self, environment: &EnvironmentId) -> Result<(), SdkError> {
        if !VectorIndex::exists(self.data_dir(), environment) {
            let count = self.engine.rebuild(&self.store, environment)?;
            tracing::debug!(environment = %environment, count, "built index on load");
        }
        Ok(())
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.shutdown() {
                tracing::warn!("failed to flush index on close: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::{Repository, Signature};
    use tempfile::TempDir;

    fn session(tmp: &TempDir) -> Session {
        Session::open(tmp.path().join("data")).unwrap()
    }

    fn project(tmp: &TempDir) -> PathBuf {
        let dir = tmp.path().join("project");
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn load(session: &Session, dir: &Path) -> Environment {
        session
            .load(&dir.to_string_lossy(), &CancelToken::new())
            .unwrap()
    }

    fn capture_all(session: &Session, dir: &Path, commands: &[&str]) {
        for command in commands {
            session
                .capture(RecordDraft::new(*command, dir).exit_code(0))
                .unwrap();
        }
    }

    #[test]
    fn test_capture_requires_active_environment() {
        let tmp = TempDir::new().unwrap();
        let session = session(&tmp);
        let err = session
            .capture(RecordDraft::new("ls", tmp.path()))
            .unwrap_err();
        assert!(matches!(err.core(), Some(CoreError::Validation(_))));
    }

    #[test]
    fn test_search_and_ask_see_fresh_captures() {
        let tmp = TempDir::new().unwrap();
        let session = session(&tmp);
        let dir = project(&tmp);
        load(&session, &dir);
        capture_all(&session, &dir, &["git status", "ls -la", "git commit -m fix"]);

        let answer = session.ask("what did I commit?", Some(1)).unwrap();
        assert_eq!(answer.sources[0].record.command, "git commit -m fix");

        let matches = session.search("git commit", Some(2)).unwrap();
        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].record.command, "git commit -m fix");
    }

    #[test]
    fn test_ask_on_empty_environment() {
        let tmp = TempDir::new().unwrap();
        let session = session(&tmp);
        load(&session, &project(&tmp));

        let err = session.ask("anything?", None).unwrap_err();
        assert!(matches!(
            err,
            SdkError::Index(IndexError::EmptyEnvironment { .. })
        ));
    }

    #[test]
    fn test_exit_flushes_and_state_persists() {
        let tmp = TempDir::new().unwrap();
        let dir = project(&tmp);
        {
            let session = session(&tmp);
            load(&session, &dir);
            capture_all(&session, &dir, &["make release"]);
            session.close().unwrap();
        }

        let session = session(&tmp);
        assert_eq!(session.phase(), EnvPhase::Active);
        assert_eq!(session.search("release", None).unwrap().len(), 1);

        let exited = session.exit().unwrap();
        assert!(!exited.active);
        assert!(session.current().is_none());
        assert!(session.exit().unwrap_err().is_no_active_environment());
        assert!(session.search("release", None).unwrap_err().is_no_active_environment());
    }

    #[test]
    fn test_history_limit_keeps_most_recent() {
        let tmp = TempDir::new().unwrap();
        let session = session(&tmp);
        let dir = project(&tmp);
        load(&session, &dir);
        capture_all(&session, &dir, &["one", "two", "three"]);

        let recent: Vec<String> = session
            .history(Some(2))
            .unwrap()
            .into_iter()
            .map(|r| r.command)
            .collect();
        assert_eq!(recent, vec!["two", "three"]);
    }

    fn init_repo(dir: &Path) {
        let repo = Repository::init(dir).unwrap();
        std::fs::write(dir.join("README.md"), "hi\n").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("README.md")).unwrap();
        index.write().unwrap();
        let tree = repo.find_tree(index.write_tree().unwrap()).unwrap();
        let sig = Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
    }

    #[test]
    fn test_commit_then_load_from_git() {
        let tmp = TempDir::new().unwrap();
        let dir = project(&tmp);
        init_repo(&dir);

        let source = session(&tmp);
        let env = load(&source, &dir);
        capture_all(&source, &dir, &["cargo build --release", "git commit -m fix"]);
        let snapshot = source.commit("share history").unwrap();
        assert_eq!(snapshot.last_seq, 2);
        let err = source.commit("again").unwrap_err();
        assert!(matches!(
            err,
            SdkError::Protocol(ph_protocol::ProtocolError::NothingToCommit { .. })
        ));
        assert!(!err.is_git_failure());

        let other = TempDir::new().unwrap();
        let target = Session::open(other.path()).unwrap();
        let url = format!("file://{}", dir.canonicalize().unwrap().display());
        let loaded = target.load(&url, &CancelToken::new()).unwrap();

        assert_eq!(loaded.id, env.id);
        let matches = target.search("cargo build", Some(1)).unwrap();
        assert_eq!(matches[0].record.command, "cargo build --release");
    }

    #[test]
    fn test_fetched_environment_loads_from_its_checkout() {
        let tmp = TempDir::new().unwrap();
        let dir = project(&tmp);
        init_repo(&dir);
        let source = session(&tmp);
        let env = load(&source, &dir);
        capture_all(&source, &dir, &["make deploy", "kubectl get pods"]);
        source.commit("share").unwrap();

        let other = TempDir::new().unwrap();
        let target = Session::open(other.path()).unwrap();
        let url = format!("file://{}", dir.canonicalize().unwrap().display());
        let fetched = target.fetch(&url, &CancelToken::new()).unwrap();
        assert_eq!(fetched.id, env.id);
        assert!(target.current().is_none());

        let loaded = load(&target, &fetched.workdir);
        assert_eq!(loaded.id, fetched.id);
        assert_eq!(target.history(None).unwrap().len(), 2);
        assert_eq!(target.environments().unwrap().len(), 1);
    }

    #[test]
    fn test_tag_group_overwrites() {
        let tmp = TempDir::new().unwrap();
        let session = session(&tmp);
        session.tag_group(tmp.path(), "alpha").unwrap();
        session.tag_group(tmp.path(), "beta").unwrap();
        assert_eq!(group::read(tmp.path()).unwrap().name, "beta");
    }
}
