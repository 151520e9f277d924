use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use ph_core::model::{CommandRecord, EnvironmentId};
use ph_core::storage::{DataDir, RecordStore};

use crate::embed::Embedder;
use crate::error::IndexError;
use crate::index::{rebuild_index, EmbeddingVector, SearchHit, VectorIndex};

/// High-level search engine that manages per-environment index lifecycle.
pub struct SearchEngine {
    data: DataDir,
    embedder: Arc<dyn Embedder>,
    indexes: Mutex<HashMap<EnvironmentId, Arc<VectorIndex>>>,
}

impl SearchEngine {
    pub fn new(data: DataDir, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            data,
            embedder,
            indexes: Mutex::new(HashMap::new()),
        }
    }

    pub fn embedder(&self) -> &dyn Embedder {
        self.embedder.as_ref()
    }

    /// Index a single record synchronously and return its vector.
    ///
    /// Re-indexing an already indexed record returns the stored vector.
    pub fn index(&self, record: &CommandRecord) -> Result<EmbeddingVector, IndexError> {
        let (environment, _) = record.id.parts()?;
        let index = self.open_index(&environment, true)?;
        if let Some(existing) = index.snapshot().get(&record.id) {
            return Ok(existing.clone());
        }
        let vector = self.embed_record(record);
        index.commit(vec![vector.clone()])?;
        Ok(vector)
    }

    /// Index a batch of records of one environment. Returns how many were new.
    pub fn index_batch(
        &self,
        environment: &EnvironmentId,
        records: &[CommandRecord],
    ) -> Result<usize, IndexError> {
        let index = self.open_index(environment, true)?;
        let snapshot = index.snapshot();
        let vectors: Vec<_> = records
            .iter()
            .filter(|r| !snapshot.contains(&r.id))
            .map(|r| self.embed_record(r))
            .collect();
        index.commit(vectors)
    }

    /// Top `k` indexed records of `environment` most similar to `query`.
    pub fn search(
        &self,
        query: &str,
        environment: &EnvironmentId,
        k: usize,
    ) -> Result<Vec<SearchHit>, IndexError> {
        let index = self.open_index(environment, false)?;
        let snapshot = index.snapshot();
        let query_vec = self.embedder.embed(query);
        if let Some(dims) = snapshot.dims() {
            if dims != query_vec.len() {
                return Err(IndexError::DimensionMismatch {
                    expected: dims,
                    actual: query_vec.len(),
                });
            }
        }
        let hits = snapshot.search(&query_vec, k);
        tracing::debug!(environment = %environment, k, found = hits.len(), "searched index");
        Ok(hits)
    }

    /// Number of indexed records, or `Unavailable` when never built.
    pub fn indexed_count(&self, environment: &EnvironmentId) -> Result<usize, IndexError> {
        Ok(self.open_index(environment, false)?.snapshot().len())
    }

    /// Rebuild the index of `environment` from its command log.
    pub fn rebuild(
        &self,
        store: &RecordStore,
        environment: &EnvironmentId,
    ) -> Result<usize, IndexError> {
        let mut indexes = self.lock_indexes();
        indexes.remove(environment);
        let (index, count) = rebuild_index(store, self.embedder.as_ref(), environment)?;
        indexes.insert(environment.clone(), Arc::new(index));
        Ok(count)
    }

    fn embed_record(&self, record: &CommandRecord) -> EmbeddingVector {
        let values = self.embedder.embed(&record.command);
        EmbeddingVector::for_record(record, self.embedder.model_name(), values)
    }

    fn open_index(
        &self,
        environment: &EnvironmentId,
        create: bool,
    ) -> Result<Arc<VectorIndex>, IndexError> {
        let mut indexes = self.lock_indexes();
        if let Some(index) = indexes.get(environment) {
            return Ok(Arc::clone(index));
        }
        let index = if create {
            VectorIndex::create(&self.data, environment)?
        } else {
            VectorIndex::open(&self.data, environment)?
        };
        let index = Arc::new(index);
        indexes.insert(environment.clone(), Arc::clone(&index));
        Ok(index)
    }

    fn lock_indexes(&self) -> std::sync::MutexGuard<'_, HashMap<EnvironmentId, Arc<VectorIndex>>> {
        self.indexes
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use ph_core::model::{Environment, RecordDraft};
    use tempfile::TempDir;

    fn setup() -> (TempDir, RecordStore, SearchEngine, Environment) {
        let tmp = TempDir::new().unwrap();
        let data = DataDir::open(tmp.path()).unwrap();
        let env = Environment::new(EnvironmentId("e1".into()), tmp.path().into(), None);
        data.write_environment(&env).unwrap();
        let engine = SearchEngine::new(data.clone(), Arc::new(HashingEmbedder::default()));
        (tmp, RecordStore::new(data), engine, env)
    }

    #[test]
    fn test_search_before_index_is_unavailable() {
        let (_tmp, _store, engine, env) = setup();
        assert!(matches!(
            engine.search("git", &env.id, 3),
            Err(IndexError::Unavailable { .. })
        ));
    }

    #[test]
    fn test_self_retrieval() {
        let (_tmp, store, engine, env) = setup();
        let commands = [
            "git status",
            "ls -la",
            "git commit -m fix",
            "cargo build --release",
            "docker compose up -d",
        ];
        let mut records = Vec::new();
        for cmd in commands {
            let record = store
                .append_record(Some(&env), RecordDraft::new(cmd, "/w"))
                .unwrap();
            engine.index(&record).unwrap();
            records.push(record);
        }

        for record in &records {
            let hits = engine.search(&record.command, &env.id, 3).unwrap();
            assert!(
                hits.iter().any(|h| h.record == record.id),
                "{} not retrieved",
                record.command
            );
            assert_eq!(hits[0].record, record.id);
        }
    }

    #[test]
    fn test_search_respects_k() {
        let (_tmp, store, engine, env) = setup();
        for cmd in ["a b", "b c", "c d", "d e"] {
            let record = store
                .append_record(Some(&env), RecordDraft::new(cmd, "/w"))
                .unwrap();
            engine.index(&record).unwrap();
        }
        assert_eq!(engine.search("b", &env.id, 2).unwrap().len(), 2);
        assert_eq!(engine.search("b", &env.id, 10).unwrap().len(), 4);
    }

    #[test]
    fn test_index_is_idempotent() {
        let (_tmp, store, engine, env) = setup();
        let record = store
            .append_record(Some(&env), RecordDraft::new("make test", "/w"))
            .unwrap();
        let first = engine.index(&record).unwrap();
        let second = engine.index(&record).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.indexed_count(&env.id).unwrap(), 1);
    }

    #[test]
    fn test_search_only_returns_indexed_records() {
        let (_tmp, store, engine, env) = setup();
        let indexed = store
            .append_record(Some(&env), RecordDraft::new("git push", "/w"))
            .unwrap();
        engine.index(&indexed).unwrap();
        store
            .append(Some(&env), RecordDraft::new("git push --force", "/w"))
            .unwrap();

        let hits = engine.search("git push", &env.id, 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].record, indexed.id);
    }

    #[test]
    fn test_rebuild_indexes_whole_log() {
        let (_tmp, store, engine, env) = setup();
        for cmd in ["one", "two", "three"] {
            store.append(Some(&env), RecordDraft::new(cmd, "/w")).unwrap();
        }
        assert_eq!(engine.rebuild(&store, &env.id).unwrap(), 3);
        assert_eq!(engine.indexed_count(&env.id).unwrap(), 3);
        // Rebuilding again starts from an empty file.
        assert_eq!(engine.rebuild(&store, &env.id).unwrap(), 3);
    }
}
