use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read as _, Seek, SeekFrom};
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use ph_core::model::EnvironmentId;
use ph_core::storage::DataDir;

use super::reader::{parse_vectors, IndexSnapshot};
use super::vector::{EmbeddingVector, SearchHit};
use super::writer::append_vectors;
use crate::error::IndexError;

/// The vector index of one environment: `envs/<id>/vectors.jsonl` plus the
/// published in-memory snapshot.
pub struct VectorIndex {
    environment: EnvironmentId,
    path: PathBuf,
    snapshot: RwLock<Arc<IndexSnapshot>>,
}

impl VectorIndex {
    /// Whether the index file has been built for `environment`.
    pub fn exists(data: &DataDir, environment: &EnvironmentId) -> bool {
        data.vectors_path(environment).exists()
    }

    /// Open a built index. Fails with [`IndexError::Unavailable`] otherwise.
    pub fn open(data: &DataDir, environment: &EnvironmentId) -> Result<Self, IndexError> {
        let path = data.vectors_path(environment);
        let contents = match fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(IndexError::Unavailable {
                    environment: environment.clone(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let (entries, _) = parse_vectors(&contents);
        Ok(Self {
            environment: environment.clone(),
            path,
            snapshot: RwLock::new(Arc::new(IndexSnapshot::new(entries))),
        })
    }

    /// Open the index, creating an empty one if it was never built.
    pub fn create(data: &DataDir, environment: &EnvironmentId) -> Result<Self, IndexError> {
        let path = data.vectors_path(environment);
        if !path.exists() {
            fs::create_dir_all(data.env_dir(environment))?;
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)?;
            tracing::debug!(environment = %environment, "created vector index");
        }
        Self::open(data, environment)
    }

    pub fn environment(&self) -> &EnvironmentId {
        &self.environment
    }

    /// The current snapshot. Cheap; callers may hold it as long as they like.
    pub fn snapshot(&self) -> Arc<IndexSnapshot> {
        match self.snapshot.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn search(&self, query: &[f32], k: usize) -> Vec<SearchHit> {
        self.snapshot().search(query, k)
    }

    /// Persist `vectors` and publish them. Already-indexed records are
    /// skipped; returns how many were newly written.
    ///
    /// The file is re-read under an exclusive lock first so vectors written
    /// by other processes are neither duplicated nor hidden.
    pub fn commit(&self, vectors: Vec<EmbeddingVector>) -> Result<usize, IndexError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;
        fs2::FileExt::lock_exclusive(&file)?;
        let result = self.commit_locked(&mut file, vectors);
        fs2::FileExt::unlock(&file)?;
        result
    }

    fn commit_locked(
        &self,
        file: &mut File,
        vectors: Vec<EmbeddingVector>,
    ) -> Result<usize, IndexError> {
        let mut contents = String::new();
        file.seek(SeekFrom::Start(0))?;
        file.read_to_string(&mut contents)?;
        let (entries, complete_len) = parse_vectors(&contents);

        let expected = entries
            .first()
            .map(|e| e.dims())
            .or_else(|| vectors.first().map(|v| v.dims()));
        let mut seen: HashSet<_> = entries.iter().map(|e| e.record.clone()).collect();
        let mut fresh = Vec::with_capacity(vectors.len());
        for vector in vectors {
            if let Some(expected) = expected {
                if vector.dims() != expected {
                    return Err(IndexError::DimensionMismatch {
                        expected,
                        actual: vector.dims(),
                    });
                }
            }
            if seen.insert(vector.record.clone()) {
                fresh.push(vector);
            }
        }

        append_vectors(file, complete_len as u64, &fresh)?;

        let written = fresh.len();
        let mut snapshot = IndexSnapshot::new(entries);
        snapshot.extend(fresh);
        self.publish(snapshot);
        if written > 0 {
            tracing::debug!(environment = %self.environment, written, "committed vectors");
        }
        Ok(written)
    }

    fn publish(&self, snapshot: IndexSnapshot) {
        let snapshot = Arc::new(snapshot);
        match self.snapshot.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
    }
}
