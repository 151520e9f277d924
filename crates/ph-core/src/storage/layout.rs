use std::fs;
use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::model::{Environment, EnvironmentId};

const ENVS_DIR: &str = "envs";
const LOCKS_DIR: &str = "locks";
const STAGING_DIR: &str = "staging";
const META_FILE: &str = "meta.json";
const RECORDS_FILE: &str = "records.jsonl";
const VECTORS_FILE: &str = "vectors.jsonl";
const SNAPSHOTS_FILE: &str = "snapshots.json";
const CHECKOUT_DIR: &str = "checkout";
const POINTER_FILE: &str = "active";
const CONFIG_FILE: &str = "config";

/// The per-user data directory.
///
/// ```text
/// <root>/config
/// <root>/active
/// <root>/envs/<env-id>/{meta.json,records.jsonl,vectors.jsonl,snapshots.json}
/// <root>/locks/<key>.lock
/// <root>/staging/
/// ```
#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
}

impl DataDir {
    /// Use `root` as the data directory, creating it if needed.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        fs::create_dir_all(root.join(ENVS_DIR))?;
        fs::create_dir_all(root.join(LOCKS_DIR))?;
        Ok(Self { root })
    }

    /// `$HOME/.ph`, or `./.ph` when no home directory is set.
    pub fn default_root() -> PathBuf {
        std::env::var_os("HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".ph")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_path(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn pointer_path(&self) -> PathBuf {
        self.root.join(POINTER_FILE)
    }

    pub fn env_dir(&self, id: &EnvironmentId) -> PathBuf {
        self.root.join(ENVS_DIR).join(id.as_str())
    }

    pub fn meta_path(&self, id: &EnvironmentId) -> PathBuf {
        self.env_dir(id).join(META_FILE)
    }

    pub fn records_path(&self, id: &EnvironmentId) -> PathBuf {
        self.env_dir(id).join(RECORDS_FILE)
    }

    pub fn vectors_path(&self, id: &EnvironmentId) -> PathBuf {
        self.env_dir(id).join(VECTORS_FILE)
    }

    pub fn snapshots_path(&self, id: &EnvironmentId) -> PathBuf {
        self.env_dir(id).join(SNAPSHOTS_FILE)
    }

    pub fn checkout_dir(&self, id: &EnvironmentId) -> PathBuf {
        self.env_dir(id).join(CHECKOUT_DIR)
    }

    /// Lock file for `key`. Keys are sanitized to a flat file name.
    pub fn lock_path(&self, key: &str) -> PathBuf {
        let name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.root.join(LOCKS_DIR).join(format!("{name}.lock"))
    }

    /// Scratch area for clones that have not been materialized yet.
    pub fn staging_dir(&self) -> PathBuf {
        self.root.join(STAGING_DIR)
    }

    pub fn has_environment(&self, id: &EnvironmentId) -> bool {
        self.meta_path(id).exists()
    }

    /// Read an environment's metadata.
    pub fn read_environment(&self, id: &EnvironmentId) -> Result<Environment, CoreError> {
        let path = self.meta_path(id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CoreError::NotFound {
                    id: id.to_string(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        let env: Environment =
            serde_json::from_slice(&data).map_err(|e| CoreError::CorruptEnvironment {
                id: id.to_string(),
                reason: format!("unreadable meta.json: {e}"),
            })?;
        if &env.id != id {
            return Err(CoreError::CorruptEnvironment {
                id: id.to_string(),
                reason: format!("meta.json names environment {}", env.id),
            });
        }
        Ok(env)
    }

    /// Write an environment's metadata, creating its directory.
    pub fn write_environment(&self, env: &Environment) -> Result<(), CoreError> {
        fs::create_dir_all(self.env_dir(&env.id))?;
        let json = serde_json::to_vec_pretty(env)?;
        write_atomic(&self.meta_path(&env.id), &json)
    }

    /// All environment identifiers with a directory on disk.
    pub fn environment_ids(&self) -> Result<Vec<EnvironmentId>, CoreError> {
        let mut ids = Vec::new();
        for entry in fs::read_dir(self.root.join(ENVS_DIR))? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                if let Ok(id) = EnvironmentId::parse(name) {
                    ids.push(id);
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

/// Write `bytes` to a sibling temp file, fsync, then rename over `path`.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), CoreError> {
    use std::io::Write as _;

    let tmp = path.with_extension("tmp");
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
