use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

/// Length of an environment identifier in hex characters.
pub const ENVIRONMENT_ID_LEN: usize = 16;

/// Identifier of an environment, derived from its working directory and
/// repository remote. Lowercase hex, never contains `-`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EnvironmentId(pub String);

impl EnvironmentId {
    /// Derive the identity for a working directory and optional remote URL.
    pub fn derive(workdir: &Path, remote: Option<&str>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(workdir.to_string_lossy().as_bytes());
        hasher.update(b"\n");
        hasher.update(remote.unwrap_or("").as_bytes());
        let digest = hasher.finalize();
        let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
        Self(hex[..ENVIRONMENT_ID_LEN].to_string())
    }

    /// Derive the identity a local directory would load as.
    ///
    /// The path is canonicalized and, if it sits inside a git repository,
    /// the repository's remote URL takes part in the identity.
    pub fn for_local_path(path: &Path) -> Result<Self, CoreError> {
        let workdir = path
            .canonicalize()
            .map_err(|_| CoreError::SourceNotFound(path.display().to_string()))?;
        let remote = RepoRef::discover(&workdir).and_then(|r| r.remote);
        Ok(Self::derive(&workdir, remote.as_deref()))
    }

    /// Parse and validate an identifier string.
    pub fn parse(s: impl Into<String>) -> Result<Self, CoreError> {
        let s = s.into();
        if s.is_empty() || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CoreError::InvalidId(format!(
                "environment ID must be non-empty hex, got '{s}'"
            )));
        }
        Ok(Self(s.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EnvironmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The repository an environment is associated with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RepoRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit: Option<String>,
}

impl RepoRef {
    /// Inspect the git repository containing `path`, if any.
    pub fn discover(path: &Path) -> Option<Self> {
        let repo = git2::Repository::discover(path).ok()?;
        let remote = remote_url(&repo);
        let commit = repo
            .head()
            .ok()
            .and_then(|h| h.target())
            .map(|oid| oid.to_string());
        Some(Self { remote, commit })
    }
}

/// URL of `origin`, falling back to the first configured remote.
pub fn remote_url(repo: &git2::Repository) -> Option<String> {
    if let Ok(origin) = repo.find_remote("origin") {
        if let Some(url) = origin.url() {
            return Some(url.to_string());
        }
    }
    let names = repo.remotes().ok()?;
    let first = names.iter().flatten().next()?;
    let remote = repo.find_remote(first).ok()?;
    remote.url().map(String::from)
}

/// A named scope holding a log of captured commands.
///
/// Stored as `meta.json` in the environment directory. `active` is not
/// persisted: it is derived from the data directory's pointer file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub workdir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo: Option<RepoRef>,
    pub created_at: DateTime<Utc>,
    #[serde(skip)]
    pub active: bool,
}

impl Environment {
    pub fn new(id: EnvironmentId, workdir: PathBuf, repo: Option<RepoRef>) -> Self {
        Self {
            id,
            workdir,
            repo,
            created_at: Utc::now(),
            active: false,
        }
    }

    pub fn remote(&self) -> Option<&str> {
        self.repo.as_ref().and_then(|r| r.remote.as_deref())
    }
}
