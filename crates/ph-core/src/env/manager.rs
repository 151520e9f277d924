use std::fs::OpenOptions;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use super::source::EnvSource;
use crate::error::CoreError;
use crate::model::{Environment, EnvironmentId, RepoRef};
use crate::storage::{ActivePointer, DataDir};

const POINTER_LOCK: &str = "active";

/// Work that must be durable before an environment is deactivated
/// (the index worker's queue, in practice).
pub trait PendingWrites {
    fn flush(&self, environment: &EnvironmentId) -> Result<(), CoreError>;
}

/// For callers with nothing buffered.
pub struct NoPendingWrites;

impl PendingWrites for NoPendingWrites {
    fn flush(&self, _environment: &EnvironmentId) -> Result<(), CoreError> {
        Ok(())
    }
}

/// Turns a git reference into a materialized environment.
pub trait SourceResolver {
    type Error: From<CoreError>;

    fn resolve(&self, data: &DataDir, reference: &str) -> Result<Environment, Self::Error>;
}

/// Observable lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvPhase {
    NoEnvironment,
    Loading,
    Active,
    Exiting,
}

#[derive(Debug)]
enum EnvState {
    NoEnvironment,
    Loading { prior: Option<Environment> },
    Active(Environment),
    Exiting(Environment),
}

impl EnvState {
    fn phase(&self) -> EnvPhase {
        match self {
            EnvState::NoEnvironment => EnvPhase::NoEnvironment,
            EnvState::Loading { .. } => EnvPhase::Loading,
            EnvState::Active(_) => EnvPhase::Active,
            EnvState::Exiting(_) => EnvPhase::Exiting,
        }
    }

    fn settled(env: Option<Environment>) -> Self {
        match env {
            Some(env) => EnvState::Active(env),
            None => EnvState::NoEnvironment,
        }
    }
}

/// Owns the active-environment state of a data directory.
///
/// `NoEnvironment → Loading → Active → Exiting → NoEnvironment`. Loads and
/// exits are serialized; the switch itself is a single rename of the
/// pointer file taken under an exclusive file lock, so there is no moment
/// at which two environments are active.
pub struct EnvironmentManager {
    data: DataDir,
    state: Mutex<EnvState>,
    transition: Mutex<()>,
}

impl EnvironmentManager {
    /// Restore state from the data directory's pointer file.
    pub fn open(data: DataDir) -> Self {
        let state = match ActivePointer::read(&data) {
            Some(pointer) => match data.read_environment(&pointer.environment) {
                Ok(mut env) => {
                    env.active = true;
                    EnvState::Active(env)
                }
                Err(e) => {
                    tracing::warn!(
                        environment = %pointer.environment,
                        "ignoring stale active pointer: {e}"
                    );
                    EnvState::NoEnvironment
                }
            },
            None => EnvState::NoEnvironment,
        };
        Self {
            data,
            state: Mutex::new(state),
            transition: Mutex::new(()),
        }
    }

    pub fn phase(&self) -> EnvPhase {
        self.state().phase()
    }

    /// The active environment, if any.
    pub fn current(&self) -> Option<Environment> {
        match &*self.state() {
            EnvState::Active(env) => Some(env.clone()),
            _ => None,
        }
    }

    /// Load a local directory as the active environment.
    pub fn load(&self, path: &Path) -> Result<Environment, CoreError> {
        self.load_with(|data| open_local(data, path))
    }

    /// Load a local directory or a git reference as the active environment.
    pub fn load_source<R: SourceResolver>(
        &self,
        source: &EnvSource,
        resolver: &R,
    ) -> Result<Environment, R::Error> {
        match source {
            EnvSource::Local(path) => {
                self.load_with(|data| open_local(data, path).map_err(R::Error::from))
            }
            EnvSource::Git(reference) => self.load_with(|data| resolver.resolve(data, reference)),
        }
    }

    /// Load the environment produced by `resolve` and make it active.
    ///
    /// On failure the previous state is restored unchanged.
    pub fn load_with<E, F>(&self, resolve: F) -> Result<Environment, E>
    where
        F: FnOnce(&DataDir) -> Result<Environment, E>,
        E: From<CoreError>,
    {
        let _transition = lock(&self.transition);
        let prior = {
            let mut state = self.state();
            let prior = match &*state {
                EnvState::Active(env) => Some(env.clone()),
                _ => None,
            };
            *state = EnvState::Loading {
                prior: prior.clone(),
            };
            prior
        };

        let outcome = resolve(&self.data).and_then(|env| self.activate(env).map_err(E::from));

        let mut state = self.state();
        match outcome {
            Ok(env) => {
                if let Some(prior) = prior.filter(|p| p.id != env.id) {
                    tracing::info!(environment = %prior.id, "deactivated environment");
                }
                tracing::info!(environment = %env.id, workdir = %env.workdir.display(), "activated environment");
                *state = EnvState::Active(env.clone());
                Ok(env)
            }
            Err(e) => {
                *state = match std::mem::replace(&mut *state, EnvState::NoEnvironment) {
                    EnvState::Loading { prior } => EnvState::settled(prior),
                    other => other,
                };
                Err(e)
            }
        }
    }

    /// Flush pending writes, then deactivate the active environment.
    pub fn exit(&self, pending: &dyn PendingWrites) -> Result<Environment, CoreError> {
        let _transition = lock(&self.transition);
        let env = {
            let mut state = self.state();
            let env = match &*state {
                EnvState::Active(env) => env.clone(),
                _ => return Err(CoreError::NoActiveEnvironment),
            };
            *state = EnvState::Exiting(env.clone());
            env
        };

        let outcome = pending
            .flush(&env.id)
            .and_then(|()| self.deactivate(&env.id));

        let mut state = self.state();
        match outcome {
            Ok(()) => {
                *state = EnvState::NoEnvironment;
                tracing::info!(environment = %env.id, "exited environment");
                let mut env = env;
                env.active = false;
                Ok(env)
            }
            Err(e) => {
                *state = EnvState::Active(env);
                Err(e)
            }
        }
    }

    /// Every environment known to the data directory.
    pub fn list(&self) -> Result<Vec<Environment>, CoreError> {
        let active = self.current().map(|e| e.id);
        let mut envs = Vec::new();
        for id in self.data.environment_ids()? {
            match self.data.read_environment(&id) {
                Ok(mut env) => {
                    env.active = active.as_ref() == Some(&env.id);
                    envs.push(env);
                }
                Err(e) => tracing::warn!(environment = %id, "skipping unreadable environment: {e}"),
            }
        }
        Ok(envs)
    }

    pub fn data_dir(&self) -> &DataDir {
        &self.data
    }

    fn activate(&self, mut env: Environment) -> Result<Environment, CoreError> {
        let lock_file = self.pointer_lock()?;
        let written = ActivePointer::new(env.id.clone()).write(&self.data);
        fs2::FileExt::unlock(&lock_file).map_err(CoreError::Io)?;
        written?;
        env.active = true;
        Ok(env)
    }

    fn deactivate(&self, id: &EnvironmentId) -> Result<(), CoreError> {
        let lock_file = self.pointer_lock()?;
        // Another process may have switched environments since we loaded.
        let cleared = match ActivePointer::read(&self.data) {
            Some(pointer) if &pointer.environment == id => ActivePointer::clear(&self.data),
            _ => Ok(()),
        };
        fs2::FileExt::unlock(&lock_file).map_err(CoreError::Io)?;
        cleared
    }

    fn pointer_lock(&self) -> Result<std::fs::File, CoreError> {
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.data.lock_path(POINTER_LOCK))?;
        fs2::FileExt::lock_exclusive(&file).map_err(CoreError::Io)?;
        Ok(file)
    }

    fn state(&self) -> MutexGuard<'_, EnvState> {
        lock(&self.state)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Open (or create) the environment for a local directory.
fn open_local(data: &DataDir, path: &Path) -> Result<Environment, CoreError> {
    if !path.is_dir() {
        return Err(CoreError::SourceNotFound(path.display().to_string()));
    }
    let workdir = path.canonicalize()?;
    let repo = RepoRef::discover(&workdir);
    let id = match fetched_environment(data, &workdir)? {
        Some(id) => id,
        None => EnvironmentId::derive(&workdir, repo.as_ref().and_then(|r| r.remote.as_deref())),
    };

    let env = if data.has_environment(&id) {
        let mut env = data.read_environment(&id)?;
        if repo.is_some() && env.repo != repo {
            env.repo = repo;
            data.write_environment(&env)?;
        }
        env
    } else {
        let env = Environment::new(id, workdir, repo);
        data.write_environment(&env)?;
        tracing::info!(environment = %env.id, "created environment");
        env
    };
    Ok(env)
}

/// The environment whose fetched checkout is `workdir`, if any. Such a
/// checkout keeps the identity it was fetched under.
fn fetched_environment(
    data: &DataDir,
    workdir: &Path,
) -> Result<Option<EnvironmentId>, CoreError> {
    if !workdir.starts_with(data.root().canonicalize()?) {
        return Ok(None);
    }
    Ok(data.environment_ids()?.into_iter().find(|id| {
        data.checkout_dir(id)
            .canonicalize()
            .is_ok_and(|checkout| checkout == workdir)
    }))
}
