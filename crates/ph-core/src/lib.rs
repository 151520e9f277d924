//! Core of `ph`: the per-environment command log, the environment
//! lifecycle, and the on-disk layout shared by the other crates.

pub mod config;
pub mod env;
pub mod error;
pub mod group;
pub mod model;
pub mod storage;

pub use config::PhConfig;
pub use env::{EnvPhase, EnvSource, EnvironmentManager, PendingWrites, SourceResolver};
pub use error::CoreError;
pub use storage::{DataDir, RecordStore};
