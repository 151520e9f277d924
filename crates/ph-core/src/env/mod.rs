pub mod manager;
pub mod source;

pub use manager::{
    EnvPhase, EnvironmentManager, NoPendingWrites, PendingWrites, SourceResolver,
};
pub use source::EnvSource;
