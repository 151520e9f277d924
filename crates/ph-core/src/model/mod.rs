pub mod environment;
pub mod record;
pub mod snapshot;

pub use environment::{Environment, EnvironmentId, RepoRef};
pub use record::{CommandRecord, RecordDraft, RecordId};
pub use snapshot::CommitSnapshot;
