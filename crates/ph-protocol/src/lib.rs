//! Git bridge: ties environments to repository state.
//!
//! Committing writes the records added since the previous snapshot into a
//! commit on the current branch; fetching clones a repository and
//! materializes the newest environment snapshot found in its history.

pub mod bridge;
pub mod cancel;
pub mod commit;
pub mod error;
pub mod fetch;
pub mod history;
pub mod lock;
pub mod tree;

pub use bridge::{FetchResolver, GitBridge};
pub use cancel::CancelToken;
pub use error::ProtocolError;
pub use history::SnapshotHistory;
pub use tree::{SnapshotManifest, ENVIRONMENT_TRAILER, SNAPSHOT_ROOT};
