//! Session API over the ph crates.
//!
//! # Example
//! ```no_run
//! use ph_sdk::{RecordDraft, Session};
//!
//! let session = Session::open(Session::default_root()).unwrap();
//! session.load(".", &Default::default()).unwrap();
//! session
//!     .capture(RecordDraft::new("cargo test", ".").exit_code(0))
//!     .unwrap();
//! for m in session.search("run the tests", None).unwrap() {
//!     println!("{:.3} {}", m.score, m.record.command);
//! }
//! session.close().unwrap();
//! ```

mod error;
mod session;

pub use error::SdkError;
pub use session::{SearchMatch, Session};

// Re-export types callers of the session API need
pub use ph_core::group::GroupTag;
pub use ph_core::model::{
    CommandRecord, CommitSnapshot, Environment, EnvironmentId, RecordDraft, RecordId,
};
pub use ph_core::{EnvPhase, EnvSource, PhConfig};
pub use ph_index::{Answer, AnswerSource};
pub use ph_protocol::CancelToken;
