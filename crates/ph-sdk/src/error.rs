use ph_core::CoreError;
use ph_index::IndexError;
use ph_protocol::ProtocolError;

#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Index(#[from] IndexError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SdkError {
    /// The innermost core error, if this wraps one.
    pub fn core(&self) -> Option<&CoreError> {
        match self {
            SdkError::Core(e) => Some(e),
            SdkError::Index(IndexError::Core(e)) => Some(e),
            SdkError::Protocol(ProtocolError::Core(e)) => Some(e),
            _ => None,
        }
    }

    pub fn is_no_active_environment(&self) -> bool {
        matches!(self.core(), Some(CoreError::NoActiveEnvironment))
    }

    /// Failures of git or of reaching a remote.
    pub fn is_git_failure(&self) -> bool {
        match self {
            SdkError::Protocol(ProtocolError::Core(_) | ProtocolError::NothingToCommit { .. }) => {
                false
            }
            SdkError::Protocol(_) => true,
            other => matches!(other.core(), Some(CoreError::Git(_))),
        }
    }
}
