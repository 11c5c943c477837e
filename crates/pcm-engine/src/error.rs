use thiserror::Error;

use crate::PcmState;

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors reported by a PCM engine handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("stream xrun")]
    Xrun,
    #[error("stream suspended")]
    Suspended,
    #[error("operation would block")]
    WouldBlock,
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("operation not allowed in state {0:?}")]
    BadState(PcmState),
    #[error("device not found: {0}")]
    NotFound(String),
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
    #[error("device error: {0}")]
    Device(String),
}

impl EngineError {
    pub fn invalid(message: impl Into<String>) -> Self {
        EngineError::InvalidArgument(message.into())
    }

    /// Conditions a caller may recover from by preparing or resuming the stream.
    pub fn is_transient(&self) -> bool {
        matches!(self, EngineError::Xrun | EngineError::Suspended)
    }

    pub fn errno(&self) -> i32 {
        match self {
            EngineError::Xrun => libc::EPIPE,
            EngineError::Suspended => libc::ESTRPIPE,
            EngineError::WouldBlock => libc::EAGAIN,
            EngineError::InvalidArgument(_) => libc::EINVAL,
            EngineError::BadState(_) => libc::EBADFD,
            EngineError::NotFound(_) => libc::ENOENT,
            EngineError::Unsupported(_) => libc::ENOSYS,
            EngineError::Device(_) => libc::EIO,
        }
    }
}
