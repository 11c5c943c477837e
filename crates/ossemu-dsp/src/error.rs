use pcm_engine::EngineError;
use thiserror::Error;

pub type DspResult<T> = std::result::Result<T, DspError>;

/// Errors surfaced to callers of the legacy device entry points.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DspError {
    #[error("parameter negotiation failed: {0}")]
    Config(#[source] EngineError),
    #[error("engine error: {0}")]
    Engine(#[from] EngineError),
    #[error("bad descriptor: {0}")]
    BadDescriptor(String),
    #[error("no such control: {0:#x}")]
    NoSuchControl(u64),
    #[error("invalid argument: {0}")]
    Invalid(String),
    #[error("no such device: {0}")]
    NoEntry(String),
}

impl DspError {
    pub fn bad_descriptor(message: impl Into<String>) -> Self {
        DspError::BadDescriptor(message.into())
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        DspError::Invalid(message.into())
    }

    /// The errno a legacy caller expects for this error.
    pub fn errno(&self) -> i32 {
        match self {
            DspError::Config(err) | DspError::Engine(err) => err.errno(),
            DspError::BadDescriptor(_) => libc::EBADFD,
            DspError::NoSuchControl(_) => libc::ENXIO,
            DspError::Invalid(_) => libc::EINVAL,
            DspError::NoEntry(_) => libc::ENOENT,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_follows_engine_error() {
        assert_eq!(DspError::Engine(EngineError::WouldBlock).errno(), libc::EAGAIN);
        assert_eq!(DspError::Config(EngineError::invalid("rate")).errno(), libc::EINVAL);
        assert_eq!(DspError::NoSuchControl(0x5000).errno(), libc::ENXIO);
        assert_eq!(DspError::bad_descriptor("closed").errno(), libc::EBADFD);
    }
}
