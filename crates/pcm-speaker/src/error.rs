//! Error kinds surfaced by the speaker engine.

use thiserror::Error;

/// Errors returned by every fallible speaker operation.
///
/// The variants map one-to-one onto the failure classes callers need to react to:
/// bad configuration, unusable device, lifecycle misuse and runtime I/O.
#[derive(Error, Debug, Clone)]
pub enum SpeakerError {
    /// A configuration value or call argument is out of range.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested output device does not exist or cannot be opened.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// The operation is not valid for the current lifecycle state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Device or file I/O failed.
    #[error("I/O error: {0}")]
    Io(String),
}

/// Convenience result type for speaker operations.
pub type Result<T> = std::result::Result<T, SpeakerError>;

impl SpeakerError {
    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn device_unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub(crate) fn io(msg: impl Into<String>) -> Self {
        Self::Io(msg.into())
    }

    /// Short label for the error kind, used in logs and CLI output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::DeviceUnavailable(_) => "DEVICE_UNAVAILABLE",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

impl From<std::io::Error> for SpeakerError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<hound::Error> for SpeakerError {
    fn from(err: hound::Error) -> Self {
        match err {
            hound::Error::IoError(e) => Self::Io(e.to_string()),
            other => Self::Io(format!("wav: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_error_converts_to_io_kind() {
        let err: SpeakerError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), "IO_ERROR");
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn display_includes_kind_prefix() {
        let err = SpeakerError::invalid_state("speaker already started");
        assert_eq!(err.to_string(), "invalid state: speaker already started");
    }
}
