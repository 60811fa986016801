//! Error types for the send engine.

use snapsend_stream::StreamError;
use snapsend_tree::TreeError;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for send operations.
pub type SendResult<T> = Result<T, SendError>;

/// Coarse classification of a [`SendError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// An expected tree item is absent.
    NotFound,
    /// An internal consistency check failed or a snapshot changed mid-walk.
    Inconsistent,
    /// A command would exceed the maximum framed size.
    Overflow,
    /// Sink or content read failure.
    Io,
    /// An inode type outside the supported set.
    Unsupported,
    /// The session configuration was rejected.
    InvalidConfig,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NotFound => "not found",
            Self::Inconsistent => "inconsistent",
            Self::Overflow => "overflow",
            Self::Io => "i/o",
            Self::Unsupported => "unsupported",
            Self::InvalidConfig => "invalid config",
        };
        f.write_str(name)
    }
}

/// Errors that abort a send.
///
/// Every error is fatal: a partial stream is never valid, so nothing is
/// retried and no further output is produced after one is returned.
#[derive(Debug, Error)]
pub enum SendError {
    /// An expected tree item is absent.
    #[error("not found: {what}")]
    NotFound {
        /// Description of the missing item.
        what: String,
    },

    /// An internal consistency check failed.
    #[error("inconsistent: {message}")]
    Inconsistent {
        /// Description of the violated expectation.
        message: String,
    },

    /// A command would exceed the maximum framed size.
    #[error("command overflow: {0}")]
    Overflow(StreamError),

    /// Sink or content read failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An inode type outside the supported set.
    #[error("unsupported inode type {mode:#o} for inode {ino}")]
    Unsupported {
        /// Inode number.
        ino: u64,
        /// Full mode bits.
        mode: u32,
    },

    /// The session configuration was rejected.
    #[error("invalid config: {message}")]
    InvalidConfig {
        /// Why the configuration is invalid.
        message: String,
    },
}

impl SendError {
    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound { what: what.into() }
    }

    /// Creates an inconsistency error.
    pub fn inconsistent(message: impl Into<String>) -> Self {
        Self::Inconsistent {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns the error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound { .. } => ErrorKind::NotFound,
            Self::Inconsistent { .. } => ErrorKind::Inconsistent,
            Self::Overflow(_) => ErrorKind::Overflow,
            Self::Io(_) => ErrorKind::Io,
            Self::Unsupported { .. } => ErrorKind::Unsupported,
            Self::InvalidConfig { .. } => ErrorKind::InvalidConfig,
        }
    }
}

impl From<TreeError> for SendError {
    fn from(err: TreeError) -> Self {
        match err {
            TreeError::Io(e) => Self::Io(e),
            TreeError::NotFound(what) => Self::NotFound { what },
            other => Self::inconsistent(other.to_string()),
        }
    }
}

impl From<StreamError> for SendError {
    fn from(err: StreamError) -> Self {
        match err {
            StreamError::Io(e) => Self::Io(e),
            overflow @ StreamError::Overflow { .. } => Self::Overflow(overflow),
            other => Self::inconsistent(other.to_string()),
        }
    }
}
