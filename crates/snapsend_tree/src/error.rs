//! Error types for snapshot tree access.

use std::io;
use thiserror::Error;

/// Result type for tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Errors that can occur while reading or mutating a snapshot tree.
#[derive(Debug, Error)]
pub enum TreeError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An item payload could not be decoded.
    #[error("corrupted item {key}: {message}")]
    Corrupted {
        /// Key of the offending item, rendered for display.
        key: String,
        /// Description of the problem.
        message: String,
    },

    /// A path or inode referenced by a mutation does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A path referenced by a mutation already exists.
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// The mutation is not valid for the inode it targets.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl TreeError {
    /// Creates a corruption error for an item.
    pub fn corrupted(key: impl std::fmt::Display, message: impl Into<String>) -> Self {
        Self::Corrupted {
            key: key.to_string(),
            message: message.into(),
        }
    }

    /// Creates a not-found error.
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    /// Creates an invalid-operation error.
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidOperation(message.into())
    }
}
