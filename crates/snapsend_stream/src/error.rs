//! Error types for the stream crate.

use std::io;
use thiserror::Error;

/// Result type for stream operations.
pub type StreamResult<T> = Result<T, StreamError>;

/// Errors that can occur while encoding or decoding a send stream.
#[derive(Debug, Error)]
pub enum StreamError {
    /// Writing to the sink or reading the stream failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// A command would exceed the maximum framed size.
    #[error("command {command} overflows: needs {needed} bytes, limit {limit}")]
    Overflow {
        /// Name of the command being built.
        command: &'static str,
        /// Bytes the command would occupy.
        needed: usize,
        /// Configured maximum command size.
        limit: usize,
    },

    /// An encoder call was made in the wrong state.
    #[error("invalid encoder state: {0}")]
    InvalidState(&'static str),

    /// The stream does not start with the expected magic.
    #[error("bad stream magic")]
    BadMagic,

    /// The stream version is not supported.
    #[error("unsupported stream version {0}")]
    UnsupportedVersion(u32),

    /// A command checksum did not match its contents.
    #[error("checksum mismatch in {command}: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch {
        /// Name of the command.
        command: &'static str,
        /// Checksum stored in the header.
        stored: u32,
        /// Checksum computed over the command.
        computed: u32,
    },

    /// The stream ended inside a command.
    #[error("stream truncated: {0}")]
    Truncated(&'static str),

    /// Unknown command number.
    #[error("unknown command {0}")]
    UnknownCommand(u16),

    /// Unknown attribute number.
    #[error("unknown attribute {0}")]
    UnknownAttribute(u16),

    /// A required attribute is missing from a decoded command.
    #[error("{command} is missing attribute {attribute}")]
    MissingAttribute {
        /// Name of the command.
        command: &'static str,
        /// Name of the attribute.
        attribute: &'static str,
    },

    /// An attribute value has the wrong size.
    #[error("attribute {attribute} has {len} bytes, expected {expected}")]
    BadAttributeLength {
        /// Name of the attribute.
        attribute: &'static str,
        /// Actual length.
        len: usize,
        /// Expected length.
        expected: usize,
    },
}
