//! # Snapsend Stream
//!
//! Binary framing of send streams.
//!
//! A stream is a header followed by a sequence of commands:
//!
//! ```text
//! header:  "btrfs-stream\0" | version: u32
//! command: len: u32 | cmd: u16 | crc: u32 | attribute*
//! attr:    type: u16 | len: u16 | value
//! ```
//!
//! All integers are little-endian. `len` counts the attribute bytes only.
//! `crc` is CRC-32C over the whole command with the `crc` field zeroed.
//!
//! ## Usage
//!
//! ```
//! use snapsend_stream::{decode_stream, AttributeType, CommandEncoder, CommandType};
//!
//! let mut encoder = CommandEncoder::new(Vec::new(), 64 * 1024);
//! encoder.write_header().unwrap();
//! encoder.begin(CommandType::Mkdir).unwrap();
//! encoder.put_path(AttributeType::Path, b"docs").unwrap();
//! encoder.put_u64(AttributeType::Ino, 257).unwrap();
//! encoder.finish().unwrap();
//!
//! let commands = decode_stream(&encoder.into_sink()).unwrap();
//! assert_eq!(commands[0].kind, CommandType::Mkdir);
//! assert_eq!(commands[0].get_u64(AttributeType::Ino).unwrap(), 257);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod decoder;
mod encoder;
mod error;
mod sink;

pub use command::{
    command_crc, AttributeType, CommandType, CMD_HEADER_SIZE, DEFAULT_MAX_COMMAND_SIZE,
    STREAM_HEADER_SIZE, STREAM_MAGIC, STREAM_VERSION, TIMESPEC_SIZE, TLV_HEADER_SIZE, UUID_SIZE,
};
pub use decoder::{decode_stream, Attribute, Command, StreamReader};
pub use encoder::{CommandEncoder, CommandStats, StreamStats};
pub use error::{StreamError, StreamResult};
pub use sink::{Sink, WriteSink};
