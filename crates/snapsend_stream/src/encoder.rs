//! Command encoder: frames typed attributes into checksummed commands.

use crate::command::{
    command_crc, AttributeType, CommandType, CMD_HEADER_SIZE, STREAM_MAGIC, STREAM_VERSION,
    TLV_HEADER_SIZE,
};
use crate::error::{StreamError, StreamResult};
use crate::sink::Sink;
use std::collections::BTreeMap;

/// Count and byte total for one command type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandStats {
    /// Number of commands emitted.
    pub count: u64,
    /// Framed bytes emitted, headers included.
    pub bytes: u64,
}

/// Totals for everything an encoder has written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Bytes written to the sink, stream header included.
    pub total_bytes: u64,
    /// Per-command totals.
    pub per_command: BTreeMap<CommandType, CommandStats>,
}

impl StreamStats {
    /// Total number of commands.
    #[must_use]
    pub fn commands(&self) -> u64 {
        self.per_command.values().map(|s| s.count).sum()
    }

    /// Number of commands of one type.
    #[must_use]
    pub fn count(&self, cmd: CommandType) -> u64 {
        self.per_command.get(&cmd).map_or(0, |s| s.count)
    }

    fn record(&mut self, cmd: CommandType, bytes: usize) {
        let entry = self.per_command.entry(cmd).or_default();
        entry.count += 1;
        entry.bytes += bytes as u64;
        self.total_bytes += bytes as u64;
    }
}

/// Builds one command at a time and flushes it to a [`Sink`].
///
/// The encoder is either idle or building a single command:
///
/// - [`begin`](Self::begin) reserves the header and starts a command
/// - `put_*` append attributes, failing with [`StreamError::Overflow`] if
///   the command would outgrow the configured maximum
/// - [`finish`](Self::finish) fills in length and checksum and writes the
///   command to the sink
///
/// A command that fails while building never reaches the sink.
///
/// # Example
///
/// ```rust
/// use snapsend_stream::{AttributeType, CommandEncoder, CommandType};
///
/// let mut encoder = CommandEncoder::new(Vec::new(), 64 * 1024);
/// encoder.write_header().unwrap();
/// encoder.begin(CommandType::Unlink).unwrap();
/// encoder.put_path(AttributeType::Path, b"a/b").unwrap();
/// encoder.finish().unwrap();
/// let bytes = encoder.into_sink();
/// assert_eq!(bytes.len(), 17 + 10 + 4 + 3);
/// ```
#[derive(Debug)]
pub struct CommandEncoder<S: Sink> {
    sink: S,
    buf: Vec<u8>,
    max_command_size: usize,
    building: Option<CommandType>,
    stats: StreamStats,
}

impl<S: Sink> CommandEncoder<S> {
    /// Creates an encoder writing to `sink`.
    pub fn new(sink: S, max_command_size: usize) -> Self {
        Self {
            sink,
            buf: Vec::with_capacity(max_command_size.min(64 * 1024)),
            max_command_size,
            building: None,
            stats: StreamStats::default(),
        }
    }

    /// Writes the stream header (magic and version).
    ///
    /// # Errors
    ///
    /// Returns an error if a command is being built or the sink fails.
    pub fn write_header(&mut self) -> StreamResult<()> {
        if self.building.is_some() {
            return Err(StreamError::InvalidState("header written inside a command"));
        }
        let mut header = Vec::with_capacity(STREAM_MAGIC.len() + 4);
        header.extend_from_slice(STREAM_MAGIC);
        header.extend_from_slice(&STREAM_VERSION.to_le_bytes());
        self.sink.write_bytes(&header)?;
        self.stats.total_bytes += header.len() as u64;
        Ok(())
    }

    /// Starts a new command.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidState`] if a command is already being
    /// built, or [`StreamError::Overflow`] if the limit cannot hold a header.
    pub fn begin(&mut self, cmd: CommandType) -> StreamResult<()> {
        if self.building.is_some() {
            return Err(StreamError::InvalidState("begin while building a command"));
        }
        if self.max_command_size < CMD_HEADER_SIZE {
            return Err(StreamError::Overflow {
                command: cmd.name(),
                needed: CMD_HEADER_SIZE,
                limit: self.max_command_size,
            });
        }
        self.buf.clear();
        self.buf.resize(CMD_HEADER_SIZE, 0);
        self.building = Some(cmd);
        Ok(())
    }

    /// Appends a raw attribute.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidState`] outside a command, or
    /// [`StreamError::Overflow`] if the attribute does not fit.
    pub fn put(&mut self, attr: AttributeType, value: &[u8]) -> StreamResult<()> {
        let cmd = self
            .building
            .ok_or(StreamError::InvalidState("attribute outside a command"))?;
        let needed = self.buf.len() + TLV_HEADER_SIZE + value.len();
        let len = u16::try_from(value.len()).ok();
        let Some(len) = len.filter(|_| needed <= self.max_command_size) else {
            return Err(StreamError::Overflow {
                command: cmd.name(),
                needed,
                limit: self.max_command_size,
            });
        };
        self.buf.extend_from_slice(&attr.as_u16().to_le_bytes());
        self.buf.extend_from_slice(&len.to_le_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    /// Appends a `u64` attribute.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_u64(&mut self, attr: AttributeType, value: u64) -> StreamResult<()> {
        self.put(attr, &value.to_le_bytes())
    }

    /// Appends a path or name attribute (length-prefixed, no NUL).
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_path(&mut self, attr: AttributeType, path: &[u8]) -> StreamResult<()> {
        self.put(attr, path)
    }

    /// Appends a UUID attribute.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_uuid(&mut self, attr: AttributeType, uuid: &[u8; 16]) -> StreamResult<()> {
        self.put(attr, uuid)
    }

    /// Appends a timestamp attribute.
    ///
    /// # Errors
    ///
    /// See [`put`](Self::put).
    pub fn put_timespec(&mut self, attr: AttributeType, sec: u64, nsec: u32) -> StreamResult<()> {
        let mut value = [0u8; 12];
        value[..8].copy_from_slice(&sec.to_le_bytes());
        value[8..].copy_from_slice(&nsec.to_le_bytes());
        self.put(attr, &value)
    }

    /// Completes the current command and writes it to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`StreamError::InvalidState`] outside a command, or an I/O
    /// error from the sink.
    pub fn finish(&mut self) -> StreamResult<()> {
        let cmd = self
            .building
            .take()
            .ok_or(StreamError::InvalidState("finish without begin"))?;
        let payload_len = (self.buf.len() - CMD_HEADER_SIZE) as u32;
        self.buf[0..4].copy_from_slice(&payload_len.to_le_bytes());
        self.buf[4..6].copy_from_slice(&cmd.as_u16().to_le_bytes());
        self.buf[6..10].copy_from_slice(&0u32.to_le_bytes());
        let crc = command_crc(&self.buf);
        self.buf[6..10].copy_from_slice(&crc.to_le_bytes());

        self.sink.write_bytes(&self.buf)?;
        self.stats.record(cmd, self.buf.len());
        self.buf.clear();
        Ok(())
    }

    /// Drops the command being built, if any.
    pub fn abort(&mut self) {
        self.building = None;
        self.buf.clear();
    }

    /// Returns true while a command is being built.
    #[must_use]
    pub fn is_building(&self) -> bool {
        self.building.is_some()
    }

    /// Maximum framed command size.
    #[must_use]
    pub fn max_command_size(&self) -> usize {
        self.max_command_size
    }

    /// Totals of everything written so far.
    #[must_use]
    pub fn stats(&self) -> &StreamStats {
        &self.stats
    }

    /// Returns the sink.
    pub fn into_sink(self) -> S {
        self.sink
    }
}
