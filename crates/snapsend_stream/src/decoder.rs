//! Stream decoder used by receivers, dump tooling and tests.

use crate::command::{
    command_crc, AttributeType, CommandType, CMD_HEADER_SIZE, STREAM_MAGIC, STREAM_VERSION,
    TIMESPEC_SIZE, TLV_HEADER_SIZE, UUID_SIZE,
};
use crate::error::{StreamError, StreamResult};
use std::io::{self, Read};

/// One decoded attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Attribute type.
    pub kind: AttributeType,
    /// Raw value.
    pub value: Vec<u8>,
}

/// One decoded command with its attributes in wire order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    /// Command type.
    pub kind: CommandType,
    /// Attributes in the order they were encoded.
    pub attributes: Vec<Attribute>,
}

impl Command {
    /// Returns the first value of `attr`, if present.
    #[must_use]
    pub fn get(&self, attr: AttributeType) -> Option<&[u8]> {
        self.attributes
            .iter()
            .find(|a| a.kind == attr)
            .map(|a| a.value.as_slice())
    }

    /// Returns the value of `attr` or a [`StreamError::MissingAttribute`].
    ///
    /// # Errors
    ///
    /// Fails if the attribute is absent.
    pub fn require(&self, attr: AttributeType) -> StreamResult<&[u8]> {
        self.get(attr).ok_or(StreamError::MissingAttribute {
            command: self.kind.name(),
            attribute: attr.name(),
        })
    }

    /// Decodes a `u64` attribute.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is absent or not eight bytes.
    pub fn get_u64(&self, attr: AttributeType) -> StreamResult<u64> {
        let bytes: [u8; 8] = fixed(attr, self.require(attr)?)?;
        Ok(u64::from_le_bytes(bytes))
    }

    /// Returns a path attribute.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is absent.
    pub fn get_path(&self, attr: AttributeType) -> StreamResult<&[u8]> {
        self.require(attr)
    }

    /// Decodes a UUID attribute.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is absent or not sixteen bytes.
    pub fn get_uuid(&self, attr: AttributeType) -> StreamResult<[u8; UUID_SIZE]> {
        fixed(attr, self.require(attr)?)
    }

    /// Decodes a timestamp attribute as `(seconds, nanoseconds)`.
    ///
    /// # Errors
    ///
    /// Fails if the attribute is absent or not twelve bytes.
    pub fn get_timespec(&self, attr: AttributeType) -> StreamResult<(u64, u32)> {
        let bytes: [u8; TIMESPEC_SIZE] = fixed(attr, self.require(attr)?)?;
        let mut sec = [0u8; 8];
        let mut nsec = [0u8; 4];
        sec.copy_from_slice(&bytes[..8]);
        nsec.copy_from_slice(&bytes[8..]);
        Ok((u64::from_le_bytes(sec), u32::from_le_bytes(nsec)))
    }

    /// Size of this command once framed.
    #[must_use]
    pub fn framed_len(&self) -> usize {
        CMD_HEADER_SIZE
            + self
                .attributes
                .iter()
                .map(|a| TLV_HEADER_SIZE + a.value.len())
                .sum::<usize>()
    }
}

fn fixed<const N: usize>(attr: AttributeType, value: &[u8]) -> StreamResult<[u8; N]> {
    value
        .try_into()
        .map_err(|_| StreamError::BadAttributeLength {
            attribute: attr.name(),
            len: value.len(),
            expected: N,
        })
}

/// Reads commands from a byte stream, verifying every checksum.
///
/// # Example
///
/// ```rust
/// use snapsend_stream::{CommandEncoder, CommandType, StreamReader};
///
/// let mut encoder = CommandEncoder::new(Vec::new(), 1024);
/// encoder.write_header().unwrap();
/// encoder.begin(CommandType::End).unwrap();
/// encoder.finish().unwrap();
/// let bytes = encoder.into_sink();
///
/// let mut reader = StreamReader::new(bytes.as_slice()).unwrap();
/// let cmd = reader.next_command().unwrap().unwrap();
/// assert_eq!(cmd.kind, CommandType::End);
/// assert!(reader.next_command().unwrap().is_none());
/// ```
#[derive(Debug)]
pub struct StreamReader<R: Read> {
    inner: R,
    done: bool,
}

impl<R: Read> StreamReader<R> {
    /// Reads and validates the stream header.
    ///
    /// # Errors
    ///
    /// Returns an error if the magic or version is wrong.
    pub fn new(mut inner: R) -> StreamResult<Self> {
        let mut magic = [0u8; STREAM_MAGIC.len()];
        if read_full(&mut inner, &mut magic)? != magic.len() {
            return Err(StreamError::Truncated("stream header"));
        }
        if &magic != STREAM_MAGIC {
            return Err(StreamError::BadMagic);
        }
        let mut version = [0u8; 4];
        if read_full(&mut inner, &mut version)? != version.len() {
            return Err(StreamError::Truncated("stream header"));
        }
        let version = u32::from_le_bytes(version);
        if version != STREAM_VERSION {
            return Err(StreamError::UnsupportedVersion(version));
        }
        Ok(Self { inner, done: false })
    }

    /// Reads the next command, or `None` at a clean end of input.
    ///
    /// # Errors
    ///
    /// Returns an error on truncation, checksum mismatch or unknown
    /// command and attribute numbers.
    pub fn next_command(&mut self) -> StreamResult<Option<Command>> {
        if self.done {
            return Ok(None);
        }
        let mut header = [0u8; CMD_HEADER_SIZE];
        match read_full(&mut self.inner, &mut header)? {
            0 => {
                self.done = true;
                return Ok(None);
            }
            n if n < CMD_HEADER_SIZE => return Err(StreamError::Truncated("command header")),
            _ => {}
        }
        let len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let cmd_raw = u16::from_le_bytes([header[4], header[5]]);
        let stored = u32::from_le_bytes([header[6], header[7], header[8], header[9]]);

        // The length is untrusted: grow the frame only as bytes arrive.
        let mut frame = header.to_vec();
        let read = self.inner.by_ref().take(len as u64).read_to_end(&mut frame)?;
        if read != len {
            return Err(StreamError::Truncated("command payload"));
        }

        let kind = CommandType::from_u16(cmd_raw).ok_or(StreamError::UnknownCommand(cmd_raw))?;
        frame[6..10].fill(0);
        let computed = command_crc(&frame);
        if computed != stored {
            return Err(StreamError::ChecksumMismatch {
                command: kind.name(),
                stored,
                computed,
            });
        }

        let attributes = parse_attributes(&frame[CMD_HEADER_SIZE..])?;
        Ok(Some(Command { kind, attributes }))
    }
}

impl<R: Read> Iterator for StreamReader<R> {
    type Item = StreamResult<Command>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_command() {
            Ok(Some(cmd)) => Some(Ok(cmd)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn parse_attributes(mut payload: &[u8]) -> StreamResult<Vec<Attribute>> {
    let mut attributes = Vec::new();
    while !payload.is_empty() {
        if payload.len() < TLV_HEADER_SIZE {
            return Err(StreamError::Truncated("attribute header"));
        }
        let raw = u16::from_le_bytes([payload[0], payload[1]]);
        let len = u16::from_le_bytes([payload[2], payload[3]]) as usize;
        let kind = AttributeType::from_u16(raw).ok_or(StreamError::UnknownAttribute(raw))?;
        let rest = &payload[TLV_HEADER_SIZE..];
        if rest.len() < len {
            return Err(StreamError::Truncated("attribute value"));
        }
        attributes.push(Attribute {
            kind,
            value: rest[..len].to_vec(),
        });
        payload = &rest[len..];
    }
    Ok(attributes)
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

/// Decodes a complete in-memory stream.
///
/// # Errors
///
/// Returns the first decoding error.
pub fn decode_stream(bytes: &[u8]) -> StreamResult<Vec<Command>> {
    StreamReader::new(bytes)?.collect()
}
