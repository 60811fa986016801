//! Append-only byte sinks receiving framed commands.

use std::io::{self, Write};

/// Destination of a send stream.
///
/// Sinks are append-only: every call delivers the next bytes of the
/// stream.
pub trait Sink {
    /// Appends `buf` to the stream.
    ///
    /// # Errors
    ///
    /// Returns an error if the bytes cannot be delivered.
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()>;
}

impl Sink for Vec<u8> {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.extend_from_slice(buf);
        Ok(())
    }
}

impl<S: Sink + ?Sized> Sink for &mut S {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        (**self).write_bytes(buf)
    }
}

/// Adapts any [`Write`] (file, pipe, socket) into a [`Sink`].
#[derive(Debug)]
pub struct WriteSink<W: Write> {
    inner: W,
    written: u64,
}

impl<W: Write> WriteSink<W> {
    /// Wraps a writer.
    pub fn new(inner: W) -> Self {
        Self { inner, written: 0 }
    }

    /// Bytes written so far.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Flushes and returns the writer.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Sink for WriteSink<W> {
    fn write_bytes(&mut self, buf: &[u8]) -> io::Result<()> {
        self.inner.write_all(buf)?;
        self.written += buf.len() as u64;
        Ok(())
    }
}
