//! Scoped streams handed out by backends.
//!
//! A [`ReadStream`] owns whatever resource backs it (a buffer, a file handle
//! or a live HTTP body) and releases it when dropped, on every exit path.
//! Each `open_for_read` call produces a fresh one, so several readers of the
//! same object never share a cursor.
//!
//! A [`WriteStream`] only makes its object visible on
//! [`WriteStream::finalize`]. Dropping it without finalizing throws the
//! partial object away.

use crate::checksum;
use crate::digest::Digest;
use crate::error::Result;
use std::fmt;
use std::io::{self, Cursor, Read, Write};

pub struct ReadStream(Source);

enum Source {
    Buffer(Cursor<Vec<u8>>),
    File(std::fs::File),
    Http(reqwest::blocking::Response),
    Other(Box<dyn Read + Send>),
}

impl ReadStream {
    /// Wrap bytes that have already been verified, or need no verification.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(Source::Buffer(Cursor::new(bytes)))
    }

    /// Check `bytes` against `expected` and wrap them only if they pass.
    pub fn verified(bytes: Vec<u8>, expected: Option<&Digest>) -> Result<Self> {
        let mut cursor = Cursor::new(bytes);
        checksum::verify(&mut cursor, expected)?;
        Ok(Self(Source::Buffer(cursor)))
    }

    pub(crate) fn from_file(f: std::fs::File) -> Self {
        Self(Source::File(f))
    }

    pub(crate) fn from_response(r: reqwest::blocking::Response) -> Self {
        Self(Source::Http(r))
    }

    /// Wrap an arbitrary reader. Nothing is verified.
    pub fn from_reader(r: impl Read + Send + 'static) -> Self {
        Self(Source::Other(Box::new(r)))
    }

    /// Whether the full contents are already in memory.
    pub fn is_buffered(&self) -> bool {
        matches!(self.0, Source::Buffer(_))
    }

    /// Everything not yet read.
    pub fn into_bytes(self) -> io::Result<Vec<u8>> {
        match self.0 {
            Source::Buffer(c) if c.position() == 0 => Ok(c.into_inner()),
            mut other => {
                let mut buf = vec![];
                read_source(&mut other, &mut buf)?;
                Ok(buf)
            }
        }
    }
}

fn read_source(source: &mut Source, buf: &mut Vec<u8>) -> io::Result<usize> {
    match source {
        Source::Buffer(c) => c.read_to_end(buf),
        Source::File(f) => f.read_to_end(buf),
        Source::Http(r) => r.read_to_end(buf),
        Source::Other(r) => r.read_to_end(buf),
    }
}

impl Read for ReadStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.0 {
            Source::Buffer(c) => c.read(buf),
            Source::File(f) => f.read(buf),
            Source::Http(r) => r.read(buf),
            Source::Other(r) => r.read(buf),
        }
    }
}

impl fmt::Debug for ReadStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match &self.0 {
            Source::Buffer(c) => return write!(f, "ReadStream::Buffer({} bytes)", c.get_ref().len()),
            Source::File(_) => "File",
            Source::Http(_) => "Http",
            Source::Other(_) => "Other",
        };
        write!(f, "ReadStream::{}", kind)
    }
}

/// The backend-specific half of a [`WriteStream`].
///
/// Implementations decide what "making the object real" means: an atomic
/// rename, a single upload, and so on.
pub trait Sink: Write + Send {
    fn finalize(self: Box<Self>) -> Result<()>;
}

pub struct WriteStream {
    name: String,
    sink: Box<dyn Sink>,
}

impl WriteStream {
    pub fn new(name: impl Into<String>, sink: impl Sink + 'static) -> Self {
        Self {
            name: name.into(),
            sink: Box::new(sink),
        }
    }

    /// Flush and publish the object under its name.
    pub fn finalize(mut self) -> Result<()> {
        self.sink.flush()?;
        self.sink.finalize()
    }
}

impl Write for WriteStream {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.sink.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl fmt::Debug for WriteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteStream").field("name", &self.name).finish()
    }
}
