//! File handles returned by `VirtualFileSystem::open`
//!
//! A [`VfsFile`] wraps a [`RawFile`] in the std buffering adaptor that fits
//! its mode: `BufReader` for read-only modes, `BufWriter` for write-only
//! modes, and the raw stream for `+` modes (std has no buffered
//! random-access adaptor) or when unbuffered I/O is requested.

use crate::error::{Result, VfsError};
use crate::mode::OpenMode;
use crate::raw::RawFile;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};

/// Default capacity of the buffering adaptors
pub const DEFAULT_BUFFER_SIZE: usize = 8 * 1024;

/// Buffering requested at open time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Buffering {
    #[default]
    Default,
    /// Binary modes only
    Unbuffered,
    Size(usize),
}

enum Stream {
    Raw(RawFile),
    Reader(BufReader<RawFile>),
    Writer(BufWriter<RawFile>),
}

/// An open file
pub struct VfsFile {
    stream: Stream,
    mode: OpenMode,
}

impl std::fmt::Debug for VfsFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VfsFile")
            .field("raw", self.raw())
            .field("buffered", &!matches!(self.stream, Stream::Raw(_)))
            .finish()
    }
}

impl VfsFile {
    /// Unbuffered text modes are rejected by the caller before the open.
    pub(crate) fn new(raw: RawFile, buffering: Buffering) -> Self {
        let mode = raw.mode();
        let capacity = match buffering {
            Buffering::Default => Some(DEFAULT_BUFFER_SIZE),
            Buffering::Unbuffered | Buffering::Size(0) => None,
            Buffering::Size(n) => Some(n),
        };

        let stream = match capacity {
            None => Stream::Raw(raw),
            Some(_) if mode.plus => Stream::Raw(raw),
            Some(n) if mode.readable() => Stream::Reader(BufReader::with_capacity(n, raw)),
            Some(n) => Stream::Writer(BufWriter::with_capacity(n, raw)),
        };
        Self { stream, mode }
    }

    fn raw(&self) -> &RawFile {
        match &self.stream {
            Stream::Raw(raw) => raw,
            Stream::Reader(reader) => reader.get_ref(),
            Stream::Writer(writer) => writer.get_ref(),
        }
    }

    pub fn path(&self) -> &str {
        self.raw().path()
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    pub fn is_closed(&self) -> bool {
        self.raw().is_closed()
    }

    /// Logical position, accounting for buffered but unconsumed bytes.
    pub fn tell(&mut self) -> Result<u64> {
        Ok(self.stream_position()?)
    }

    /// Resize the file; buffered writes land first.
    pub fn truncate(&mut self, size: Option<u64>) -> Result<u64> {
        match &mut self.stream {
            Stream::Raw(raw) => raw.truncate(size),
            Stream::Writer(writer) => {
                writer.flush()?;
                writer.get_mut().truncate(size)
            }
            Stream::Reader(reader) => reader.get_mut().truncate(size),
        }
    }

    /// Read the rest of the file as UTF-8 text.
    pub fn read_text(&mut self) -> Result<String> {
        let mut bytes = Vec::new();
        self.read_to_end(&mut bytes)?;
        String::from_utf8(bytes).map_err(|e| {
            VfsError::InvalidArgument(format!("invalid UTF-8 in {}: {e}", self.path()))
        })
    }

    /// Flush buffered writes and close the underlying stream.
    pub fn close(&mut self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        match &mut self.stream {
            Stream::Raw(raw) => raw.close(),
            Stream::Reader(reader) => reader.get_mut().close(),
            Stream::Writer(writer) => {
                writer.flush()?;
                writer.get_mut().close()
            }
        }
    }
}

fn unsupported(direction: &str, path: &str) -> io::Error {
    VfsError::UnsupportedOperation(format!("file not open for {direction}: {path}")).into()
}

fn closed(path: &str) -> io::Error {
    VfsError::InvalidState(format!("I/O operation on closed file: {path}")).into()
}

impl Read for VfsFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Raw(raw) => raw.read(buf),
            // the buffer may still hold bytes after close
            Stream::Reader(reader) if reader.get_ref().is_closed() => {
                Err(closed(reader.get_ref().path()))
            }
            Stream::Reader(reader) => reader.read(buf),
            Stream::Writer(writer) => Err(unsupported("reading", writer.get_ref().path())),
        }
    }
}

impl Write for VfsFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match &mut self.stream {
            Stream::Raw(raw) => raw.write(buf),
            Stream::Writer(writer) if writer.get_ref().is_closed() => {
                Err(closed(writer.get_ref().path()))
            }
            Stream::Writer(writer) => writer.write(buf),
            Stream::Reader(reader) => Err(unsupported("writing", reader.get_ref().path())),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match &mut self.stream {
            Stream::Raw(raw) => raw.flush(),
            Stream::Reader(reader) => reader.get_mut().flush(),
            Stream::Writer(writer) => writer.flush(),
        }
    }
}

impl Seek for VfsFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        match &mut self.stream {
            Stream::Raw(raw) => raw.seek(pos),
            Stream::Reader(reader) => reader.seek(pos),
            Stream::Writer(writer) => writer.seek(pos),
        }
    }
}
