use std::io::{BufRead, ErrorKind};
use super::{BinHexError, Result, Truncation, Violation};

/// The outcome of a successful pull from a [`ByteSource`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Chunk {
    /// This many bytes were written to the front of the destination buffer. Zero only if the
    /// destination buffer was empty.
    Data(usize),

    /// The source has no more bytes. A source reports this exactly once; pulling again afterward
    /// fails with [`Violation::ReadPastEnd`].
    End,
}

/// The interface shared by every layer of the decoder: pull up to `dest.len()` bytes.
pub trait ByteSource {
    fn read_chunk(&mut self, dest: &mut [u8]) -> Result<Chunk>;

    /// Pulls a single byte, returning `None` at the end of the stream.
    fn next_byte(&mut self) -> Result<Option<u8>> {
        let mut buf = [0; 1];

        match self.read_chunk(&mut buf)? {
            Chunk::Data(_) => Ok(Some(buf[0])),
            Chunk::End => Ok(None),
        }
    }

    /// Fills `buf` completely, failing with the given truncation if the stream ends first.
    fn read_exact(&mut self, buf: &mut [u8], truncation: Truncation) -> Result<()> {
        let mut filled = 0;

        while filled < buf.len() {
            match self.read_chunk(&mut buf[filled..])? {
                Chunk::Data(len) => filled += len,
                Chunk::End => return Err(truncation.into()),
            }
        }

        Ok(())
    }
}

impl<S: ByteSource + ?Sized> ByteSource for &mut S {
    fn read_chunk(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        (**self).read_chunk(dest)
    }

    fn next_byte(&mut self) -> Result<Option<u8>> {
        (**self).next_byte()
    }
}

/// How the bytes in a raw BinHex source are encoded.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Encoding {
    /// Printable 7-bit text, optionally preceded by a banner; the form found in `.hqx` files.
    SevenBit,

    /// Bytes that have already been unpacked from the printable alphabet, but whose runs have not
    /// yet been expanded.
    EightBit,
}

impl Default for Encoding {
    fn default() -> Self {
        Encoding::SevenBit
    }
}

/// Passes the bytes of a buffered reader through unchanged; used for sources that are already
/// 8-bit.
pub struct PlainSource<R: BufRead> {
    source: R,
    ended: bool,
}

impl<R: BufRead> PlainSource<R> {
    pub fn new(source: R) -> Self {
        PlainSource {
            source,
            ended: false,
        }
    }
}

impl<R: BufRead> ByteSource for PlainSource<R> {
    fn read_chunk(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        if self.ended {
            return Err(Violation::ReadPastEnd.into());
        }

        if dest.is_empty() {
            return Ok(Chunk::Data(0));
        }

        let buf = loop {
            match self.source.fill_buf() {
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BinHexError::from(e)),
                Ok(buf) => break buf,
            }
        };

        if buf.is_empty() {
            self.ended = true;
            return Ok(Chunk::End);
        }

        let len = std::cmp::min(buf.len(), dest.len());
        dest[..len].copy_from_slice(&buf[..len]);
        self.source.consume(len);

        Ok(Chunk::Data(len))
    }
}
