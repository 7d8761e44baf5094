//! Decode BinHex 4.0 archives into their data fork, resource fork, and file metadata.
//!
//! BinHex wraps both forks of a classic Mac file in a 7-bit text encoding that survives email and
//! Usenet. Decoding happens in three layers, each pulling bytes from the one below it:
//!
//! 1. [`EncodedBinHexReader`] skips the banner and turns the printable alphabet back into 8-bit
//!    bytes.
//! 2. [`BinHexExpander`] expands run-length encoded runs and keeps a running CRC-16.
//! 3. [`BinHexArchive`] parses the header and hands out the data fork and the resource fork,
//!    checking the CRC at the end of each section.
//!
//! Forks can only be read in the order they appear in the archive: data fork first, then resource
//! fork.
//!
//! # Example
//!
//! ```no_run
//! use std::fs::File;
//! use std::io::{self, BufReader};
//! use macfork::binhex::{BinHexArchive, BinHexError};
//!
//! fn main() -> Result<(), BinHexError> {
//!     let source = BufReader::new(File::open("example.hqx")?);
//!     let mut archive = BinHexArchive::new(source);
//!
//!     let header = archive.extract(&mut io::sink(), &mut io::sink())?;
//!     println!("Extracted {}", header.name());
//!
//!     Ok(())
//! }
//! ```

// http://files.stairways.com/other/binhex-40-specs-info.txt
// https://tools.ietf.org/html/rfc1741

pub mod archive;
mod expand;
mod read;
mod source;

pub use archive::{BinHexArchive, BinHexHeader};
pub use expand::{BinHexExpander, Crc16};
pub use read::EncodedBinHexReader;
pub use source::{ByteSource, Chunk, Encoding, PlainSource};

use std::fmt;
use std::io;
use std::sync::Arc;

/// The result type used throughout the BinHex decoder.
pub type Result<T> = std::result::Result<T, BinHexError>;

/// Identifies one of the three CRC-protected sections of a BinHex archive.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ChecksumSection {
    Header,
    DataFork,
    ResourceFork,
}

impl fmt::Display for ChecksumSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChecksumSection::Header => write!(f, "header"),
            ChecksumSection::DataFork => write!(f, "data fork"),
            ChecksumSection::ResourceFork => write!(f, "resource fork"),
        }
    }
}

/// An error that can occur while decoding a BinHex archive.
///
/// Every error is fatal to the [`BinHexArchive`] that produced it; once an archive has returned an
/// error, all further operations fail with [`Violation::SessionFailed`].
#[derive(Clone, Debug, thiserror::Error)]
pub enum BinHexError {
    /// The underlying source failed.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<io::Error>),

    /// The archive is corrupt or is not a BinHex archive at all.
    #[error("Malformed BinHex data: {0}")]
    Format(#[from] FormatError),

    /// The source ran out of bytes before a logical boundary was reached.
    #[error("BinHex data ended unexpectedly: {0}")]
    Truncated(#[from] Truncation),

    /// The caller asked for something the decoder does not allow in its current state.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(#[from] Violation),
}

impl From<io::Error> for BinHexError {
    fn from(error: io::Error) -> Self {
        BinHexError::Io(Arc::new(error))
    }
}

impl From<BinHexError> for io::Error {
    fn from(error: BinHexError) -> Self {
        let kind = match &error {
            BinHexError::Io(e) => e.kind(),
            BinHexError::Format(_) => io::ErrorKind::InvalidData,
            BinHexError::Truncated(_) => io::ErrorKind::UnexpectedEof,
            BinHexError::ProtocolViolation(_) => io::ErrorKind::Other,
        };

        io::Error::new(kind, error)
    }
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum FormatError {
    #[error("stream did not contain a BinHex banner")]
    MissingBanner,

    #[error("no opening ':' delimiter after the BinHex banner")]
    MissingDataStart,

    #[error("illegal character {0:#04x} in encoded data")]
    IllegalCharacter(u8),

    #[error("run-length escape with no preceding byte to repeat")]
    EscapeWithoutPrecedingByte,

    #[error("{section} checksum failed; expected {provided:04x}, calculated {calculated:04x}")]
    ChecksumMismatch {
        section: ChecksumSection,
        provided: u16,
        calculated: u16,
    },
}

/// Where the source ended early.
#[derive(Copy, Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Truncation {
    #[error("no closing ':' delimiter")]
    MissingDataEnd,

    #[error("end of data right after a run-length escape")]
    RunLength,

    #[error("end of data in the header")]
    Header,

    #[error("end of data in the {0}")]
    Fork(ChecksumSection),

    #[error("end of data in the {0} checksum")]
    Checksum(ChecksumSection),
}

#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Violation {
    #[error("read after the end of the stream was already reported")]
    ReadPastEnd,

    #[error("no fork selected; read the header or select a fork first")]
    NoForkSelected,

    #[error("cannot switch back from the resource fork to the data fork")]
    ResourceToDataFork,

    #[error("archive already failed: {0}")]
    SessionFailed(String),
}
