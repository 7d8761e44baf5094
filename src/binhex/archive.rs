use std::cmp;
use std::convert::{TryFrom, TryInto};
use std::fmt;
use std::io::{self, BufRead, Read, Write};
use super::expand::BinHexExpander;
use super::read::EncodedBinHexReader;
use super::source::{ByteSource, Chunk, Encoding, PlainSource};
use super::{BinHexError, ChecksumSection, FormatError, Result, Truncation, Violation};
use lazycell::LazyCell;
use log::{debug, warn};

// Everything after the name: version (1), type (4), creator (4), flags (2), data fork length (4),
// and resource fork length (4)
const FIXED_FIELDS_LEN: usize = 19;

/// The metadata stored at the start of a BinHex archive.
///
/// Names, types, and creators are kept exactly as they appear in the archive (in the Mac OS Roman
/// character set); the `name`, `file_type_str`, and `creator_str` methods convert them for
/// display.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BinHexHeader {
    name: Vec<u8>,
    version: u8,
    file_type: [u8; 4],
    creator: [u8; 4],
    flags: u16,
    data_fork_length: u32,
    resource_fork_length: u32,
}

impl BinHexHeader {
    pub fn name(&self) -> String {
        decode_mac_roman(&self.name)
    }

    pub fn raw_name(&self) -> &[u8] {
        &self.name
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn file_type(&self) -> [u8; 4] {
        self.file_type
    }

    pub fn file_type_str(&self) -> String {
        decode_mac_roman(&self.file_type)
    }

    pub fn creator(&self) -> [u8; 4] {
        self.creator
    }

    pub fn creator_str(&self) -> String {
        decode_mac_roman(&self.creator)
    }

    /// The Finder flags of the original file.
    pub fn flags(&self) -> u16 {
        self.flags
    }

    pub fn data_fork_length(&self) -> u32 {
        self.data_fork_length
    }

    pub fn resource_fork_length(&self) -> u32 {
        self.resource_fork_length
    }
}

impl TryFrom<&[u8]> for BinHexHeader {
    type Error = BinHexError;

    /// Parses a header (without its trailing checksum) from the given expanded bytes.
    fn try_from(header_bytes: &[u8]) -> Result<Self> {
        let name_length = match header_bytes.first() {
            Some(&len) => len as usize,
            None => return Err(Truncation::Header.into()),
        };

        if header_bytes.len() != 1 + name_length + FIXED_FIELDS_LEN {
            return Err(Truncation::Header.into());
        }

        let (_, remaining_bytes) = header_bytes.split_at(1);
        let (name_bytes, remaining_bytes) = remaining_bytes.split_at(name_length);
        let (version_bytes, remaining_bytes) = remaining_bytes.split_at(1);
        let (file_type_bytes, remaining_bytes) = remaining_bytes.split_at(4);
        let (creator_bytes, remaining_bytes) = remaining_bytes.split_at(4);
        let (flag_bytes, remaining_bytes) = remaining_bytes.split_at(2);
        let (data_fork_length_bytes, remaining_bytes) = remaining_bytes.split_at(4);
        let (resource_fork_length_bytes, remaining_bytes) = remaining_bytes.split_at(4);

        debug_assert!(remaining_bytes.is_empty());

        // The lengths were checked above, so none of these conversions can fail
        Ok(BinHexHeader {
            name: name_bytes.to_vec(),
            version: version_bytes[0],
            file_type: file_type_bytes.try_into().unwrap(),
            creator: creator_bytes.try_into().unwrap(),
            flags: u16::from_be_bytes(flag_bytes.try_into().unwrap()),
            data_fork_length: u32::from_be_bytes(data_fork_length_bytes.try_into().unwrap()),
            resource_fork_length: u32::from_be_bytes(
                resource_fork_length_bytes.try_into().unwrap(),
            ),
        })
    }
}

impl fmt::Display for BinHexHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "name = {}", self.name())?;
        writeln!(f, "version = {}", self.version)?;
        writeln!(f, "type = {}", self.file_type_str())?;
        writeln!(f, "creator = {}", self.creator_str())?;
        writeln!(f, "flags = {:#06x}", self.flags)?;
        writeln!(f, "data fork length = {}", self.data_fork_length)?;
        write!(f, "resource fork length = {}", self.resource_fork_length)
    }
}

fn decode_mac_roman(bytes: &[u8]) -> String {
    encoding_rs::MACINTOSH
        .decode_without_bom_handling(bytes)
        .0
        .into_owned()
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum Fork {
    Data,
    Resource,
}

impl Fork {
    fn section(self) -> ChecksumSection {
        match self {
            Fork::Data => ChecksumSection::DataFork,
            Fork::Resource => ChecksumSection::ResourceFork,
        }
    }
}

#[derive(Debug)]
struct ForkCursor {
    fork: Fork,
    remaining: u32,

    // True once the trailing checksum has been read and verified
    checked: bool,

    // True once the end of the fork has been reported to the caller
    end_reported: bool,
}

impl ForkCursor {
    fn new(fork: Fork, length: u32) -> Self {
        ForkCursor {
            fork,
            remaining: length,
            checked: false,
            end_reported: false,
        }
    }

    fn is_complete(&self) -> bool {
        self.remaining == 0 && self.checked
    }
}

#[derive(Debug)]
enum Section {
    BeforeHeader,
    DataFork(ForkCursor),
    ResourceFork(ForkCursor),
    Failed(BinHexError),
}

enum UnpackedSource<R: BufRead> {
    SevenBit(EncodedBinHexReader<R>),
    EightBit(PlainSource<R>),
}

impl<R: BufRead> ByteSource for UnpackedSource<R> {
    fn read_chunk(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        match self {
            UnpackedSource::SevenBit(reader) => reader.read_chunk(dest),
            UnpackedSource::EightBit(reader) => reader.read_chunk(dest),
        }
    }
}

/// Decodes the header and forks of a BinHex archive from a buffered source.
///
/// The data fork has to be read before the resource fork; selecting the resource fork skips (and
/// verifies) whatever is left of the data fork, and there's no going back afterward. The first
/// error of any kind is final: every later operation fails with [`Violation::SessionFailed`], and
/// the original error remains available via [`BinHexArchive::error`].
///
/// # Example
///
/// ```no_run
/// use std::fs::File;
/// use std::io::{self, BufReader};
/// use macfork::binhex::{BinHexArchive, BinHexError};
///
/// fn main() -> Result<(), BinHexError> {
///     let mut archive = BinHexArchive::new(BufReader::new(File::open("example.hqx")?));
///     println!("{}", archive.header()?);
///
///     archive.use_resource_fork()?;
///     io::copy(&mut archive, &mut File::create("example.rsrc")?)?;
///
///     Ok(())
/// }
/// ```
pub struct BinHexArchive<R: BufRead> {
    source: BinHexExpander<UnpackedSource<R>>,

    header: LazyCell<BinHexHeader>,
    section: Section,
}

impl<R: BufRead> BinHexArchive<R> {
    /// Creates an archive that reads printable (7-bit) BinHex text from the given source.
    pub fn new(source: R) -> Self {
        Self::with_encoding(source, Encoding::SevenBit)
    }

    pub fn with_encoding(source: R, encoding: Encoding) -> Self {
        let unpacked = match encoding {
            Encoding::SevenBit => UnpackedSource::SevenBit(EncodedBinHexReader::new(source)),
            Encoding::EightBit => UnpackedSource::EightBit(PlainSource::new(source)),
        };

        BinHexArchive {
            source: BinHexExpander::new(unpacked),

            header: LazyCell::new(),
            section: Section::BeforeHeader,
        }
    }

    /// Returns the archive's header, reading it first if necessary.
    pub fn header(&mut self) -> Result<BinHexHeader> {
        self.guarded(|archive| {
            if let Section::BeforeHeader = archive.section {
                archive.read_header()?;
            }

            archive
                .header
                .borrow()
                .cloned()
                .ok_or_else(|| BinHexError::from(Violation::NoForkSelected))
        })
    }

    /// Selects the data fork for subsequent reads. Fails if the resource fork has already been
    /// selected.
    pub fn use_data_fork(&mut self) -> Result<()> {
        self.guarded(|archive| archive.select_fork(Fork::Data))
    }

    /// Selects the resource fork for subsequent reads, skipping any unread part of the data fork.
    pub fn use_resource_fork(&mut self) -> Result<()> {
        self.guarded(|archive| archive.select_fork(Fork::Resource))
    }

    /// Reads up to `dest.len()` bytes from the selected fork.
    ///
    /// Returns [`Chunk::End`] once when the fork has been read completely (and its checksum has
    /// been verified); reading again after that is a protocol violation.
    pub fn read_fork(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        self.guarded(|archive| archive.read_selected_fork(dest))
    }

    /// Returns the error that ended this archive's session, if any.
    pub fn error(&self) -> Option<&BinHexError> {
        match &self.section {
            Section::Failed(error) => Some(error),
            _ => None,
        }
    }

    /// Copies the whole data fork and then the whole resource fork of a freshly-opened archive to
    /// the given destinations, returning the archive's header.
    pub fn extract<D: Write, F: Write>(
        &mut self,
        data: &mut D,
        resource: &mut F,
    ) -> Result<BinHexHeader> {
        let header = self.header()?;

        self.use_data_fork()?;
        self.copy_fork(data)?;

        self.use_resource_fork()?;
        self.copy_fork(resource)?;

        Ok(header)
    }

    fn copy_fork<W: Write>(&mut self, destination: &mut W) -> Result<()> {
        let mut buf = [0; 4096];

        loop {
            match self.read_fork(&mut buf)? {
                Chunk::Data(len) => destination.write_all(&buf[..len])?,
                Chunk::End => return Ok(()),
            }
        }
    }

    fn guarded<T, F>(&mut self, operation: F) -> Result<T>
    where
        F: FnOnce(&mut Self) -> Result<T>,
    {
        if let Section::Failed(error) = &self.section {
            return Err(Violation::SessionFailed(error.to_string()).into());
        }

        operation(self).map_err(|error| {
            warn!("BinHex archive failed: {}", error);
            self.section = Section::Failed(error.clone());

            error
        })
    }

    fn select_fork(&mut self, fork: Fork) -> Result<()> {
        loop {
            match (&self.section, fork) {
                (Section::BeforeHeader, _) => self.read_header()?,
                (Section::DataFork(_), Fork::Data) => return Ok(()),
                (Section::ResourceFork(_), Fork::Resource) => return Ok(()),
                (Section::DataFork(_), Fork::Resource) => {
                    self.skip_selected_fork()?;
                    self.enter_fork(Fork::Resource)?;
                }
                (Section::ResourceFork(_), Fork::Data) => {
                    return Err(Violation::ResourceToDataFork.into());
                }
                (Section::Failed(error), _) => {
                    return Err(Violation::SessionFailed(error.to_string()).into());
                }
            }
        }
    }

    fn read_header(&mut self) -> Result<()> {
        let source = &mut self.source;
        let header = self.header.try_borrow_with(|| parse_header(source))?;

        debug!(
            "Read header for {:?}: {} data fork bytes, {} resource fork bytes",
            header.name(),
            header.data_fork_length,
            header.resource_fork_length
        );

        self.enter_fork(Fork::Data)
    }

    fn enter_fork(&mut self, fork: Fork) -> Result<()> {
        let length = match (self.header.borrow(), fork) {
            (Some(header), Fork::Data) => header.data_fork_length,
            (Some(header), Fork::Resource) => header.resource_fork_length,
            (None, _) => return Err(Violation::NoForkSelected.into()),
        };

        debug!("Entering {} ({} bytes)", fork.section(), length);

        self.source.reset_checksum();

        let cursor = ForkCursor::new(fork, length);

        self.section = match fork {
            Fork::Data => Section::DataFork(cursor),
            Fork::Resource => Section::ResourceFork(cursor),
        };

        Ok(())
    }

    fn skip_selected_fork(&mut self) -> Result<()> {
        let mut scratch = [0; 512];

        loop {
            match &self.section {
                Section::DataFork(cursor) | Section::ResourceFork(cursor)
                    if cursor.is_complete() =>
                {
                    return Ok(());
                }
                _ => {}
            }

            self.read_selected_fork(&mut scratch)?;
        }
    }

    fn read_selected_fork(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        let cursor = match &mut self.section {
            Section::DataFork(cursor) | Section::ResourceFork(cursor) => cursor,
            Section::BeforeHeader => return Err(Violation::NoForkSelected.into()),
            Section::Failed(error) => {
                return Err(Violation::SessionFailed(error.to_string()).into());
            }
        };

        // An empty read doesn't use up the end of the fork
        if dest.is_empty() {
            return Ok(Chunk::Data(0));
        }

        let section = cursor.fork.section();

        if cursor.remaining == 0 {
            // Empty forks still carry a checksum
            if !cursor.checked {
                verify_checksum(&mut self.source, section)?;
                cursor.checked = true;
            }

            if cursor.end_reported {
                return Err(Violation::ReadPastEnd.into());
            }

            cursor.end_reported = true;
            return Ok(Chunk::End);
        }

        let len = cmp::min(dest.len(), cursor.remaining as usize);

        match self.source.read_chunk(&mut dest[..len])? {
            Chunk::Data(bytes_read) => {
                cursor.remaining -= bytes_read as u32;

                if cursor.remaining == 0 {
                    verify_checksum(&mut self.source, section)?;
                    cursor.checked = true;
                }

                Ok(Chunk::Data(bytes_read))
            }
            Chunk::End => Err(Truncation::Fork(section).into()),
        }
    }
}

impl<R: BufRead> Read for BinHexArchive<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.read_fork(buf)? {
            Chunk::Data(len) => Ok(len),
            Chunk::End => Ok(0),
        }
    }
}

fn parse_header<S: ByteSource>(source: &mut BinHexExpander<S>) -> Result<BinHexHeader> {
    source.reset_checksum();

    // Headers are between 21 and 276 bytes long (not counting the checksum) depending on the length
    // of the name; read the name length first so we don't overshoot into the data fork.
    let mut header_bytes = vec![0; 1];
    source.read_exact(&mut header_bytes, Truncation::Header)?;

    let name_length = header_bytes[0] as usize;
    header_bytes.resize(1 + name_length + FIXED_FIELDS_LEN, 0);
    source.read_exact(&mut header_bytes[1..], Truncation::Header)?;

    verify_checksum(source, ChecksumSection::Header)?;

    BinHexHeader::try_from(header_bytes.as_slice())
}

fn verify_checksum<S: ByteSource>(
    source: &mut BinHexExpander<S>,
    section: ChecksumSection,
) -> Result<()> {
    let calculated = source.checksum();

    let mut checksum_bytes = [0; 2];
    source.read_exact(&mut checksum_bytes, Truncation::Checksum(section))?;

    let provided = u16::from_be_bytes(checksum_bytes);

    if provided != calculated {
        return Err(FormatError::ChecksumMismatch {
            section,
            provided,
            calculated,
        }
        .into());
    }

    debug!("Verified {} checksum {:04x}", section, calculated);

    Ok(())
}

#[cfg(test)]
mod test {
    use std::io::{BufReader, Cursor, ErrorKind};
    use super::*;
    use crate::binhex::source::test::FlakyReader;
    use indoc::indoc;

    const BINHEX_DATA: &[u8] = indoc! {br#"
            (This file must be converted with BinHex 4.0)
            :$f*TEQKPH#edCA0d,R4iG!#3$L8!N!-TR@dpN!8J5'9XE'mJCR*[E5"dD'8JC'&
            dB5"QEh*V)5!pN!9Bm5f3"5")C@aXEb"QFQpY)(4SC5"bCA0[GA*MC5"QEh*V)5!
            YN!8SI!:"#
    };

    const DATA_FORK: &[u8] = b"===== Hello from the data fork! =====";
    const RESOURCE_FORK: &[u8] = b"----- Hello from the resource fork! -----";

    fn escape(bytes: &[u8]) -> Vec<u8> {
        bytes
            .iter()
            .flat_map(|&b| if b == 0x90 { vec![0x90, 0x00] } else { vec![b] })
            .collect()
    }

    fn checksum(bytes: &[u8]) -> [u8; 2] {
        crc16::State::<crc16::XMODEM>::calculate(bytes).to_be_bytes()
    }

    // A section as it appears in the 8-bit stream: escaped contents followed by the checksum
    fn section(bytes: &[u8]) -> Vec<u8> {
        let mut section = bytes.to_vec();
        section.extend_from_slice(&checksum(bytes));

        escape(&section)
    }

    fn header_bytes(name: &[u8], data_len: u32, resource_len: u32) -> Vec<u8> {
        let mut header = vec![name.len() as u8];
        header.extend_from_slice(name);
        header.push(0);
        header.extend_from_slice(b"TEXT");
        header.extend_from_slice(b"ttxt");
        header.extend_from_slice(&0u16.to_be_bytes());
        header.extend_from_slice(&data_len.to_be_bytes());
        header.extend_from_slice(&resource_len.to_be_bytes());

        header
    }

    fn archive_bytes(name: &[u8], data: &[u8], resource: &[u8]) -> Vec<u8> {
        [
            section(&header_bytes(name, data.len() as u32, resource.len() as u32)),
            section(data),
            section(resource),
        ]
        .concat()
    }

    fn eight_bit_archive(bytes: Vec<u8>) -> BinHexArchive<Cursor<Vec<u8>>> {
        BinHexArchive::with_encoding(Cursor::new(bytes), Encoding::EightBit)
    }

    fn read_to_end<R: BufRead>(
        archive: &mut BinHexArchive<R>,
        chunk_len: usize,
    ) -> Result<Vec<u8>> {
        let mut data = vec![];
        let mut buf = vec![0; chunk_len];

        loop {
            match archive.read_fork(&mut buf)? {
                Chunk::Data(len) => data.extend_from_slice(&buf[..len]),
                Chunk::End => return Ok(data),
            }
        }
    }

    #[test]
    fn read_header() {
        let mut archive = BinHexArchive::new(Cursor::new(BINHEX_DATA));

        let header = archive.header().unwrap();

        assert_eq!("binhex-test.txt", header.name());
        assert_eq!(0, header.version());
        assert_eq!([0; 4], header.file_type());
        assert_eq!([0; 4], header.creator());
        assert_eq!(0, header.flags());
        assert_eq!(DATA_FORK.len() as u32, header.data_fork_length());
        assert_eq!(RESOURCE_FORK.len() as u32, header.resource_fork_length());
    }

    #[test]
    fn header_is_read_once() {
        let mut archive = BinHexArchive::new(Cursor::new(BINHEX_DATA));

        let first = archive.header().unwrap();
        let second = archive.header().unwrap();

        assert_eq!(first, second);
        assert_eq!(DATA_FORK, read_to_end(&mut archive, 16).unwrap().as_slice());
    }

    #[test]
    fn extract() {
        let mut archive = BinHexArchive::new(Cursor::new(BINHEX_DATA));

        let mut data = vec![];
        let mut resource = vec![];

        let header = archive.extract(&mut data, &mut resource).unwrap();

        assert_eq!("binhex-test.txt", header.name());
        assert_eq!(DATA_FORK, data.as_slice());
        assert_eq!(RESOURCE_FORK, resource.as_slice());
    }

    #[test]
    fn read_forks_tiny_buffer() {
        let mut archive = BinHexArchive::new(Cursor::new(BINHEX_DATA));

        archive.use_data_fork().unwrap();
        assert_eq!(DATA_FORK, read_to_end(&mut archive, 1).unwrap().as_slice());

        archive.use_resource_fork().unwrap();
        assert_eq!(RESOURCE_FORK, read_to_end(&mut archive, 1).unwrap().as_slice());
    }

    #[test]
    fn skip_data_fork() {
        let mut archive = BinHexArchive::new(Cursor::new(BINHEX_DATA));

        archive.use_resource_fork().unwrap();
        assert_eq!(RESOURCE_FORK, read_to_end(&mut archive, 7).unwrap().as_slice());
    }

    #[test]
    fn header_round_trip() {
        let header = header_bytes(b"Test", 2, 0);

        let parsed = BinHexHeader::try_from(header.as_slice()).unwrap();

        assert_eq!(b"Test", parsed.raw_name());
        assert_eq!("Test", parsed.name());
        assert_eq!(0, parsed.version());
        assert_eq!(*b"TEXT", parsed.file_type());
        assert_eq!("TEXT", parsed.file_type_str());
        assert_eq!(*b"ttxt", parsed.creator());
        assert_eq!("ttxt", parsed.creator_str());
        assert_eq!(0, parsed.flags());
        assert_eq!(2, parsed.data_fork_length());
        assert_eq!(0, parsed.resource_fork_length());

        let mut bytes = section(&header);
        bytes.extend_from_slice(&section(b"Hi"));
        bytes.extend_from_slice(&section(b""));

        let mut archive = eight_bit_archive(bytes);
        assert_eq!(parsed, archive.header().unwrap());
    }

    #[test]
    fn header_truncated_slice() {
        let header = header_bytes(b"Test", 2, 0);

        match BinHexHeader::try_from(&header[..header.len() - 1]) {
            Err(BinHexError::Truncated(Truncation::Header)) => {}
            other => panic!("Expected a truncated header, got {:?}", other),
        }

        match BinHexHeader::try_from(&[][..]) {
            Err(BinHexError::Truncated(Truncation::Header)) => {}
            other => panic!("Expected a truncated header, got {:?}", other),
        }
    }

    #[test]
    fn header_mac_roman_name() {
        // "Café" in Mac OS Roman
        let header = BinHexHeader::try_from(header_bytes(b"Caf\x8e", 0, 0).as_slice()).unwrap();

        assert_eq!("Café", header.name());
        assert_eq!(b"Caf\x8e", header.raw_name());
    }

    #[test]
    fn header_display() {
        let header = BinHexHeader::try_from(header_bytes(b"Test", 2, 0).as_slice()).unwrap();

        assert_eq!(
            indoc! {"
                name = Test
                version = 0
                type = TEXT
                creator = ttxt
                flags = 0x0000
                data fork length = 2
                resource fork length = 0"
            },
            header.to_string()
        );
    }

    #[test]
    fn header_checksum_mismatch() {
        let mut bytes = archive_bytes(b"Test", b"Hi", b"");
        // Flip a bit in the data fork length
        bytes[16] ^= 0x01;

        let mut archive = eight_bit_archive(bytes);

        match archive.header() {
            Err(BinHexError::Format(FormatError::ChecksumMismatch { section, .. })) => {
                assert_eq!(ChecksumSection::Header, section)
            }
            other => panic!("Expected a checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn header_truncated() {
        let bytes = archive_bytes(b"Test", b"Hi", b"");
        let mut archive = eight_bit_archive(bytes[..10].to_vec());

        match archive.header() {
            Err(BinHexError::Truncated(Truncation::Header)) => {}
            other => panic!("Expected a truncated header, got {:?}", other),
        }
    }

    #[test]
    fn minimal_archive() {
        let mut archive = eight_bit_archive(archive_bytes(b"Test", b"Hi", b""));
        let mut buf = [0; 16];

        archive.use_data_fork().unwrap();
        assert_eq!(Chunk::Data(2), archive.read_fork(&mut buf).unwrap());
        assert_eq!(b"Hi", &buf[..2]);
        assert_eq!(Chunk::End, archive.read_fork(&mut buf).unwrap());

        archive.use_resource_fork().unwrap();
        assert_eq!(Chunk::End, archive.read_fork(&mut buf).unwrap());

        assert!(archive.error().is_none());
    }

    #[test]
    fn read_past_end_of_fork() {
        let mut archive = eight_bit_archive(archive_bytes(b"Test", b"Hi", b""));
        let mut buf = [0; 16];

        archive.use_data_fork().unwrap();
        assert_eq!(b"Hi", read_to_end(&mut archive, 16).unwrap().as_slice());

        match archive.read_fork(&mut buf) {
            Err(BinHexError::ProtocolViolation(Violation::ReadPastEnd)) => {}
            other => panic!("Expected a protocol violation, got {:?}", other),
        }
    }

    #[test]
    fn empty_data_fork() {
        let mut archive = eight_bit_archive(archive_bytes(b"Empty", b"", b"rsrc"));

        archive.use_data_fork().unwrap();
        assert_eq!(Vec::<u8>::new(), read_to_end(&mut archive, 16).unwrap());

        archive.use_resource_fork().unwrap();
        assert_eq!(b"rsrc", read_to_end(&mut archive, 16).unwrap().as_slice());
    }

    #[test]
    fn skip_empty_data_fork() {
        let mut archive = eight_bit_archive(archive_bytes(b"Empty", b"", b"rsrc"));

        archive.use_resource_fork().unwrap();
        assert_eq!(b"rsrc", read_to_end(&mut archive, 16).unwrap().as_slice());
    }

    #[test]
    fn fork_order() {
        let mut archive = eight_bit_archive(archive_bytes(b"Test", b"Hi", b""));

        archive.use_resource_fork().unwrap();
        archive.use_resource_fork().unwrap();

        match archive.use_data_fork() {
            Err(BinHexError::ProtocolViolation(Violation::ResourceToDataFork)) => {}
            other => panic!("Expected a protocol violation, got {:?}", other),
        }

        match archive.use_resource_fork() {
            Err(BinHexError::ProtocolViolation(Violation::SessionFailed(_))) => {}
            other => panic!("Expected a failed session, got {:?}", other),
        }
    }

    #[test]
    fn read_before_header() {
        let mut archive = eight_bit_archive(archive_bytes(b"Test", b"Hi", b""));
        let mut buf = [0; 16];

        match archive.read_fork(&mut buf) {
            Err(BinHexError::ProtocolViolation(Violation::NoForkSelected)) => {}
            other => panic!("Expected a protocol violation, got {:?}", other),
        }
    }

    #[test]
    fn truncated_fork() {
        let mut bytes = section(&header_bytes(b"Test", 5, 0));
        bytes.extend_from_slice(b"abc");

        let mut archive = eight_bit_archive(bytes);
        archive.use_data_fork().unwrap();

        match read_to_end(&mut archive, 16) {
            Err(BinHexError::Truncated(Truncation::Fork(ChecksumSection::DataFork))) => {}
            other => panic!("Expected truncated input, got {:?}", other),
        }

        match archive.error() {
            Some(BinHexError::Truncated(Truncation::Fork(ChecksumSection::DataFork))) => {}
            other => panic!("Expected the stored error, got {:?}", other),
        }

        match archive.use_resource_fork() {
            Err(BinHexError::ProtocolViolation(Violation::SessionFailed(message))) => {
                assert!(message.contains("data fork"))
            }
            other => panic!("Expected a failed session, got {:?}", other),
        }

        match archive.header() {
            Err(BinHexError::ProtocolViolation(Violation::SessionFailed(_))) => {}
            other => panic!("Expected a failed session, got {:?}", other),
        }
    }

    #[test]
    fn truncated_checksum() {
        let mut bytes = section(&header_bytes(b"Test", 2, 0));
        bytes.extend_from_slice(b"Hi");
        bytes.push(checksum(b"Hi")[0]);

        let mut archive = eight_bit_archive(bytes);
        archive.use_data_fork().unwrap();

        match read_to_end(&mut archive, 16) {
            Err(BinHexError::Truncated(Truncation::Checksum(ChecksumSection::DataFork))) => {}
            other => panic!("Expected truncated input, got {:?}", other),
        }
    }

    #[test]
    fn data_fork_checksum_mismatch() {
        let mut bytes = section(&header_bytes(b"Test", 2, 0));
        bytes.extend_from_slice(&section(b"Ho")[..2]);
        bytes.extend_from_slice(&checksum(b"Hi"));
        bytes.extend_from_slice(&section(b""));

        let mut archive = eight_bit_archive(bytes);
        archive.use_data_fork().unwrap();

        match read_to_end(&mut archive, 16) {
            Err(BinHexError::Format(FormatError::ChecksumMismatch {
                section,
                provided,
                calculated,
            })) => {
                assert_eq!(ChecksumSection::DataFork, section);
                assert_eq!(u16::from_be_bytes(checksum(b"Hi")), provided);
                assert_eq!(u16::from_be_bytes(checksum(b"Ho")), calculated);
            }
            other => panic!("Expected a checksum mismatch, got {:?}", other),
        }

        assert!(archive.error().is_some());
    }

    #[test]
    fn skipped_data_fork_is_verified() {
        let mut bytes = section(&header_bytes(b"Test", 2, 0));
        bytes.extend_from_slice(b"Ho");
        bytes.extend_from_slice(&checksum(b"Hi"));
        bytes.extend_from_slice(&section(b""));

        let mut archive = eight_bit_archive(bytes);

        match archive.use_resource_fork() {
            Err(BinHexError::Format(FormatError::ChecksumMismatch { section, .. })) => {
                assert_eq!(ChecksumSection::DataFork, section)
            }
            other => panic!("Expected a checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn run_length_encoded_fork() {
        let data = vec![b'a'; 300];

        // 255 copies, then 45 more
        let mut bytes = section(&header_bytes(b"Runs", 300, 0));
        bytes.extend_from_slice(&[b'a', 0x90, 0xff, b'a', 0x90, 0x2d]);
        bytes.extend_from_slice(&escape(&checksum(&data)));
        bytes.extend_from_slice(&section(b""));

        let mut archive = eight_bit_archive(bytes);
        archive.use_data_fork().unwrap();

        assert_eq!(data, read_to_end(&mut archive, 64).unwrap());
    }

    #[test]
    fn literal_escape_bytes() {
        let data = [0x90, 0x90, 0x01, 0x90];
        let mut archive = eight_bit_archive(archive_bytes(b"Esc", &data, &[0x90]));

        let mut decoded_data = vec![];
        let mut decoded_resource = vec![];

        archive.extract(&mut decoded_data, &mut decoded_resource).unwrap();

        assert_eq!(&data, decoded_data.as_slice());
        assert_eq!(&[0x90], decoded_resource.as_slice());
    }

    #[test]
    fn resource_fork_checksum_mismatch() {
        let mut bytes = section(&header_bytes(b"Test", 2, 2));
        bytes.extend_from_slice(&section(b"Hi"));
        bytes.extend_from_slice(b"Ho");
        bytes.extend_from_slice(&checksum(b"Hi"));

        let mut archive = eight_bit_archive(bytes);

        archive.use_data_fork().unwrap();
        assert_eq!(b"Hi", read_to_end(&mut archive, 16).unwrap().as_slice());

        archive.use_resource_fork().unwrap();

        match read_to_end(&mut archive, 16) {
            Err(BinHexError::Format(FormatError::ChecksumMismatch {
                section,
                provided,
                calculated,
            })) => {
                assert_eq!(ChecksumSection::ResourceFork, section);
                assert_eq!(u16::from_be_bytes(checksum(b"Hi")), provided);
                assert_eq!(u16::from_be_bytes(checksum(b"Ho")), calculated);
            }
            other => panic!("Expected a checksum mismatch, got {:?}", other),
        }
    }

    #[test]
    fn runs_span_section_boundaries() {
        let data = [0xd7; 3];
        let resource = [0x2e; 2];

        assert_eq!([0xd7, 0x2e], checksum(&data));
        assert_eq!([0xe0, 0x45], checksum(&resource));

        // The data fork's run carries on into the first byte of its checksum, and the resource
        // fork opens with a run of the checksum's last byte
        let mut bytes = section(&header_bytes(b"Runs", 3, 2));
        bytes.extend_from_slice(&[0xd7, 0x90, 0x04, 0x2e]);
        bytes.extend_from_slice(&[0x90, 0x03, 0xe0, 0x45]);

        let mut archive = eight_bit_archive(bytes);

        let mut decoded_data = vec![];
        let mut decoded_resource = vec![];

        archive.extract(&mut decoded_data, &mut decoded_resource).unwrap();

        assert_eq!(&data, decoded_data.as_slice());
        assert_eq!(&resource, decoded_resource.as_slice());
    }

    #[test]
    fn empty_read_at_end_of_fork() {
        let mut archive = eight_bit_archive(archive_bytes(b"Test", b"Hi", b""));
        let mut buf = [0; 16];

        archive.use_data_fork().unwrap();
        assert_eq!(Chunk::Data(2), archive.read_fork(&mut buf).unwrap());
        assert_eq!(Chunk::Data(0), archive.read_fork(&mut []).unwrap());
        assert_eq!(0, archive.read(&mut []).unwrap());
        assert_eq!(Chunk::End, archive.read_fork(&mut buf).unwrap());

        archive.use_resource_fork().unwrap();
        assert_eq!(Chunk::Data(0), archive.read_fork(&mut []).unwrap());
        assert_eq!(Chunk::End, archive.read_fork(&mut buf).unwrap());

        assert!(archive.error().is_none());
    }

    #[test]
    fn extract_interrupted() {
        let source = BufReader::with_capacity(
            4,
            FlakyReader::new(Cursor::new(BINHEX_DATA), ErrorKind::Interrupted),
        );
        let mut archive = BinHexArchive::new(source);

        let mut data = vec![];
        let mut resource = vec![];

        archive.extract(&mut data, &mut resource).unwrap();

        assert_eq!(DATA_FORK, data.as_slice());
        assert_eq!(RESOURCE_FORK, resource.as_slice());
    }

    #[test]
    fn io_error() {
        let source = BufReader::new(FlakyReader::new(
            Cursor::new(BINHEX_DATA),
            ErrorKind::PermissionDenied,
        ));
        let mut archive = BinHexArchive::new(source);

        match archive.header() {
            Err(BinHexError::Io(e)) => assert_eq!(ErrorKind::PermissionDenied, e.kind()),
            other => panic!("Expected an I/O error, got {:?}", other),
        }

        match archive.error() {
            Some(BinHexError::Io(e)) => assert_eq!(ErrorKind::PermissionDenied, e.kind()),
            other => panic!("Expected the stored I/O error, got {:?}", other),
        }

        assert_eq!(
            ErrorKind::PermissionDenied,
            io::Error::from(BinHexError::from(io::Error::from(ErrorKind::PermissionDenied))).kind()
        );
    }

    #[test]
    fn io_read() {
        let mut archive = BinHexArchive::new(Cursor::new(BINHEX_DATA));
        archive.use_data_fork().unwrap();

        let mut data = vec![];
        archive.read_to_end(&mut data).unwrap();

        assert_eq!(DATA_FORK, data.as_slice());

        archive.use_resource_fork().unwrap();

        let mut resource = vec![];
        io::copy(&mut archive, &mut resource).unwrap();

        assert_eq!(RESOURCE_FORK, resource.as_slice());
    }

    #[test]
    fn io_read_error_kinds() {
        let mut archive = eight_bit_archive(archive_bytes(b"Test", b"Hi", b""));
        let mut buf = [0; 16];

        assert_eq!(
            io::ErrorKind::Other,
            archive.read(&mut buf).map_err(|e| e.kind()).unwrap_err()
        );

        let mut bytes = section(&header_bytes(b"Test", 5, 0));
        bytes.extend_from_slice(b"abc");

        let mut archive = eight_bit_archive(bytes);
        archive.use_data_fork().unwrap();

        let mut data = vec![];

        assert_eq!(
            io::ErrorKind::UnexpectedEof,
            archive.read_to_end(&mut data).map_err(|e| e.kind()).unwrap_err()
        );
    }
}
