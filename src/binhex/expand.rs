use std::cmp;
use super::source::{ByteSource, Chunk};
use super::{FormatError, Result, Truncation, Violation};

const RLE_ESCAPE: u8 = 0x90;
const CANCEL_ESCAPE: u8 = 0x00;

const CRC_POLYNOMIAL: u16 = 0x1021;

/// The CRC-16 used by BinHex (polynomial `0x1021`, initial value zero), computed one bit at a
/// time.
///
/// The register works on the "augmented" message: every input bit is shifted in at the bottom, so
/// the checksum only comes out right after two zero bytes have been shifted in behind the data.
/// [`Crc16::finish`] does exactly that.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct Crc16 {
    register: u16,
}

impl Crc16 {
    pub fn new() -> Self {
        Crc16::default()
    }

    pub fn reset(&mut self) {
        self.register = 0;
    }

    pub fn update(&mut self, mut byte: u8) {
        for _ in 0..8 {
            let carry = self.register & 0x8000 != 0;

            self.register = (self.register << 1) | (byte >> 7) as u16;

            if carry {
                self.register ^= CRC_POLYNOMIAL;
            }

            byte <<= 1;
        }
    }

    /// Shifts in the two trailing zero bytes and returns the checksum. Only meaningful once all of
    /// a section's bytes have been passed to [`Crc16::update`].
    pub fn finish(&mut self) -> u16 {
        self.update(0);
        self.update(0);

        self.register
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    // Looking for new bytes to copy; holds the last byte emitted, if any
    Scan(Option<u8>),

    // Performing RLE expansion of the given byte for the given remaining run length
    Expand(u8, usize),

    // The source has ended, but we haven't reported that yet
    Drained,

    // We've reported the end of the stream
    Done,
}

/// Expands the run-length encoding in an unpacked BinHex stream and keeps a running CRC-16 of the
/// bytes it produces.
///
/// A `0x90` byte followed by a count `n` means "the previous byte appears `n` times in total";
/// `0x90` followed by zero is a literal `0x90`.
pub struct BinHexExpander<S: ByteSource> {
    source: S,
    state: State,
    crc: Crc16,
}

impl<S: ByteSource> BinHexExpander<S> {
    pub fn new(source: S) -> Self {
        BinHexExpander {
            source,
            state: State::Scan(None),
            crc: Crc16::new(),
        }
    }

    pub fn reset_checksum(&mut self) {
        self.crc.reset();
    }

    /// Finalizes and returns the checksum of everything expanded since the last call to
    /// [`BinHexExpander::reset_checksum`].
    pub fn checksum(&mut self) -> u16 {
        self.crc.finish()
    }

    fn emit(&mut self, dest: &mut [u8], byte: u8) {
        dest[0] = byte;
        self.crc.update(byte);
    }
}

impl<S: ByteSource> ByteSource for BinHexExpander<S> {
    fn read_chunk(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        match self.state {
            State::Done => return Err(Violation::ReadPastEnd.into()),
            _ if dest.is_empty() => return Ok(Chunk::Data(0)),
            State::Drained => {
                self.state = State::Done;
                return Ok(Chunk::End);
            }
            _ => {}
        }

        let mut bytes_copied = 0;

        while bytes_copied < dest.len() {
            self.state = match self.state {
                State::Expand(byte, run_length) => {
                    let len = cmp::min(run_length, dest.len() - bytes_copied);

                    for slot in dest[bytes_copied..bytes_copied + len].iter_mut() {
                        *slot = byte;
                        self.crc.update(byte);
                    }

                    bytes_copied += len;

                    if len < run_length {
                        State::Expand(byte, run_length - len)
                    } else {
                        State::Scan(Some(byte))
                    }
                }
                State::Scan(previous) => match self.source.next_byte()? {
                    None => {
                        if bytes_copied == 0 {
                            self.state = State::Done;
                            return Ok(Chunk::End);
                        }

                        self.state = State::Drained;
                        break;
                    }
                    Some(RLE_ESCAPE) => match self.source.next_byte()? {
                        None => return Err(Truncation::RunLength.into()),
                        Some(CANCEL_ESCAPE) => {
                            self.emit(&mut dest[bytes_copied..], RLE_ESCAPE);
                            bytes_copied += 1;

                            State::Scan(Some(RLE_ESCAPE))
                        }
                        Some(run_length) => {
                            let byte = previous.ok_or(FormatError::EscapeWithoutPrecedingByte)?;

                            // We subtract one because we've already copied one instance of the
                            // byte to be expanded
                            match run_length as usize - 1 {
                                0 => State::Scan(Some(byte)),
                                remaining => State::Expand(byte, remaining),
                            }
                        }
                    },
                    Some(byte) => {
                        self.emit(&mut dest[bytes_copied..], byte);
                        bytes_copied += 1;

                        State::Scan(Some(byte))
                    }
                },
                State::Drained | State::Done => break,
            };
        }

        Ok(Chunk::Data(bytes_copied))
    }
}
