use std::io::{BufRead, ErrorKind};
use super::source::{ByteSource, Chunk};
use super::{BinHexError, FormatError, Result, Truncation, Violation};

const BANNER: &[u8] = b"(This file must be converted with BinHex";
const DATA_DELIMITER: u8 = b':';

const ALPHABET: &[u8; 64] =
    br##"!"#$%&'()*+,-012345689@ABCDEFGHIJKLMNPQRSTUVXYZ[`abcdefhijklmpqr"##;

const INVALID_SYMBOL: u8 = 0xff;

lazy_static::lazy_static! {
    static ref SIX_BIT_VALUES: [u8; 128] = {
        let mut values = [INVALID_SYMBOL; 128];

        for (value, &symbol) in ALPHABET.iter().enumerate() {
            values[symbol as usize] = value as u8;
        }

        values
    };
}

/// Extracts and unpacks the printable data in a BinHex source.
///
/// An `EncodedBinHexReader` skips everything up to and including the line that starts with the
/// BinHex banner, then everything up to the opening `:` delimiter. From there on, it maps each
/// printable character back to the six bits it encodes (ignoring whitespace and parity bits) and
/// packs those bits into bytes until it reaches the closing `:` delimiter. The bytes it produces
/// still need run-length expansion; see [`BinHexExpander`](super::BinHexExpander).
pub struct EncodedBinHexReader<R: BufRead> {
    source: R,
    state: State,

    bit_buffer: u16,
    bits_buffered: u8,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum State {
    // At the start of a line, having matched this many bytes of the banner
    LineStart(usize),

    // Skipping the rest of a line; true if that line contained the banner
    SkipLine(bool),

    FindDataStart,
    ReadData,

    // Found the closing delimiter, but haven't told the caller yet
    DataEnd,

    // Told the caller that the data has ended
    Done,
}

impl<R: BufRead> EncodedBinHexReader<R> {
    pub fn new(source: R) -> Self {
        EncodedBinHexReader {
            source,
            state: State::LineStart(0),

            bit_buffer: 0,
            bits_buffered: 0,
        }
    }

    fn seek_to_data_start(&mut self) -> Result<()> {
        while self.state != State::ReadData {
            let buf = match self.source.fill_buf() {
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BinHexError::from(e)),
                Ok(buf) if buf.is_empty() => {
                    return Err(match self.state {
                        State::SkipLine(true) | State::FindDataStart => {
                            FormatError::MissingDataStart.into()
                        }
                        _ => FormatError::MissingBanner.into(),
                    });
                }
                Ok(buf) => buf,
            };

            let mut consumed = 0;

            while consumed < buf.len() && self.state != State::ReadData {
                let byte = buf[consumed];

                self.state = match self.state {
                    State::LineStart(matched) => {
                        if byte == BANNER[matched] {
                            if matched + 1 == BANNER.len() {
                                State::SkipLine(true)
                            } else {
                                State::LineStart(matched + 1)
                            }
                        } else if is_line_break(byte) {
                            // Blank lines and the second half of "\r\n" land here
                            State::LineStart(0)
                        } else {
                            State::SkipLine(false)
                        }
                    }
                    State::SkipLine(found_banner) => {
                        // Lines can be long; jump straight to the next line break
                        match memchr::memchr2(b'\n', b'\r', &buf[consumed..]) {
                            Some(pos) => {
                                consumed += pos;

                                if found_banner {
                                    State::FindDataStart
                                } else {
                                    State::LineStart(0)
                                }
                            }
                            None => {
                                consumed = buf.len() - 1;
                                State::SkipLine(found_banner)
                            }
                        }
                    }
                    State::FindDataStart => {
                        if byte == DATA_DELIMITER {
                            State::ReadData
                        } else if is_whitespace(byte) {
                            State::FindDataStart
                        } else {
                            return Err(FormatError::MissingDataStart.into());
                        }
                    }
                    state => state,
                };

                consumed += 1;
            }

            self.source.consume(consumed);
        }

        Ok(())
    }

    fn unpack(&mut self, dest: &mut [u8]) -> Result<usize> {
        let mut bytes_copied = 0;

        while bytes_copied < dest.len() && self.state == State::ReadData {
            let buf = match self.source.fill_buf() {
                Err(ref e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(BinHexError::from(e)),
                Ok(buf) if buf.is_empty() => return Err(Truncation::MissingDataEnd.into()),
                Ok(buf) => buf,
            };

            let mut consumed = 0;

            while consumed < buf.len() && bytes_copied < dest.len() {
                // The high bit may have been used for parity along the way
                let symbol = buf[consumed] & 0x7f;
                consumed += 1;

                if symbol == DATA_DELIMITER {
                    self.state = State::DataEnd;
                    break;
                }

                if is_whitespace(symbol) {
                    continue;
                }

                let value = SIX_BIT_VALUES[symbol as usize];

                if value == INVALID_SYMBOL {
                    return Err(FormatError::IllegalCharacter(buf[consumed - 1]).into());
                }

                self.bit_buffer = (self.bit_buffer << 6) | value as u16;
                self.bits_buffered += 6;

                if self.bits_buffered >= 8 {
                    self.bits_buffered -= 8;
                    dest[bytes_copied] = (self.bit_buffer >> self.bits_buffered) as u8;
                    self.bit_buffer &= (1 << self.bits_buffered) - 1;

                    bytes_copied += 1;
                }
            }

            self.source.consume(consumed);
        }

        Ok(bytes_copied)
    }
}

impl<R: BufRead> ByteSource for EncodedBinHexReader<R> {
    fn read_chunk(&mut self, dest: &mut [u8]) -> Result<Chunk> {
        match self.state {
            State::Done => return Err(Violation::ReadPastEnd.into()),
            State::DataEnd if dest.is_empty() => return Ok(Chunk::Data(0)),
            State::DataEnd => {
                self.state = State::Done;
                return Ok(Chunk::End);
            }
            State::ReadData => {}
            _ => self.seek_to_data_start()?,
        }

        if dest.is_empty() {
            return Ok(Chunk::Data(0));
        }

        match self.unpack(dest)? {
            0 => {
                // Only reachable by running into the closing delimiter; any leftover bits are
                // padding
                self.state = State::Done;
                Ok(Chunk::End)
            }
            bytes_copied => Ok(Chunk::Data(bytes_copied)),
        }
    }
}

fn is_line_break(byte: u8) -> bool {
    byte == b'\n' || byte == b'\r'
}

// Tab through carriage return, the four ASCII separators, and space
fn is_whitespace(byte: u8) -> bool {
    matches!(byte, 0x09..=0x0d | 0x1c..=0x1f | b' ')
}
