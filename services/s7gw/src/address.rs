//! S7-200 address grammar
//!
//! Addresses look like `VB2978`, `VB2978.20` (20-byte string), `VW10`,
//! `VD40` or `V255.3` (bit 3 of byte 255). The first character selects the
//! memory area, the second the unit size; a numeric second character means
//! bit addressing.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Data block number used for V memory on the S7-200 family
pub const DEFAULT_DB_NUMBER: u16 = 1;

/// Largest payload one address may cover; the host receives lengths as `u16`
pub const MAX_BYTE_SIZE: u32 = u16::MAX as u32;

/// Address parse errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    /// Fewer than two characters
    #[error("Address too short")]
    TooShort,

    /// First character is not a known area letter
    #[error("Unknown memory area '{0}'")]
    UnknownArea(char),

    /// Offset, bit index or length is not a plain decimal number
    #[error("Invalid number '{0}'")]
    InvalidNumber(String),

    /// Bit address without the `.bit` part
    #[error("Bit address requires '<byte>.<bit>'")]
    MissingBitIndex,

    /// `byte*8 + bit` does not fit the transport's bit position
    #[error("Bit position {byte}.{bit} out of range")]
    BitPositionOverflow { byte: u32, bit: u32 },

    /// Byte-string length above [`MAX_BYTE_SIZE`]
    #[error("String length {0} exceeds 65535 bytes")]
    LengthTooLarge(u32),
}

/// PLC memory area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Area {
    /// V memory (`V`)
    DataBlock,
    /// Process inputs (`I`/`E`)
    Input,
    /// Process outputs (`Q`/`A`)
    Output,
    /// Flag / marker memory (`M`/`F`)
    Flag,
    /// Timers (`T`)
    Timer,
    /// Counters (`C`/`Z`)
    Counter,
}

impl Area {
    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_lowercase() {
            'v' => Some(Self::DataBlock),
            'i' | 'e' => Some(Self::Input),
            'q' | 'a' => Some(Self::Output),
            'm' | 'f' => Some(Self::Flag),
            't' => Some(Self::Timer),
            'c' | 'z' => Some(Self::Counter),
            _ => None,
        }
    }
}

/// Unit size of an address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WordKind {
    Bit,
    Byte,
    Word,
    /// Double word, also used for REAL values
    DoubleWord,
}

impl WordKind {
    /// Bytes per element on the wire; the PLC returns one byte per bit
    pub fn element_size(self) -> usize {
        match self {
            Self::Bit | Self::Byte => 1,
            Self::Word => 2,
            Self::DoubleWord => 4,
        }
    }
}

/// A validated PLC address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Address {
    pub area: Area,
    pub word_kind: WordKind,
    /// Byte offset
    pub start: u32,
    /// Bit index, 0 unless `word_kind` is `Bit`; values above 7 run into
    /// the following bytes
    pub bit_offset: u32,
    /// Element count, above 1 only for byte strings
    pub amount: u32,
}

impl Address {
    /// Parse a raw address string
    pub fn parse(raw: &str) -> Result<Self, AddressError> {
        let mut chars = raw.chars();
        let (Some(first), Some(second)) = (chars.next(), chars.next()) else {
            return Err(AddressError::TooShort);
        };

        let area = Area::from_letter(first).ok_or(AddressError::UnknownArea(first))?;
        let kind = match second.to_ascii_lowercase() {
            'b' => Some(WordKind::Byte),
            'w' => Some(WordKind::Word),
            'd' => Some(WordKind::DoubleWord),
            _ => None,
        };

        match kind {
            Some(word_kind) => {
                let body = &raw[first.len_utf8() + second.len_utf8()..];
                let (offset, suffix) = match body.split_once('.') {
                    Some((offset, suffix)) => (offset, Some(suffix)),
                    None => (body, None),
                };
                let start = parse_number(offset)?;
                let amount = match (word_kind, suffix) {
                    (WordKind::Byte, Some(len)) => {
                        let len = parse_number(len)?;
                        if len > MAX_BYTE_SIZE {
                            return Err(AddressError::LengthTooLarge(len));
                        }
                        len
                    },
                    (_, Some(_)) => return Err(AddressError::InvalidNumber(body.to_string())),
                    (_, None) => 1,
                };
                Ok(Self {
                    area,
                    word_kind,
                    start,
                    bit_offset: 0,
                    amount,
                })
            },
            None => {
                let body = &raw[first.len_utf8()..];
                let (offset, bit) = body.split_once('.').ok_or(AddressError::MissingBitIndex)?;
                let start = parse_number(offset)?;
                let bit = parse_number(bit)?;
                if start.checked_mul(8).and_then(|b| b.checked_add(bit)).is_none() {
                    return Err(AddressError::BitPositionOverflow { byte: start, bit });
                }
                Ok(Self {
                    area,
                    word_kind: WordKind::Bit,
                    start,
                    bit_offset: bit,
                    amount: 1,
                })
            },
        }
    }

    /// Total payload size in bytes
    pub fn byte_size(&self) -> usize {
        self.word_kind.element_size() * self.amount as usize
    }

    /// Start value handed to the transport; bits are addressed as `byte*8 + bit`
    pub fn transport_start(&self) -> u32 {
        match self.word_kind {
            WordKind::Bit => self.start.saturating_mul(8).saturating_add(self.bit_offset),
            _ => self.start,
        }
    }

    /// Whether this is a multi-byte string address
    pub fn is_string(&self) -> bool {
        self.word_kind == WordKind::Byte && self.amount > 1
    }
}

impl std::str::FromStr for Address {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let area = match self.area {
            Area::DataBlock => 'V',
            Area::Input => 'I',
            Area::Output => 'Q',
            Area::Flag => 'M',
            Area::Timer => 'T',
            Area::Counter => 'C',
        };
        match self.word_kind {
            WordKind::Bit => write!(f, "{}{}.{}", area, self.start, self.bit_offset),
            WordKind::Byte if self.amount != 1 => {
                write!(f, "{}B{}.{}", area, self.start, self.amount)
            },
            WordKind::Byte => write!(f, "{}B{}", area, self.start),
            WordKind::Word => write!(f, "{}W{}", area, self.start),
            WordKind::DoubleWord => write!(f, "{}D{}", area, self.start),
        }
    }
}

/// Plain decimal digits only
fn parse_number(s: &str) -> Result<u32, AddressError> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return Err(AddressError::InvalidNumber(s.to_string()));
    }
    s.parse::<u32>()
        .map_err(|_| AddressError::InvalidNumber(s.to_string()))
}
