//! Value conversion between host values and PLC wire bytes
//!
//! The PLC is big-endian. 16 and 32 bit scalars are fully byte-reversed
//! relative to a little-endian host; byte strings pass through unchanged.

use serde::{Deserialize, Serialize};

use crate::address::{Address, WordKind};
use crate::error::{GatewayError, Result};

/// Value type selected once per variable from its address
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValueKind {
    Bool,
    Uint8,
    Int16,
    Int32,
    Float,
    /// Byte string of the given length
    String(usize),
}

/// A decoded PLC value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Bool(bool),
    Uint8(u8),
    Int16(i16),
    Int32(i32),
    Float(f32),
    String(String),
}

impl ValueKind {
    /// Default kind for an address; double words are treated as REAL
    pub fn for_address(addr: &Address) -> Self {
        if addr.amount > 1 {
            return Self::String(addr.byte_size());
        }
        match addr.word_kind {
            WordKind::Bit => Self::Bool,
            WordKind::Byte => Self::Uint8,
            WordKind::Word => Self::Int16,
            WordKind::DoubleWord => Self::Float,
        }
    }

    /// Wire size in bytes
    pub fn size(self) -> usize {
        match self {
            Self::Bool | Self::Uint8 => 1,
            Self::Int16 => 2,
            Self::Int32 | Self::Float => 4,
            Self::String(len) => len,
        }
    }

    /// Decode wire bytes
    ///
    /// A `Float` receiving only two bytes is read as `Int16`.
    pub fn decode(self, bytes: &[u8]) -> Result<Value> {
        match self {
            Self::Bool => first(bytes).map(|b| Value::Bool(b != 0)),
            Self::Uint8 => first(bytes).map(Value::Uint8),
            Self::Int16 => Ok(Value::Int16(i16::from_be_bytes(fixed(bytes)?))),
            Self::Int32 => Ok(Value::Int32(i32::from_be_bytes(fixed(bytes)?))),
            Self::Float if bytes.len() == 2 => {
                Ok(Value::Int16(i16::from_be_bytes(fixed(bytes)?)))
            },
            Self::Float => Ok(Value::Float(f32::from_be_bytes(fixed(bytes)?))),
            Self::String(_) => {
                let end = bytes
                    .iter()
                    .rposition(|&b| b != 0)
                    .map_or(0, |pos| pos + 1);
                Ok(Value::String(
                    String::from_utf8_lossy(&bytes[..end]).into_owned(),
                ))
            },
        }
    }
}

impl Value {
    /// Encode into wire order
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Bool(v) => vec![u8::from(*v)],
            Self::Uint8(v) => vec![*v],
            Self::Int16(v) => v.to_be_bytes().to_vec(),
            Self::Int32(v) => v.to_be_bytes().to_vec(),
            Self::Float(v) => v.to_be_bytes().to_vec(),
            Self::String(v) => v.as_bytes().to_vec(),
        }
    }
}

/// Size a write payload for an address
///
/// Strings are truncated or zero-padded to the address length; scalars must
/// match exactly.
pub fn fit_payload(addr: &Address, mut payload: Vec<u8>) -> Result<Vec<u8>> {
    let size = addr.byte_size();
    if addr.is_string() {
        payload.resize(size, 0);
        return Ok(payload);
    }
    if payload.len() != size {
        return Err(GatewayError::InvalidPayload(format!(
            "{} expects {} bytes, got {}",
            addr,
            size,
            payload.len()
        )));
    }
    Ok(payload)
}

fn first(bytes: &[u8]) -> Result<u8> {
    bytes
        .first()
        .copied()
        .ok_or_else(|| GatewayError::InvalidPayload("empty payload".to_string()))
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        GatewayError::InvalidPayload(format!("expected {} bytes, got {}", N, bytes.len()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kind(raw: &str) -> ValueKind {
        ValueKind::for_address(&Address::parse(raw).unwrap())
    }

    #[test]
    fn test_kind_from_address() {
        assert_eq!(kind("V1.2"), ValueKind::Bool);
        assert_eq!(kind("VB4"), ValueKind::Uint8);
        assert_eq!(kind("VW4"), ValueKind::Int16);
        assert_eq!(kind("VD4"), ValueKind::Float);
        assert_eq!(kind("VB4.12"), ValueKind::String(12));
    }

    #[test]
    fn test_scalars_are_byte_reversed() {
        assert_eq!(Value::Int16(0x1234).encode(), vec![0x12, 0x34]);
        assert_eq!(
            Value::Int32(0x0102_0304).encode(),
            vec![0x01, 0x02, 0x03, 0x04]
        );
        // 1.0f32 = 0x3F800000
        assert_eq!(Value::Float(1.0).encode(), vec![0x3F, 0x80, 0x00, 0x00]);
        assert_eq!(
            ValueKind::Float.decode(&[0x41, 0x20, 0x00, 0x00]).unwrap(),
            Value::Float(10.0)
        );
        assert_eq!(
            ValueKind::Int16.decode(&[0xFF, 0xFE]).unwrap(),
            Value::Int16(-2)
        );
    }

    #[test]
    fn test_float_with_two_bytes_reads_as_int16() {
        assert_eq!(
            ValueKind::Float.decode(&[0x00, 0x2A]).unwrap(),
            Value::Int16(42)
        );
    }

    #[test]
    fn test_string_passthrough() {
        let value = ValueKind::String(8).decode(b"PUMP\0\0\0\0").unwrap();
        assert_eq!(value, Value::String("PUMP".to_string()));
        assert_eq!(Value::String("AB".into()).encode(), b"AB".to_vec());
    }

    #[test]
    fn test_bool_and_short_payloads() {
        assert_eq!(ValueKind::Bool.decode(&[2]).unwrap(), Value::Bool(true));
        assert_eq!(ValueKind::Bool.decode(&[0]).unwrap(), Value::Bool(false));
        assert!(ValueKind::Bool.decode(&[]).is_err());
        assert!(ValueKind::Int32.decode(&[1, 2]).is_err());
    }

    #[test]
    fn test_fit_payload() {
        let string = Address::parse("VB0.4").unwrap();
        assert_eq!(fit_payload(&string, b"AB".to_vec()).unwrap(), b"AB\0\0");
        assert_eq!(fit_payload(&string, b"ABCDEF".to_vec()).unwrap(), b"ABCD");

        let word = Address::parse("VW0").unwrap();
        assert!(fit_payload(&word, vec![1, 2]).is_ok());
        assert!(matches!(
            fit_payload(&word, vec![1]),
            Err(GatewayError::InvalidPayload(_))
        ));
    }
}
