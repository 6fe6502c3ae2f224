//! Registry value (vk) cells and decoding of value data.

use crate::cell::CellType;
use crate::error::{HiveError, HiveResult};
use crate::regtype::RegType;
use crate::utils::{
    encode_name, read_latin1_string, read_u16_le, read_u32_le, read_utf16_string, write_u16_le,
    write_u32_le, NO_CELL,
};
use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Size of the fixed part of a value key, up to the name.
pub const VALUE_KEY_FIXED_SIZE: usize = 0x14;

/// Payloads up to this size live in the data offset field itself.
pub const MAX_INLINE_DATA: usize = 4;

/// High bit of the data length field: data is stored inline.
const DATA_INLINE_FLAG: u32 = 0x8000_0000;

/// Value name is stored compressed (Latin-1).
const VALUE_COMP_NAME: u16 = 0x0001;

/// Value key (vk) structure.
#[derive(Debug, Clone)]
pub struct ValueKey {
    /// Length of value data in bytes.
    pub data_length: u32,

    /// Whether the data lives in the `data_offset` field.
    pub inline: bool,

    /// Offset to value data, or the data itself when `inline`.
    pub data_offset: u32,

    /// Raw value type tag.
    pub data_type: u32,

    /// Value name; empty for the default value.
    pub name: String,
}

impl ValueKey {
    /// Parses a value key from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32) -> HiveResult<Self> {
        if data.len() < VALUE_KEY_FIXED_SIZE {
            return Err(HiveError::truncated(offset, VALUE_KEY_FIXED_SIZE, data.len()));
        }
        CellType::ValueKey.expect(data, offset)?;

        let name_length = read_u16_le(data, 0x02)? as usize;
        let raw_length = read_u32_le(data, 0x04)?;
        let flags = read_u16_le(data, 0x10)?;

        let name_end = VALUE_KEY_FIXED_SIZE + name_length;
        let name_data = data
            .get(VALUE_KEY_FIXED_SIZE..name_end)
            .ok_or_else(|| HiveError::truncated(offset, name_end, data.len()))?;
        let name = if flags & VALUE_COMP_NAME != 0 {
            read_latin1_string(name_data)
        } else {
            read_utf16_string(name_data, offset)?
        };

        Ok(ValueKey {
            data_length: raw_length & !DATA_INLINE_FLAG,
            inline: raw_length & DATA_INLINE_FLAG != 0,
            data_offset: read_u32_le(data, 0x08)?,
            data_type: read_u32_le(data, 0x0C)?,
            name,
        })
    }

    /// Builds a value key for `payload`.
    ///
    /// Small payloads are placed inline; for larger ones `data_offset` must
    /// be filled in once the data cell is allocated.
    pub fn for_payload(name: impl Into<String>, data_type: u32, payload: &[u8]) -> Self {
        let inline = payload.len() <= MAX_INLINE_DATA;
        let data_offset = if inline {
            let mut field = [0u8; 4];
            field[..payload.len()].copy_from_slice(payload);
            u32::from_le_bytes(field)
        } else {
            NO_CELL
        };

        Self {
            data_length: payload.len() as u32,
            inline,
            data_offset,
            data_type,
            name: name.into(),
        }
    }

    /// Returns the cell payload size needed to store this value key.
    pub fn encoded_len(&self) -> usize {
        VALUE_KEY_FIXED_SIZE + encode_name(&self.name).0.len()
    }

    /// Serializes the value key into `buf`, which must hold [`ValueKey::encoded_len`] bytes.
    pub fn write_into(&self, buf: &mut [u8]) -> HiveResult<()> {
        let (name_bytes, compressed) = encode_name(&self.name);
        let name_len = u16::try_from(name_bytes.len())
            .map_err(|_| HiveError::TooLarge(format!("value name '{}'", self.name)))?;
        if self.data_length & DATA_INLINE_FLAG != 0 {
            return Err(HiveError::TooLarge(format!("data of value '{}'", self.name)));
        }

        let raw_length = if self.inline {
            self.data_length | DATA_INLINE_FLAG
        } else {
            self.data_length
        };

        buf[0..2].copy_from_slice(CellType::ValueKey.signature());
        write_u16_le(buf, 0x02, name_len);
        write_u32_le(buf, 0x04, raw_length);
        write_u32_le(buf, 0x08, self.data_offset);
        write_u32_le(buf, 0x0C, self.data_type);
        write_u16_le(buf, 0x10, if compressed { VALUE_COMP_NAME } else { 0 });
        write_u16_le(buf, 0x12, 0);
        buf[VALUE_KEY_FIXED_SIZE..VALUE_KEY_FIXED_SIZE + name_bytes.len()]
            .copy_from_slice(&name_bytes);
        Ok(())
    }

    /// Returns true if the data is stored in the data offset field.
    pub fn is_inline_data(&self) -> bool {
        self.inline
    }

    /// Extracts inline data.
    pub fn inline_data(&self) -> Vec<u8> {
        let bytes = self.data_offset.to_le_bytes();
        let len = (self.data_length as usize).min(MAX_INLINE_DATA);
        bytes[..len].to_vec()
    }
}

/// Parsed registry value data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueData {
    /// No data.
    None,

    /// String value.
    String(String),

    /// Expandable string value.
    ExpandString(String),

    /// Binary data.
    Binary(Vec<u8>),

    /// 32-bit integer.
    Dword(u32),

    /// 32-bit big-endian integer.
    DwordBigEndian(u32),

    /// Multiple strings.
    MultiString(Vec<String>),

    /// 64-bit integer.
    Qword(u64),

    /// Unknown or unsupported type.
    Unknown(Vec<u8>),
}

impl ValueData {
    /// Decodes a stored payload according to its type tag.
    pub fn parse(data: &[u8], data_type: u32) -> HiveResult<Self> {
        let Some(reg_type) = RegType::from_tag(data_type) else {
            return Ok(ValueData::Unknown(data.to_vec()));
        };
        if data.is_empty() && reg_type != RegType::Binary {
            return Ok(ValueData::None);
        }

        match reg_type {
            RegType::None => Ok(ValueData::None),
            RegType::Sz => Ok(ValueData::String(read_utf16_string(data, 0)?)),
            RegType::ExpandSz => Ok(ValueData::ExpandString(read_utf16_string(data, 0)?)),
            RegType::Binary => Ok(ValueData::Binary(data.to_vec())),
            RegType::Dword => Ok(ValueData::Dword(LittleEndian::read_u32(leading(data, 4)?))),
            RegType::DwordBigEndian => {
                Ok(ValueData::DwordBigEndian(BigEndian::read_u32(leading(data, 4)?)))
            }
            RegType::Qword => Ok(ValueData::Qword(LittleEndian::read_u64(leading(data, 8)?))),
            RegType::MultiSz => {
                let block = read_utf16_string(data, 0)?;
                let items = if block.is_empty() {
                    Vec::new()
                } else {
                    block.split('\0').map(str::to_string).collect()
                };
                Ok(ValueData::MultiString(items))
            }
            _ => Ok(ValueData::Unknown(data.to_vec())),
        }
    }
}

fn leading(data: &[u8], len: usize) -> HiveResult<&[u8]> {
    data.get(..len)
        .ok_or_else(|| HiveError::truncated(0, len, data.len()))
}

impl std::fmt::Display for ValueData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueData::None => f.write_str("(none)"),
            ValueData::String(s) | ValueData::ExpandString(s) => f.write_str(s),
            ValueData::Binary(b) | ValueData::Unknown(b) => f.write_str(&hex::encode(b)),
            ValueData::Dword(d) | ValueData::DwordBigEndian(d) => write!(f, "{} (0x{:08X})", d, d),
            ValueData::Qword(q) => write!(f, "{} (0x{:016X})", q, q),
            ValueData::MultiString(strings) => f.write_str(&strings.join(", ")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;

    #[test]
    fn test_value_key_minimum_size() {
        let data = vec![0u8; 19];
        assert!(ValueKey::parse(&data, 0).is_err());
    }

    #[test]
    fn test_value_key_invalid_signature() {
        let mut data = vec![0u8; 24];
        data[0..2].copy_from_slice(b"XX");
        assert!(ValueKey::parse(&data, 0).is_err());
    }

    #[test]
    fn test_inline_data() {
        let vk = ValueKey::for_payload("Count", RegType::Dword.tag(), &[1, 2, 3, 4]);
        let mut buf = vec![0u8; vk.encoded_len()];
        vk.write_into(&mut buf).unwrap();

        let parsed = ValueKey::parse(&buf, 0).unwrap();
        assert!(parsed.is_inline_data());
        assert_eq!(parsed.data_length, 4);
        assert_eq!(parsed.inline_data(), vec![1, 2, 3, 4]);
        assert_eq!(parsed.name, "Count");
    }

    #[test]
    fn test_out_of_line_data() {
        let mut vk = ValueKey::for_payload("", RegType::Binary.tag(), &[0u8; 10]);
        assert!(!vk.inline);
        vk.data_offset = 0x1234;

        let mut buf = vec![0u8; vk.encoded_len()];
        vk.write_into(&mut buf).unwrap();

        let parsed = ValueKey::parse(&buf, 0).unwrap();
        assert!(!parsed.is_inline_data());
        assert_eq!(parsed.data_offset, 0x1234);
        assert_eq!(parsed.data_length, 10);
        assert_eq!(parsed.name, "");
    }

    #[test]
    fn test_decode_encoded_payloads() {
        let sz = codec::encode(RegType::Sz, "hello", "").unwrap();
        assert_eq!(
            ValueData::parse(&sz, RegType::Sz.tag()).unwrap(),
            ValueData::String("hello".into())
        );

        let multi = codec::encode(RegType::MultiSz, "a||b", "|").unwrap();
        assert_eq!(
            ValueData::parse(&multi, RegType::MultiSz.tag()).unwrap(),
            ValueData::MultiString(vec!["a".into(), "".into(), "b".into()])
        );

        let dword = codec::encode(RegType::Dword, "0x10", "").unwrap();
        assert_eq!(
            ValueData::parse(&dword, RegType::Dword.tag()).unwrap(),
            ValueData::Dword(16)
        );
    }

    #[test]
    fn test_truncated_dword() {
        assert!(ValueData::parse(&[1, 2], RegType::Dword.tag()).is_err());
    }

    #[test]
    fn test_unknown_tag() {
        assert_eq!(
            ValueData::parse(&[9], 0x4000).unwrap(),
            ValueData::Unknown(vec![9])
        );
    }

    #[test]
    fn test_value_data_display() {
        assert_eq!(ValueData::None.to_string(), "(none)");
        assert_eq!(ValueData::String("Hello".into()).to_string(), "Hello");
        assert!(ValueData::Dword(0x12345678).to_string().contains("0x12345678"));
        assert_eq!(ValueData::Binary(vec![0x01, 0xAB]).to_string(), "01ab");
    }
}
