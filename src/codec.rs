//! Encoding of user-supplied string data into registry value payloads.
//!
//! | Type                  | Input                      | Payload                               |
//! |-----------------------|----------------------------|---------------------------------------|
//! | `REG_SZ`, `EXPAND_SZ` | any text                   | UTF-16LE + NUL16                      |
//! | `REG_MULTI_SZ`        | items joined by separator  | each item UTF-16LE + NUL16, then NUL16 |
//! | `REG_DWORD`           | decimal or `0x` hex        | 4 bytes little-endian                 |
//! | `REG_QWORD`           | decimal or `0x` hex        | 8 bytes little-endian                 |
//! | `REG_BINARY`          | standard base64            | decoded bytes                         |
//!
//! Every other type is rejected with [`RegistryError::UnsupportedType`].

use crate::error::{RegistryError, Result};
use crate::regtype::RegType;
use crate::utils::encode_utf16le;
use base64::engine::general_purpose::STANDARD as Base64;
use base64::Engine;
use byteorder::{LittleEndian, WriteBytesExt};

const NUL16: [u8; 2] = [0, 0];

/// Encodes `raw` into the payload for `reg_type`.
///
/// `separator` only matters for `REG_MULTI_SZ`. An empty separator keeps the
/// whole input as a single item.
pub fn encode(reg_type: RegType, raw: &str, separator: &str) -> Result<Vec<u8>> {
    match reg_type {
        RegType::Sz | RegType::ExpandSz => Ok(encode_sz(raw)),
        RegType::MultiSz => {
            if separator.is_empty() {
                Ok(encode_multi_sz([raw]))
            } else {
                Ok(encode_multi_sz(raw.split(separator)))
            }
        }
        RegType::Dword => {
            let n = parse_uint(raw, 32).map_err(|r| RegistryError::encoding(reg_type, r))?;
            let mut out = Vec::with_capacity(4);
            out.write_u32::<LittleEndian>(n as u32)
                .map_err(|e| RegistryError::encoding(reg_type, e.to_string()))?;
            Ok(out)
        }
        RegType::Qword => {
            let n = parse_uint(raw, 64).map_err(|r| RegistryError::encoding(reg_type, r))?;
            let mut out = Vec::with_capacity(8);
            out.write_u64::<LittleEndian>(n)
                .map_err(|e| RegistryError::encoding(reg_type, e.to_string()))?;
            Ok(out)
        }
        RegType::Binary => Base64
            .decode(raw)
            .map_err(|e| RegistryError::encoding(reg_type, format!("invalid base64: {}", e))),
        other => Err(RegistryError::UnsupportedType(other.to_string())),
    }
}

/// Encodes a single NUL-terminated UTF-16LE string.
pub fn encode_sz(s: &str) -> Vec<u8> {
    let mut out = encode_utf16le(s);
    out.extend_from_slice(&NUL16);
    out
}

/// Encodes a multi-string block: every item NUL-terminated, then one more NUL.
pub fn encode_multi_sz<'a, I>(items: I) -> Vec<u8>
where
    I: IntoIterator<Item = &'a str>,
{
    let mut out = Vec::new();
    for item in items {
        out.extend_from_slice(&encode_utf16le(item));
        out.extend_from_slice(&NUL16);
    }
    out.extend_from_slice(&NUL16);
    out
}

/// Parses an unsigned integer of at most `bits` bits.
///
/// A `0x`/`0X` prefix selects hexadecimal, anything else is decimal. Signs,
/// whitespace and digit separators are rejected.
fn parse_uint(raw: &str, bits: u32) -> std::result::Result<u64, String> {
    let (digits, radix) = match raw.get(..2) {
        Some(p) if p.eq_ignore_ascii_case("0x") => (&raw[2..], 16),
        _ => (raw, 10),
    };

    if digits.is_empty() {
        return Err(format!("'{}' is not a number", raw));
    }
    if !digits.chars().all(|c| c.is_digit(radix)) {
        return Err(format!("'{}' is not a valid base-{} number", raw, radix));
    }

    let value = u64::from_str_radix(digits, radix)
        .map_err(|_| format!("'{}' does not fit in {} bits", raw, bits))?;
    if bits < 64 && value >> bits != 0 {
        return Err(format!("'{}' does not fit in {} bits", raw, bits));
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sz() {
        assert_eq!(encode(RegType::Sz, "Hi", "").unwrap(), vec![b'H', 0, b'i', 0, 0, 0]);
        assert_eq!(encode(RegType::ExpandSz, "", "").unwrap(), vec![0, 0]);
    }

    #[test]
    fn test_sz_surrogate_pair() {
        // U+1F600 becomes D83D DE00
        let bytes = encode(RegType::Sz, "\u{1F600}", "").unwrap();
        assert_eq!(bytes, vec![0x3D, 0xD8, 0x00, 0xDE, 0, 0]);
    }

    #[test]
    fn test_multi_sz() {
        let bytes = encode(RegType::MultiSz, "a,b", ",").unwrap();
        assert_eq!(bytes, vec![b'a', 0, 0, 0, b'b', 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_multi_sz_multichar_separator() {
        let bytes = encode(RegType::MultiSz, "x::y::z", "::").unwrap();
        assert_eq!(bytes, encode_multi_sz(["x", "y", "z"]));
    }

    #[test]
    fn test_multi_sz_empty_input() {
        // One empty item: its terminator plus the block terminator
        assert_eq!(encode(RegType::MultiSz, "", ",").unwrap(), vec![0, 0, 0, 0]);
        assert_eq!(encode_multi_sz(std::iter::empty()), vec![0, 0]);
    }

    #[test]
    fn test_multi_sz_empty_separator_is_single_item() {
        assert_eq!(
            encode(RegType::MultiSz, "a,b", "").unwrap(),
            encode_multi_sz(["a,b"])
        );
    }

    #[test]
    fn test_dword_hex_and_decimal() {
        assert_eq!(encode(RegType::Dword, "0x10", "").unwrap(), vec![0x10, 0, 0, 0]);
        assert_eq!(encode(RegType::Dword, "0X10", "").unwrap(), vec![0x10, 0, 0, 0]);
        assert_eq!(encode(RegType::Dword, "16", "").unwrap(), vec![0x10, 0, 0, 0]);
        assert_eq!(
            encode(RegType::Dword, "0xffffffff", "").unwrap(),
            vec![0xFF, 0xFF, 0xFF, 0xFF]
        );
    }

    #[test]
    fn test_dword_rejects_bad_input() {
        for bad in ["", "0x", "4294967296", "0x100000000", "-1", "+1", "1_0", " 1", "0xZZ", "ten"] {
            assert!(
                matches!(encode(RegType::Dword, bad, ""), Err(RegistryError::Encoding { .. })),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_qword() {
        assert_eq!(
            encode(RegType::Qword, "0x0102030405060708", "").unwrap(),
            vec![8, 7, 6, 5, 4, 3, 2, 1]
        );
        assert_eq!(
            encode(RegType::Qword, "18446744073709551615", "").unwrap(),
            vec![0xFF; 8]
        );
        assert!(encode(RegType::Qword, "18446744073709551616", "").is_err());
    }

    #[test]
    fn test_binary() {
        assert_eq!(encode(RegType::Binary, "AQID", "").unwrap(), vec![1, 2, 3]);
        assert_eq!(encode(RegType::Binary, "", "").unwrap(), Vec::<u8>::new());
        assert!(matches!(
            encode(RegType::Binary, "not base64!", ""),
            Err(RegistryError::Encoding { .. })
        ));
    }

    #[test]
    fn test_unsupported_types() {
        for ty in [
            RegType::None,
            RegType::DwordBigEndian,
            RegType::Link,
            RegType::ResourceList,
            RegType::FullResourceDesc,
            RegType::ResourceRequirementsList,
        ] {
            let err = encode(ty, "1", "").unwrap_err();
            assert!(matches!(err, RegistryError::UnsupportedType(_)));
            assert!(err.to_string().starts_with("unsupported data type"));
        }
    }
}
