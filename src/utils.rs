//! Byte-level helpers shared by the hive reader and writer.

use crate::error::{HiveError, HiveResult};
use byteorder::{ByteOrder, LittleEndian};
use encoding_rs::UTF_16LE;

/// Offset where hive bins start (after base block)
pub const HBIN_START_OFFSET: u32 = 0x1000;

/// Offset value used on disk for "no cell".
pub const NO_CELL: u32 = 0xFFFF_FFFF;

/// Seconds between 1601-01-01 (FILETIME epoch) and 1970-01-01.
const FILETIME_UNIX_DIFF: i64 = 11_644_473_600;

/// Decodes a compressed (Latin-1) name, trimming trailing NULs.
///
/// Names flagged as compressed store one byte per character, which maps
/// directly onto U+0000..U+00FF.
pub fn read_latin1_string(data: &[u8]) -> String {
    let s: String = data.iter().map(|&b| char::from(b)).collect();
    s.trim_end_matches('\0').to_string()
}

/// Reads a UTF-16LE string from a byte slice, trimming null terminators.
///
/// # Errors
///
/// Returns an error if the data length is odd or the data is not valid UTF-16.
pub fn read_utf16_string(data: &[u8], offset: u32) -> HiveResult<String> {
    if data.is_empty() {
        return Ok(String::new());
    }

    if data.len() % 2 != 0 {
        return Err(HiveError::InvalidUtf16 { offset });
    }

    let (decoded, _encoding, had_errors) = UTF_16LE.decode(data);
    if had_errors {
        return Err(HiveError::InvalidUtf16 { offset });
    }

    Ok(decoded.trim_end_matches('\0').to_string())
}

/// Encodes a string as UTF-16LE without a terminator.
pub fn encode_utf16le(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() * 2);
    for unit in s.encode_utf16() {
        out.extend_from_slice(&unit.to_le_bytes());
    }
    out
}

/// Encodes a key or value name for storage.
///
/// Returns the name bytes and whether they are in compressed (Latin-1) form.
pub fn encode_name(name: &str) -> (Vec<u8>, bool) {
    if name.chars().all(|c| (c as u32) <= 0xFF) {
        (name.chars().map(|c| c as u8).collect(), true)
    } else {
        (encode_utf16le(name), false)
    }
}

/// Reads a u16 from a byte slice at the given offset.
pub fn read_u16_le(data: &[u8], offset: usize) -> HiveResult<u16> {
    field(data, offset, 2).map(LittleEndian::read_u16)
}

/// Reads a u32 from a byte slice at the given offset.
pub fn read_u32_le(data: &[u8], offset: usize) -> HiveResult<u32> {
    field(data, offset, 4).map(LittleEndian::read_u32)
}

/// Reads an i32 from a byte slice at the given offset.
pub fn read_i32_le(data: &[u8], offset: usize) -> HiveResult<i32> {
    field(data, offset, 4).map(LittleEndian::read_i32)
}

/// Reads a u64 from a byte slice at the given offset.
pub fn read_u64_le(data: &[u8], offset: usize) -> HiveResult<u64> {
    field(data, offset, 8).map(LittleEndian::read_u64)
}

fn field(data: &[u8], offset: usize, len: usize) -> HiveResult<&[u8]> {
    data.get(offset..offset + len).ok_or_else(|| {
        HiveError::truncated(offset as u32, len, data.len().saturating_sub(offset))
    })
}

/// Writes a u16 into `buf` at `offset`. The caller sizes the buffer.
pub fn write_u16_le(buf: &mut [u8], offset: usize, value: u16) {
    LittleEndian::write_u16(&mut buf[offset..offset + 2], value);
}

/// Writes a u32 into `buf` at `offset`. The caller sizes the buffer.
pub fn write_u32_le(buf: &mut [u8], offset: usize, value: u32) {
    LittleEndian::write_u32(&mut buf[offset..offset + 4], value);
}

/// Writes a u64 into `buf` at `offset`. The caller sizes the buffer.
pub fn write_u64_le(buf: &mut [u8], offset: usize, value: u64) {
    LittleEndian::write_u64(&mut buf[offset..offset + 8], value);
}

/// Calculates the XOR checksum over the first 508 bytes of the base block.
///
/// A result of 0 is stored as 1 and 0xFFFFFFFF as 0xFFFFFFFE.
pub fn calculate_checksum(data: &[u8]) -> u32 {
    let mut checksum: u32 = 0;
    for chunk in data[..0x1FC.min(data.len())].chunks_exact(4) {
        checksum ^= LittleEndian::read_u32(chunk);
    }

    match checksum {
        0 => 1,
        0xFFFF_FFFF => 0xFFFF_FFFE,
        c => c,
    }
}

/// Converts a relative cell offset to an absolute hive offset.
///
/// # Errors
///
/// Returns `HiveError::InvalidOffset` if the offset would overflow.
#[inline]
pub fn cell_offset_to_absolute(cell_offset: u32) -> HiveResult<u32> {
    cell_offset
        .checked_add(HBIN_START_OFFSET)
        .ok_or(HiveError::InvalidOffset {
            offset: cell_offset,
            hive_size: 0,
        })
}

/// Rounds `len` up to the next multiple of 8.
#[inline]
pub fn align8(len: usize) -> usize {
    (len + 7) & !7
}

/// Returns the current time as a Windows FILETIME.
pub fn filetime_now() -> u64 {
    datetime_to_filetime(chrono::Utc::now())
}

/// Converts a UTC timestamp to a Windows FILETIME (100ns ticks since 1601).
pub fn datetime_to_filetime(dt: chrono::DateTime<chrono::Utc>) -> u64 {
    let secs = dt.timestamp() + FILETIME_UNIX_DIFF;
    if secs < 0 {
        return 0;
    }
    secs as u64 * 10_000_000 + u64::from(dt.timestamp_subsec_nanos() / 100)
}

/// Converts a Windows FILETIME to a UTC timestamp.
pub fn filetime_to_datetime(filetime: u64) -> Option<chrono::DateTime<chrono::Utc>> {
    let seconds = (filetime / 10_000_000) as i64 - FILETIME_UNIX_DIFF;
    let nanos = ((filetime % 10_000_000) * 100) as u32;
    chrono::DateTime::from_timestamp(seconds, nanos)
}
