//! Big data block (db) cells.
//!
//! Registry values larger than 16,344 bytes are stored in big data blocks
//! on format 1.4 and later: a header cell pointing at a list of segment
//! cells, each holding up to 16,344 bytes of the payload.
//!
//! ```text
//! Offset  Size  Description
//! 0x00    2     Signature ("db")
//! 0x02    2     Number of segments
//! 0x04    4     Offset to segment list
//! ```

use crate::cell::CellType;
use crate::error::{HiveError, HiveResult};
use crate::utils::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};

/// Largest payload stored in a single data cell, and the size of one segment.
pub const MAX_DIRECT_DATA_SIZE: usize = 16344;

/// Big data block header structure.
#[derive(Debug, Clone)]
pub struct BigDataBlock {
    /// Number of data segments
    pub segment_count: u16,

    /// Offset to the list of segment offsets
    pub segment_list_offset: u32,
}

impl BigDataBlock {
    /// Size of a big data block header
    pub const SIZE: usize = 8;

    /// Parses a big data block header from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32) -> HiveResult<Self> {
        if data.len() < Self::SIZE {
            return Err(HiveError::truncated(offset, Self::SIZE, data.len()));
        }
        CellType::DataBlock.expect(data, offset)?;

        Ok(BigDataBlock {
            segment_count: read_u16_le(data, 0x02)?,
            segment_list_offset: read_u32_le(data, 0x04)?,
        })
    }

    /// Number of segments needed for a payload of `len` bytes.
    pub fn segments_for(len: usize) -> usize {
        len.div_ceil(MAX_DIRECT_DATA_SIZE)
    }

    /// Serializes the header.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0..2].copy_from_slice(CellType::DataBlock.signature());
        write_u16_le(&mut buf, 0x02, self.segment_count);
        write_u32_le(&mut buf, 0x04, self.segment_list_offset);
        buf
    }
}

/// Parses a segment list cell into `count` segment offsets.
pub fn parse_segment_list(data: &[u8], count: u16, offset: u32) -> HiveResult<Vec<u32>> {
    let expected = count as usize * 4;
    if data.len() < expected {
        return Err(HiveError::truncated(offset, expected, data.len()));
    }

    (0..count as usize)
        .map(|i| read_u32_le(data, i * 4))
        .collect()
}

/// Serializes a segment list cell.
pub fn encode_segment_list(segments: &[u32]) -> Vec<u8> {
    segments.iter().flat_map(|s| s.to_le_bytes()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bigdata_minimum_size() {
        let data = vec![0u8; 7];
        assert!(BigDataBlock::parse(&data, 0).is_err());
    }

    #[test]
    fn test_bigdata_invalid_signature() {
        let mut data = vec![0u8; 8];
        data[0..2].copy_from_slice(b"XX");
        assert!(BigDataBlock::parse(&data, 0).is_err());
    }

    #[test]
    fn test_bigdata_header_roundtrip() {
        let header = BigDataBlock {
            segment_count: 5,
            segment_list_offset: 0x20,
        };
        let db = BigDataBlock::parse(&header.encode(), 0).unwrap();
        assert_eq!(db.segment_count, 5);
        assert_eq!(db.segment_list_offset, 0x20);
    }

    #[test]
    fn test_segments_for() {
        assert_eq!(BigDataBlock::segments_for(MAX_DIRECT_DATA_SIZE + 1), 2);
        assert_eq!(BigDataBlock::segments_for(MAX_DIRECT_DATA_SIZE * 3), 3);
    }

    #[test]
    fn test_segment_list() {
        let list = encode_segment_list(&[0x100, 0x5000]);
        assert_eq!(parse_segment_list(&list, 2, 0).unwrap(), vec![0x100, 0x5000]);
        assert!(parse_segment_list(&list, 3, 0).is_err());
    }
}
