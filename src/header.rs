//! Registry hive base block (header).
//!
//! The base block is the first 4096 bytes (0x1000) of a registry hive file.
//! It contains metadata about the hive including version, timestamps, and
//! the root key cell offset.
//!
//! Only the fields below are interpreted. When a loaded hive is written back,
//! the remaining bytes of the original block are carried over untouched.

use crate::error::{HiveError, HiveResult};
use crate::utils::{
    calculate_checksum, filetime_to_datetime, read_u32_le, read_u64_le, read_utf16_string,
    write_u32_le, write_u64_le,
};
use std::fmt;

/// Size of the base block in bytes.
pub const BASE_BLOCK_SIZE: usize = 4096;

/// Expected signature for a valid registry hive ("regf").
pub const REGF_SIGNATURE: &[u8; 4] = b"regf";

/// Offset of the embedded file name.
const FILE_NAME_OFFSET: usize = 0x30;

/// Length of the file name field (64 UTF-16LE characters = 128 bytes).
const FILE_NAME_LENGTH: usize = 128;

/// Offset of the checksum field in the base block.
const CHECKSUM_OFFSET: usize = 0x1FC;

/// Format version written for newly created hives.
pub const DEFAULT_MINOR_VERSION: u32 = 5;

/// Registry hive base block header.
#[derive(Debug, Clone)]
pub struct BaseBlock {
    /// Primary sequence number.
    pub primary_sequence: u32,

    /// Secondary sequence number.
    pub secondary_sequence: u32,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Major version of the hive format.
    pub major_version: u32,

    /// Minor version of the hive format.
    pub minor_version: u32,

    /// File type (0 = primary file).
    pub file_type: u32,

    /// File format (1 = direct memory load).
    pub file_format: u32,

    /// Offset to root key cell (relative to first hbin).
    pub root_cell_offset: u32,

    /// Total size of the hive bins in bytes.
    pub hive_length: u32,

    /// Clustering factor (always 1).
    pub clustering_factor: u32,

    /// Embedded file name (informational).
    pub file_name: String,
}

impl BaseBlock {
    /// Creates the header of a fresh, empty hive.
    pub fn new(last_written: u64) -> Self {
        Self {
            primary_sequence: 1,
            secondary_sequence: 1,
            last_written,
            major_version: 1,
            minor_version: DEFAULT_MINOR_VERSION,
            file_type: 0,
            file_format: 1,
            root_cell_offset: 0,
            hive_length: 0,
            clustering_factor: 1,
            file_name: String::new(),
        }
    }

    /// Parses a base block from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small, the signature or checksum
    /// is wrong, or the version is outside 1.3 to 1.6.
    pub fn parse(data: &[u8]) -> HiveResult<Self> {
        if data.len() < BASE_BLOCK_SIZE {
            return Err(HiveError::HiveTooSmall {
                size: data.len(),
                minimum: BASE_BLOCK_SIZE,
            });
        }

        if &data[0..4] != REGF_SIGNATURE {
            return Err(HiveError::invalid_signature(REGF_SIGNATURE, &data[0..4]));
        }

        let checksum = read_u32_le(data, CHECKSUM_OFFSET)?;
        let calculated = calculate_checksum(data);
        if checksum != calculated {
            return Err(HiveError::ChecksumMismatch {
                expected: checksum,
                calculated,
            });
        }

        let major_version = read_u32_le(data, 0x14)?;
        let minor_version = read_u32_le(data, 0x18)?;
        if major_version != 1 || !(3..=6).contains(&minor_version) {
            return Err(HiveError::UnsupportedVersion {
                major: major_version,
                minor: minor_version,
            });
        }

        let name_field = &data[FILE_NAME_OFFSET..FILE_NAME_OFFSET + FILE_NAME_LENGTH];
        // Garbage in this informational field is not worth refusing the hive.
        let file_name = read_utf16_string(name_field, FILE_NAME_OFFSET as u32).unwrap_or_default();

        Ok(BaseBlock {
            primary_sequence: read_u32_le(data, 0x04)?,
            secondary_sequence: read_u32_le(data, 0x08)?,
            last_written: read_u64_le(data, 0x0C)?,
            major_version,
            minor_version,
            file_type: read_u32_le(data, 0x1C)?,
            file_format: read_u32_le(data, 0x20)?,
            root_cell_offset: read_u32_le(data, 0x24)?,
            hive_length: read_u32_le(data, 0x28)?,
            clustering_factor: read_u32_le(data, 0x2C)?,
            file_name,
        })
    }

    /// Writes the interpreted fields and a fresh checksum into `block`.
    ///
    /// `block` must be at least [`BASE_BLOCK_SIZE`] bytes; bytes this type
    /// does not model are left as they are.
    pub fn write_into(&self, block: &mut [u8]) {
        block[0..4].copy_from_slice(REGF_SIGNATURE);
        write_u32_le(block, 0x04, self.primary_sequence);
        write_u32_le(block, 0x08, self.secondary_sequence);
        write_u64_le(block, 0x0C, self.last_written);
        write_u32_le(block, 0x14, self.major_version);
        write_u32_le(block, 0x18, self.minor_version);
        write_u32_le(block, 0x1C, self.file_type);
        write_u32_le(block, 0x20, self.file_format);
        write_u32_le(block, 0x24, self.root_cell_offset);
        write_u32_le(block, 0x28, self.hive_length);
        write_u32_le(block, 0x2C, self.clustering_factor);

        let name_field = &mut block[FILE_NAME_OFFSET..FILE_NAME_OFFSET + FILE_NAME_LENGTH];
        name_field.fill(0);
        for (i, unit) in self.file_name.encode_utf16().take(FILE_NAME_LENGTH / 2 - 1).enumerate() {
            name_field[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }

        let checksum = calculate_checksum(block);
        write_u32_le(block, CHECKSUM_OFFSET, checksum);
    }

    /// Returns true if the hive is in a consistent state.
    ///
    /// The hive is consistent when primary and secondary sequence numbers match.
    pub fn is_consistent(&self) -> bool {
        self.primary_sequence == self.secondary_sequence
    }

    /// Returns true when the format supports big data (`db`) cells.
    pub fn supports_big_data(&self) -> bool {
        self.minor_version >= 4
    }

    /// Marks the header as written by one more completed update.
    pub fn bump_sequence(&mut self, now: u64) {
        let next = self.primary_sequence.max(self.secondary_sequence).wrapping_add(1);
        self.primary_sequence = next;
        self.secondary_sequence = next;
        self.last_written = now;
    }

    /// Converts the last written timestamp to a human-readable format.
    pub fn last_written_datetime(&self) -> Option<chrono::DateTime<chrono::Utc>> {
        filetime_to_datetime(self.last_written)
    }
}

impl fmt::Display for BaseBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Registry Hive Header:\n\
             - Version: {}.{}\n\
             - Root Cell Offset: {:#x}\n\
             - Hive Length: {} bytes\n\
             - Consistent: {}\n\
             - File Name: {}",
            self.major_version,
            self.minor_version,
            self.root_cell_offset,
            self.hive_length,
            self.is_consistent(),
            self.file_name
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_signature() {
        let mut data = vec![0u8; BASE_BLOCK_SIZE];
        data[0..4].copy_from_slice(b"XXXX");

        let result = BaseBlock::parse(&data);
        assert!(matches!(result.unwrap_err(), HiveError::InvalidSignature { .. }));
    }

    #[test]
    fn test_too_small() {
        let data = vec![0u8; 100];
        let result = BaseBlock::parse(&data);
        assert!(matches!(result.unwrap_err(), HiveError::HiveTooSmall { .. }));
    }

    #[test]
    fn test_write_then_parse() {
        let mut header = BaseBlock::new(132_000_000_000_000_000);
        header.root_cell_offset = 0x20;
        header.hive_length = 0x1000;
        header.file_name = "SOFTWARE".to_string();

        let mut block = vec![0u8; BASE_BLOCK_SIZE];
        header.write_into(&mut block);

        let parsed = BaseBlock::parse(&block).unwrap();
        assert_eq!(parsed.root_cell_offset, 0x20);
        assert_eq!(parsed.hive_length, 0x1000);
        assert_eq!(parsed.minor_version, DEFAULT_MINOR_VERSION);
        assert_eq!(parsed.file_name, "SOFTWARE");
        assert!(parsed.is_consistent());
    }

    #[test]
    fn test_checksum_mismatch_detected() {
        let mut block = vec![0u8; BASE_BLOCK_SIZE];
        BaseBlock::new(0).write_into(&mut block);
        block[0x24] ^= 0x01;
        assert!(matches!(
            BaseBlock::parse(&block).unwrap_err(),
            HiveError::ChecksumMismatch { .. }
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut header = BaseBlock::new(0);
        header.minor_version = 9;
        let mut block = vec![0u8; BASE_BLOCK_SIZE];
        header.write_into(&mut block);
        assert!(matches!(
            BaseBlock::parse(&block).unwrap_err(),
            HiveError::UnsupportedVersion { major: 1, minor: 9 }
        ));
    }

    #[test]
    fn test_bump_sequence() {
        let mut header = BaseBlock::new(0);
        header.primary_sequence = 7;
        header.secondary_sequence = 6;
        header.bump_sequence(42);
        assert_eq!(header.primary_sequence, 8);
        assert!(header.is_consistent());
        assert_eq!(header.last_written, 42);
    }
}
