//! Registry cells: type signatures, key flags and cell access.
//!
//! Cells are the fundamental data structures within registry hives. Each
//! typed cell starts with a 2-byte signature.

use crate::error::{HiveError, HiveResult};
use crate::utils::{cell_offset_to_absolute, read_i32_le};

/// Cell type signatures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellType {
    /// Key node (nk) - represents a registry key.
    KeyNode,

    /// Value key (vk) - represents a registry value.
    ValueKey,

    /// Security descriptor (sk).
    Security,

    /// Index leaf (li) - list of subkey offsets.
    IndexLeaf,

    /// Fast leaf (lf) - list of subkeys with name hints.
    FastLeaf,

    /// Hash leaf (lh) - list of subkeys with name hashes.
    HashLeaf,

    /// Index root (ri) - list of subkey list offsets.
    IndexRoot,

    /// Data block (db) - big data block.
    DataBlock,
}

impl CellType {
    /// Parses a cell type from a 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> Option<Self> {
        match sig {
            b"nk" => Some(CellType::KeyNode),
            b"vk" => Some(CellType::ValueKey),
            b"sk" => Some(CellType::Security),
            b"li" => Some(CellType::IndexLeaf),
            b"lf" => Some(CellType::FastLeaf),
            b"lh" => Some(CellType::HashLeaf),
            b"ri" => Some(CellType::IndexRoot),
            b"db" => Some(CellType::DataBlock),
            _ => None,
        }
    }

    /// Returns the 2-byte signature for this cell type.
    pub fn signature(&self) -> &'static [u8; 2] {
        match self {
            CellType::KeyNode => b"nk",
            CellType::ValueKey => b"vk",
            CellType::Security => b"sk",
            CellType::IndexLeaf => b"li",
            CellType::FastLeaf => b"lf",
            CellType::HashLeaf => b"lh",
            CellType::IndexRoot => b"ri",
            CellType::DataBlock => b"db",
        }
    }

    /// Checks that `data` starts with this type's signature.
    pub fn expect(&self, data: &[u8], offset: u32) -> HiveResult<()> {
        let expected = self.signature();
        match data.get(0..2) {
            Some(sig) if sig == expected => Ok(()),
            Some(sig) => Err(HiveError::InvalidFormat(format!(
                "Expected '{}' signature at offset {:#x}, found {:?}",
                String::from_utf8_lossy(expected),
                offset,
                sig
            ))),
            None => Err(HiveError::truncated(offset, 2, data.len())),
        }
    }
}

/// Flags for key nodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KeyNodeFlags(pub u16);

impl KeyNodeFlags {
    /// Key is volatile (not stored on disk).
    pub const VOLATILE: u16 = 0x0001;

    /// Key is a mount point for another hive.
    pub const HIVE_EXIT: u16 = 0x0002;

    /// Key is the root key.
    pub const ROOT_KEY: u16 = 0x0004;

    /// Key cannot be deleted.
    pub const NO_DELETE: u16 = 0x0008;

    /// Key is a symbolic link.
    pub const SYM_LINK: u16 = 0x0010;

    /// Key name is in compressed format (Latin-1).
    pub const COMP_NAME: u16 = 0x0020;

    /// Creates a new KeyNodeFlags from a u16 value.
    pub fn new(flags: u16) -> Self {
        Self(flags)
    }

    /// Returns true if the specified flag is set.
    pub fn has_flag(&self, flag: u16) -> bool {
        (self.0 & flag) != 0
    }

    /// Returns a copy with `flag` set or cleared.
    pub fn with(self, flag: u16, on: bool) -> Self {
        if on {
            Self(self.0 | flag)
        } else {
            Self(self.0 & !flag)
        }
    }

    /// Returns true if the key name is compressed.
    pub fn is_compressed(&self) -> bool {
        self.has_flag(Self::COMP_NAME)
    }

    /// Returns true if this is a volatile key.
    pub fn is_volatile(&self) -> bool {
        self.has_flag(Self::VOLATILE)
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.has_flag(Self::ROOT_KEY)
    }
}

/// Returns the payload of the cell at `offset` (excluding the size field).
///
/// `hive` is the whole hive file image; `offset` is relative to the first hbin.
pub fn read_cell(hive: &[u8], offset: u32) -> HiveResult<&[u8]> {
    let abs_offset = cell_offset_to_absolute(offset)? as usize;
    if abs_offset >= hive.len() {
        return Err(HiveError::invalid_offset(offset, hive.len()));
    }

    let size = read_i32_le(hive, abs_offset)
        .map_err(|_| HiveError::truncated(offset, 4, hive.len() - abs_offset))?;
    let abs_size = size.unsigned_abs() as usize;
    if abs_size < 8 {
        return Err(HiveError::invalid_cell_size(size, offset));
    }

    let data_end = abs_offset + abs_size;
    if data_end > hive.len() {
        return Err(HiveError::truncated(offset, abs_size, hive.len() - abs_offset));
    }

    Ok(&hive[abs_offset + 4..data_end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cell_type_roundtrip() {
        for ty in [
            CellType::KeyNode,
            CellType::ValueKey,
            CellType::Security,
            CellType::IndexLeaf,
            CellType::FastLeaf,
            CellType::HashLeaf,
            CellType::IndexRoot,
            CellType::DataBlock,
        ] {
            assert_eq!(CellType::from_signature(ty.signature()), Some(ty));
        }
        assert_eq!(CellType::from_signature(b"XX"), None);
    }

    #[test]
    fn test_expect_signature() {
        assert!(CellType::KeyNode.expect(b"nk\0\0", 0).is_ok());
        assert!(CellType::KeyNode.expect(b"vk\0\0", 0).is_err());
        assert!(CellType::KeyNode.expect(b"n", 0).is_err());
    }

    #[test]
    fn test_key_node_flags() {
        let flags = KeyNodeFlags::new(KeyNodeFlags::COMP_NAME | KeyNodeFlags::ROOT_KEY);
        assert!(flags.is_compressed());
        assert!(flags.is_root());
        assert!(!flags.is_volatile());
        assert!(!flags.with(KeyNodeFlags::COMP_NAME, false).is_compressed());
    }

    #[test]
    fn test_read_cell_bounds() {
        let mut hive = vec![0u8; 0x1000 + 0x40];
        hive[0x1020..0x1024].copy_from_slice(&(-16i32).to_le_bytes());
        hive[0x1024..0x1026].copy_from_slice(b"nk");

        let cell = read_cell(&hive, 0x20).unwrap();
        assert_eq!(cell.len(), 12);
        assert_eq!(&cell[0..2], b"nk");

        assert!(matches!(read_cell(&hive, 0x100), Err(HiveError::InvalidOffset { .. })));
        assert!(matches!(read_cell(&hive, 0x00), Err(HiveError::InvalidCellSize { .. })));
    }
}
