//! Registry key node (nk) cells.

use crate::cell::{CellType, KeyNodeFlags};
use crate::error::{HiveError, HiveResult};
use crate::utils::{
    encode_name, read_latin1_string, read_u16_le, read_u32_le, read_u64_le, read_utf16_string,
    write_u16_le, write_u32_le, write_u64_le, NO_CELL,
};

/// Size of the fixed part of a key node, up to the name.
pub const KEY_NODE_FIXED_SIZE: usize = 0x4C;

/// Key node (nk) structure.
///
/// Represents a registry key with metadata including name, timestamps,
/// and references to subkeys and values.
#[derive(Debug, Clone)]
pub struct KeyNode {
    /// Flags for this key.
    pub flags: KeyNodeFlags,

    /// Last written timestamp (Windows FILETIME).
    pub last_written: u64,

    /// Offset to parent key node.
    pub parent_offset: u32,

    /// Number of subkeys.
    pub subkey_count: u32,

    /// Offset to subkey list.
    pub subkey_list_offset: u32,

    /// Number of values.
    pub value_count: u32,

    /// Offset to value list.
    pub value_list_offset: u32,

    /// Offset to security descriptor.
    pub security_offset: u32,

    /// Offset to class name.
    pub class_name_offset: u32,

    /// Maximum length of subkey name, in bytes of UTF-16.
    pub max_subkey_name_len: u32,

    /// Maximum length of subkey class name.
    pub max_subkey_class_len: u32,

    /// Maximum length of value name.
    pub max_value_name_len: u32,

    /// Maximum length of value data.
    pub max_value_data_len: u32,

    /// Length of class name.
    pub class_name_length: u16,

    /// Key name.
    pub name: String,
}

impl KeyNode {
    /// Creates a key node with no subkeys, values, class or security.
    pub fn new(name: impl Into<String>, parent_offset: u32, last_written: u64) -> Self {
        Self {
            flags: KeyNodeFlags::default(),
            last_written,
            parent_offset,
            subkey_count: 0,
            subkey_list_offset: NO_CELL,
            value_count: 0,
            value_list_offset: NO_CELL,
            security_offset: NO_CELL,
            class_name_offset: NO_CELL,
            max_subkey_name_len: 0,
            max_subkey_class_len: 0,
            max_value_name_len: 0,
            max_value_data_len: 0,
            class_name_length: 0,
            name: name.into(),
        }
    }

    /// Parses a key node from cell data.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is malformed or truncated.
    pub fn parse(data: &[u8], offset: u32) -> HiveResult<Self> {
        if data.len() < KEY_NODE_FIXED_SIZE {
            return Err(HiveError::truncated(offset, KEY_NODE_FIXED_SIZE, data.len()));
        }
        CellType::KeyNode.expect(data, offset)?;

        let flags = KeyNodeFlags::new(read_u16_le(data, 0x02)?);
        let name_length = read_u16_le(data, 0x48)? as usize;

        let name_end = KEY_NODE_FIXED_SIZE + name_length;
        let name_data = data
            .get(KEY_NODE_FIXED_SIZE..name_end)
            .ok_or_else(|| HiveError::truncated(offset, name_end, data.len()))?;
        let name = if flags.is_compressed() {
            read_latin1_string(name_data)
        } else {
            read_utf16_string(name_data, offset)?
        };

        Ok(KeyNode {
            flags,
            last_written: read_u64_le(data, 0x04)?,
            parent_offset: read_u32_le(data, 0x10)?,
            subkey_count: read_u32_le(data, 0x14)?,
            subkey_list_offset: read_u32_le(data, 0x1C)?,
            value_count: read_u32_le(data, 0x24)?,
            value_list_offset: read_u32_le(data, 0x28)?,
            security_offset: read_u32_le(data, 0x2C)?,
            class_name_offset: read_u32_le(data, 0x30)?,
            max_subkey_name_len: read_u32_le(data, 0x34)?,
            max_subkey_class_len: read_u32_le(data, 0x38)?,
            max_value_name_len: read_u32_le(data, 0x3C)?,
            max_value_data_len: read_u32_le(data, 0x40)?,
            class_name_length: read_u16_le(data, 0x4A)?,
            name,
        })
    }

    /// Returns the cell payload size needed to store this key.
    pub fn encoded_len(&self) -> usize {
        KEY_NODE_FIXED_SIZE + encode_name(&self.name).0.len()
    }

    /// Serializes the key into `buf`, which must hold [`KeyNode::encoded_len`] bytes.
    ///
    /// The compressed-name flag is derived from the name. Volatile subkeys
    /// are never written, so their count and list are always empty.
    pub fn write_into(&self, buf: &mut [u8]) -> HiveResult<()> {
        let (name_bytes, compressed) = encode_name(&self.name);
        let name_len = u16::try_from(name_bytes.len())
            .map_err(|_| HiveError::TooLarge(format!("key name '{}'", self.name)))?;
        let flags = self.flags.with(KeyNodeFlags::COMP_NAME, compressed);

        buf[0..2].copy_from_slice(CellType::KeyNode.signature());
        write_u16_le(buf, 0x02, flags.0);
        write_u64_le(buf, 0x04, self.last_written);
        write_u32_le(buf, 0x0C, 0);
        write_u32_le(buf, 0x10, self.parent_offset);
        write_u32_le(buf, 0x14, self.subkey_count);
        write_u32_le(buf, 0x18, 0);
        write_u32_le(buf, 0x1C, self.subkey_list_offset);
        write_u32_le(buf, 0x20, NO_CELL);
        write_u32_le(buf, 0x24, self.value_count);
        write_u32_le(buf, 0x28, self.value_list_offset);
        write_u32_le(buf, 0x2C, self.security_offset);
        write_u32_le(buf, 0x30, self.class_name_offset);
        write_u32_le(buf, 0x34, self.max_subkey_name_len);
        write_u32_le(buf, 0x38, self.max_subkey_class_len);
        write_u32_le(buf, 0x3C, self.max_value_name_len);
        write_u32_le(buf, 0x40, self.max_value_data_len);
        write_u32_le(buf, 0x44, 0);
        write_u16_le(buf, 0x48, name_len);
        write_u16_le(buf, 0x4A, self.class_name_length);
        buf[KEY_NODE_FIXED_SIZE..KEY_NODE_FIXED_SIZE + name_bytes.len()]
            .copy_from_slice(&name_bytes);
        Ok(())
    }

    /// Returns true if this key has subkeys.
    pub fn has_subkeys(&self) -> bool {
        self.subkey_count > 0
    }

    /// Returns true if this key has values.
    pub fn has_values(&self) -> bool {
        self.value_count > 0
    }

    /// Returns true if this is the root key.
    pub fn is_root(&self) -> bool {
        self.flags.is_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_node_minimum_size() {
        let data = vec![0u8; 75];
        assert!(KeyNode::parse(&data, 0).is_err());
    }

    #[test]
    fn test_key_node_invalid_signature() {
        let mut data = vec![0u8; 80];
        data[0..2].copy_from_slice(b"XX");
        assert!(KeyNode::parse(&data, 0).is_err());
    }

    #[test]
    fn test_write_then_parse_compressed() {
        let mut key = KeyNode::new("Software", 0x20, 99);
        key.flags = KeyNodeFlags::new(KeyNodeFlags::ROOT_KEY);
        key.subkey_count = 2;
        key.subkey_list_offset = 0x100;

        let mut buf = vec![0u8; key.encoded_len()];
        key.write_into(&mut buf).unwrap();

        let parsed = KeyNode::parse(&buf, 0).unwrap();
        assert_eq!(parsed.name, "Software");
        assert!(parsed.flags.is_compressed());
        assert!(parsed.is_root());
        assert_eq!(parsed.parent_offset, 0x20);
        assert_eq!(parsed.subkey_count, 2);
        assert_eq!(parsed.subkey_list_offset, 0x100);
        assert_eq!(parsed.value_list_offset, NO_CELL);
        assert_eq!(parsed.last_written, 99);
    }

    #[test]
    fn test_write_then_parse_wide_name() {
        let key = KeyNode::new("\u{30c6}\u{30b9}\u{30c8}", 0, 0);
        assert_eq!(key.encoded_len(), KEY_NODE_FIXED_SIZE + 6);

        let mut buf = vec![0u8; key.encoded_len()];
        key.write_into(&mut buf).unwrap();

        let parsed = KeyNode::parse(&buf, 0).unwrap();
        assert!(!parsed.flags.is_compressed());
        assert_eq!(parsed.name, "\u{30c6}\u{30b9}\u{30c8}");
    }

    #[test]
    fn test_empty_name() {
        let key = KeyNode::new("", 0, 0);
        let mut buf = vec![0u8; key.encoded_len()];
        key.write_into(&mut buf).unwrap();
        assert_eq!(KeyNode::parse(&buf, 0).unwrap().name, "");
    }
}
