//! Subkey list cells (lf, lh, li, ri).
//!
//! Readers accept all four list kinds. Writers emit `lh` leaves, sorted by
//! upper-cased name, and an `ri` root over several leaves once a key has
//! more children than one leaf holds.

use crate::error::{HiveError, HiveResult};
use crate::utils::{read_u16_le, read_u32_le, write_u16_le, write_u32_le};

/// Number of entries written into one `lh` leaf.
pub const HASH_LEAF_CAPACITY: usize = 1012;

/// Subkey list types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubkeyListType {
    /// Index leaf (li) - simple list of offsets.
    IndexLeaf,

    /// Fast leaf (lf) - list with 4-byte name hints.
    FastLeaf,

    /// Hash leaf (lh) - list with name hash hints.
    HashLeaf,

    /// Index root (ri) - list of subkey list offsets.
    IndexRoot,
}

impl SubkeyListType {
    /// Parses a subkey list type from a 2-byte signature.
    pub fn from_signature(sig: &[u8; 2]) -> HiveResult<Self> {
        match sig {
            b"li" => Ok(SubkeyListType::IndexLeaf),
            b"lf" => Ok(SubkeyListType::FastLeaf),
            b"lh" => Ok(SubkeyListType::HashLeaf),
            b"ri" => Ok(SubkeyListType::IndexRoot),
            _ => Err(HiveError::InvalidSubkeyList { list_type: *sig }),
        }
    }

    /// Bytes per entry.
    fn entry_size(self) -> usize {
        match self {
            SubkeyListType::FastLeaf | SubkeyListType::HashLeaf => 8,
            SubkeyListType::IndexLeaf | SubkeyListType::IndexRoot => 4,
        }
    }
}

/// Parsed subkey list.
#[derive(Debug, Clone)]
pub struct SubkeyList {
    /// Kind of list.
    pub list_type: SubkeyListType,

    /// Key offsets, or leaf offsets for an index root.
    pub offsets: Vec<u32>,
}

impl SubkeyList {
    /// Parses a subkey list from cell data.
    pub fn parse(data: &[u8], offset: u32) -> HiveResult<Self> {
        if data.len() < 4 {
            return Err(HiveError::truncated(offset, 4, data.len()));
        }

        let list_type = SubkeyListType::from_signature(&[data[0], data[1]])?;
        let count = read_u16_le(data, 2)? as usize;
        let stride = list_type.entry_size();

        let expected_size = 4 + count * stride;
        if data.len() < expected_size {
            return Err(HiveError::truncated(offset, expected_size, data.len()));
        }

        let offsets = (0..count)
            .map(|i| read_u32_le(data, 4 + i * stride))
            .collect::<HiveResult<Vec<_>>>()?;

        Ok(SubkeyList { list_type, offsets })
    }

    /// Returns true if this is an index root (contains sublists).
    pub fn is_index_root(&self) -> bool {
        self.list_type == SubkeyListType::IndexRoot
    }

    /// Returns the number of entries in this list.
    pub fn len(&self) -> usize {
        self.offsets.len()
    }

    /// Returns true if this list is empty.
    pub fn is_empty(&self) -> bool {
        self.offsets.is_empty()
    }
}

/// Computes the `lh` name hash: `h = h * 37 + upcase(unit)` over UTF-16 units.
pub fn name_hash(name: &str) -> u32 {
    name.encode_utf16()
        .fold(0u32, |h, unit| h.wrapping_mul(37).wrapping_add(u32::from(upcase_unit(unit))))
}

/// Upper-cases a single UTF-16 code unit when it maps to exactly one unit.
fn upcase_unit(unit: u16) -> u16 {
    match char::from_u32(u32::from(unit)) {
        Some(c) => {
            let mut upper = c.to_uppercase();
            match (upper.next(), upper.next()) {
                (Some(u), None) if (u as u32) <= 0xFFFF => u as u16,
                _ => unit,
            }
        }
        None => unit,
    }
}

/// Sort key used to order entries of a written subkey list.
pub fn sort_key(name: &str) -> Vec<u16> {
    name.encode_utf16().map(upcase_unit).collect()
}

/// Serializes an `lh` leaf for `entries` of (key offset, key name).
pub fn encode_hash_leaf(entries: &[(u32, &str)]) -> HiveResult<Vec<u8>> {
    let count = u16::try_from(entries.len())
        .map_err(|_| HiveError::TooLarge(format!("hash leaf of {} entries", entries.len())))?;

    let mut buf = vec![0u8; 4 + entries.len() * 8];
    buf[0..2].copy_from_slice(b"lh");
    write_u16_le(&mut buf, 2, count);
    for (i, (offset, name)) in entries.iter().enumerate() {
        write_u32_le(&mut buf, 4 + i * 8, *offset);
        write_u32_le(&mut buf, 8 + i * 8, name_hash(name));
    }
    Ok(buf)
}

/// Serializes an `ri` root over the given leaf offsets.
pub fn encode_index_root(leaves: &[u32]) -> HiveResult<Vec<u8>> {
    let count = u16::try_from(leaves.len())
        .map_err(|_| HiveError::TooLarge(format!("index root of {} leaves", leaves.len())))?;

    let mut buf = vec![0u8; 4 + leaves.len() * 4];
    buf[0..2].copy_from_slice(b"ri");
    write_u16_le(&mut buf, 2, count);
    for (i, leaf) in leaves.iter().enumerate() {
        write_u32_le(&mut buf, 4 + i * 4, *leaf);
    }
    Ok(buf)
}
