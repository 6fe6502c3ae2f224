//! Loads a REGF hive image into a [`NodeTable`].
//!
//! The whole key tree reachable from the root cell is read eagerly: subkey
//! lists of every kind, value lists, inline and big data, security cells
//! and class names. Cells that nothing references are ignored.

use crate::bigdata::{parse_segment_list, BigDataBlock, MAX_DIRECT_DATA_SIZE};
use crate::cell::read_cell;
use crate::error::{HiveError, HiveResult};
use crate::hbin::HbinIterator;
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::key::KeyNode;
use crate::security::SecurityCell;
use crate::subkey_list::SubkeyList;
use crate::tree::{KeyEntry, NodeId, NodeTable, RawValue};
use crate::utils::{read_u32_le, NO_CELL};
use crate::value::ValueKey;
use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};

/// Nesting limit for `ri` lists; real hives use a single level.
const MAX_LIST_DEPTH: usize = 8;

/// Reads the key tree of a hive image.
pub(crate) struct HiveReader<'a> {
    data: &'a [u8],
    header: &'a BaseBlock,
    security: HashMap<u32, usize>,
    visited: HashSet<u32>,
}

impl<'a> HiveReader<'a> {
    /// Creates a reader over a complete hive file image.
    pub fn new(data: &'a [u8], header: &'a BaseBlock) -> Self {
        Self {
            data,
            header,
            security: HashMap::new(),
            visited: HashSet::new(),
        }
    }

    /// Validates the bins and loads every key reachable from the root.
    pub fn load(mut self) -> HiveResult<NodeTable> {
        self.check_bins()?;

        let root_offset = self.header.root_cell_offset;
        let root_node = self.key_node(root_offset)?;
        let mut table = NodeTable::with_root(self.entry_for(&root_node)?);
        let root = table.root();
        self.visited.insert(root_offset);

        let mut pending: Vec<(NodeId, KeyNode)> = vec![(root, root_node)];
        while let Some((id, node)) = pending.pop() {
            self.attach_security(&mut table, id, &node)?;
            self.load_values(&mut table, id, &node)?;

            for child_offset in self.subkey_offsets(&node)? {
                if !self.visited.insert(child_offset) {
                    return Err(HiveError::InvalidFormat(format!(
                        "key at {:#x} is referenced more than once",
                        child_offset
                    )));
                }
                let child = self.key_node(child_offset)?;
                let child_id = table.insert_child(id, self.entry_for(&child)?)?;
                pending.push((child_id, child));
            }
        }

        debug!(
            keys = table.key_count(),
            values = table.value_count(),
            "Loaded hive tree"
        );
        Ok(table)
    }

    fn check_bins(&self) -> HiveResult<()> {
        let bins_area = &self.data[BASE_BLOCK_SIZE..];
        let mut total = 0usize;
        for bin in HbinIterator::new(bins_area) {
            total += bin?.size as usize;
        }

        if total == 0 {
            return Err(HiveError::InvalidFormat("hive has no bins".to_string()));
        }
        if total != self.header.hive_length as usize {
            warn!(
                header = self.header.hive_length,
                found = total,
                "Hive length in header does not match the bins"
            );
        }
        Ok(())
    }

    fn cell(&self, offset: u32) -> HiveResult<&'a [u8]> {
        read_cell(self.data, offset)
    }

    fn key_node(&self, offset: u32) -> HiveResult<KeyNode> {
        KeyNode::parse(self.cell(offset)?, offset)
    }

    fn entry_for(&self, node: &KeyNode) -> HiveResult<KeyEntry> {
        let mut entry = KeyEntry::new(node.name.clone(), node.last_written);
        entry.flags = node.flags;

        if node.class_name_offset != NO_CELL && node.class_name_length > 0 {
            let cell = self.cell(node.class_name_offset)?;
            let len = node.class_name_length as usize;
            let class = cell
                .get(..len)
                .ok_or_else(|| HiveError::truncated(node.class_name_offset, len, cell.len()))?;
            entry.class_name = Some(class.to_vec());
        }
        Ok(entry)
    }

    fn attach_security(&mut self, table: &mut NodeTable, id: NodeId, node: &KeyNode) -> HiveResult<()> {
        let offset = node.security_offset;
        if offset == NO_CELL {
            return Ok(());
        }

        let index = match self.security.get(&offset) {
            Some(&index) => index,
            None => {
                let sk = SecurityCell::parse(self.cell(offset)?, offset)?;
                let index = table.intern_descriptor(sk.descriptor);
                self.security.insert(offset, index);
                index
            }
        };
        table.set_security(id, index)
    }

    fn load_values(&self, table: &mut NodeTable, id: NodeId, node: &KeyNode) -> HiveResult<()> {
        if !node.has_values() || node.value_list_offset == NO_CELL {
            return Ok(());
        }

        let list = self.cell(node.value_list_offset)?;
        let count = node.value_count as usize;
        if list.len() < count * 4 {
            return Err(HiveError::truncated(node.value_list_offset, count * 4, list.len()));
        }

        for i in 0..count {
            let offset = read_u32_le(list, i * 4)?;
            let vk = ValueKey::parse(self.cell(offset)?, offset)?;
            let data = self.value_data(&vk)?;
            table.insert_value(id, RawValue::new(vk.name, vk.data_type, data))?;
        }
        Ok(())
    }

    fn value_data(&self, vk: &ValueKey) -> HiveResult<Vec<u8>> {
        if vk.is_inline_data() {
            return Ok(vk.inline_data());
        }
        if vk.data_length == 0 || vk.data_offset == NO_CELL {
            return Ok(Vec::new());
        }

        let length = vk.data_length as usize;
        let cell = self.cell(vk.data_offset)?;
        if length > MAX_DIRECT_DATA_SIZE && self.header.supports_big_data() && cell.starts_with(b"db") {
            return self.big_data(vk.data_offset, cell, length);
        }

        cell.get(..length)
            .map(<[u8]>::to_vec)
            .ok_or_else(|| HiveError::truncated(vk.data_offset, length, cell.len()))
    }

    fn big_data(&self, offset: u32, header_cell: &[u8], length: usize) -> HiveResult<Vec<u8>> {
        let db = BigDataBlock::parse(header_cell, offset)?;
        debug!(offset = %format!("{:#x}", offset), segments = db.segment_count, "Reading big data block");

        let list = self.cell(db.segment_list_offset)?;
        let segments = parse_segment_list(list, db.segment_count, db.segment_list_offset)?;

        let mut data = Vec::with_capacity(length);
        for segment in segments {
            let chunk = self.cell(segment)?;
            let take = chunk.len().min(MAX_DIRECT_DATA_SIZE).min(length - data.len());
            data.extend_from_slice(&chunk[..take]);
            if data.len() >= length {
                break;
            }
        }

        if data.len() < length {
            return Err(HiveError::truncated(offset, length, data.len()));
        }
        Ok(data)
    }

    fn subkey_offsets(&self, node: &KeyNode) -> HiveResult<Vec<u32>> {
        let mut offsets = Vec::with_capacity(node.subkey_count as usize);
        if node.has_subkeys() && node.subkey_list_offset != NO_CELL {
            self.collect_subkeys(node.subkey_list_offset, &mut offsets, 0)?;
        }
        Ok(offsets)
    }

    fn collect_subkeys(&self, list_offset: u32, out: &mut Vec<u32>, depth: usize) -> HiveResult<()> {
        if depth > MAX_LIST_DEPTH {
            return Err(HiveError::InvalidFormat(format!(
                "subkey list at {:#x} nests too deeply",
                list_offset
            )));
        }

        let list = SubkeyList::parse(self.cell(list_offset)?, list_offset)?;
        if list.is_index_root() {
            for leaf in list.offsets {
                self.collect_subkeys(leaf, out, depth + 1)?;
            }
        } else {
            out.extend(list.offsets);
        }
        Ok(())
    }
}
