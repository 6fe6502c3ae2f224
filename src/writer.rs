//! Serializes a [`NodeTable`] into a complete REGF hive image.
//!
//! The image is always laid out from scratch: security cells first, then
//! every key depth-first, each key followed by its subkey list, values,
//! value list and class name. Nothing of the previous layout is reused
//! except the unmodelled bytes of the base block.

use crate::bigdata::{encode_segment_list, BigDataBlock, MAX_DIRECT_DATA_SIZE};
use crate::cell::KeyNodeFlags;
use crate::error::{HiveError, HiveResult};
use crate::hbin::BinWriter;
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::key::KeyNode;
use crate::security::{default_descriptor, SecurityCell};
use crate::subkey_list::{encode_hash_leaf, encode_index_root, sort_key, HASH_LEAF_CAPACITY};
use crate::tree::{KeyEntry, NodeId, NodeTable, RawValue};
use crate::utils::NO_CELL;
use crate::value::ValueKey;
use std::collections::HashMap;
use tracing::debug;

/// Summary of a written key, needed by its parent's max-length fields.
struct WrittenKey {
    offset: u32,
    name: String,
    class_len: u32,
}

/// A key whose nk cell is allocated while its children are being written.
struct PendingKey<'t> {
    id: NodeId,
    entry: &'t KeyEntry,
    node: KeyNode,
    offset: u32,
    next_child: usize,
    children: Vec<WrittenKey>,
}

/// Builds a hive image from a node table.
pub(crate) struct HiveWriter<'a> {
    table: &'a NodeTable,
    header: BaseBlock,
    bins: BinWriter,
    descriptors: Vec<Vec<u8>>,
    security_cells: Vec<u32>,
}

impl<'a> HiveWriter<'a> {
    /// Prepares a writer; `header` supplies the format version and sequence numbers.
    pub fn new(table: &'a NodeTable, header: &BaseBlock, now: u64) -> Self {
        Self {
            table,
            header: header.clone(),
            bins: BinWriter::new(now),
            descriptors: Vec::new(),
            security_cells: Vec::new(),
        }
    }

    /// Writes the image.
    ///
    /// `template` is the previous base block (or empty for a new hive); its
    /// bytes outside the modelled header fields are preserved. Returns the
    /// image and the header that was written.
    pub fn write(mut self, template: &[u8], now: u64) -> HiveResult<(Vec<u8>, BaseBlock)> {
        let root = self.table.root();
        let assignment = self.assign_security(root)?;
        self.write_security_cells(&assignment)?;

        let written = self.write_tree(root, &assignment)?;

        let bins = self.bins.finish();
        let mut header = self.header;
        header.root_cell_offset = written.offset;
        header.hive_length = u32::try_from(bins.len())
            .map_err(|_| HiveError::TooLarge("hive bins exceed 4 GiB".to_string()))?;
        header.bump_sequence(now);

        let mut image = vec![0u8; BASE_BLOCK_SIZE];
        let keep = template.len().min(BASE_BLOCK_SIZE);
        image[..keep].copy_from_slice(&template[..keep]);
        header.write_into(&mut image);
        image.extend_from_slice(&bins);

        debug!(
            bytes = image.len(),
            keys = self.table.key_count(),
            values = self.table.value_count(),
            "Serialized hive"
        );
        Ok((image, header))
    }

    /// Resolves the descriptor of every key: its own, else its parent's,
    /// else a default one for the root.
    fn assign_security(&mut self, root: NodeId) -> HiveResult<SecurityAssignment> {
        let table = self.table;
        let mut assignment = SecurityAssignment::default();
        let mut pending = vec![(root, None::<usize>)];

        while let Some((id, inherited)) = pending.pop() {
            let entry = table.key(id)?;
            let local = match entry.security.and_then(|i| table.descriptor(i)) {
                Some(descriptor) => Some(self.intern(descriptor.to_vec())),
                None => inherited,
            };
            let index = match local {
                Some(index) => index,
                None => self.intern(default_descriptor()),
            };

            assignment.by_key.insert(id, index);
            if assignment.counts.len() <= index {
                assignment.counts.resize(index + 1, 0);
            }
            assignment.counts[index] += 1;

            pending.extend(entry.children.iter().map(|&c| (c, Some(index))));
        }
        Ok(assignment)
    }

    fn intern(&mut self, descriptor: Vec<u8>) -> usize {
        if let Some(i) = self.descriptors.iter().position(|d| *d == descriptor) {
            return i;
        }
        self.descriptors.push(descriptor);
        self.descriptors.len() - 1
    }

    fn write_security_cells(&mut self, assignment: &SecurityAssignment) -> HiveResult<()> {
        let mut cells = Vec::with_capacity(self.descriptors.len());
        for descriptor in &self.descriptors {
            let cell = SecurityCell {
                flink: NO_CELL,
                blink: NO_CELL,
                reference_count: 0,
                descriptor: descriptor.clone(),
            };
            let offset = self.bins.alloc(cell.encoded_len())?;
            cells.push((offset, cell));
        }

        let n = cells.len();
        let offsets: Vec<u32> = cells.iter().map(|(o, _)| *o).collect();
        for (i, (offset, mut cell)) in cells.into_iter().enumerate() {
            cell.flink = offsets[(i + 1) % n];
            cell.blink = offsets[(i + n - 1) % n];
            cell.reference_count = assignment.counts.get(i).copied().unwrap_or(0);
            cell.write_into(self.bins.cell_mut(offset)?);
        }

        self.security_cells = offsets;
        Ok(())
    }

    /// Lays out every key below `root`, parents before their children.
    ///
    /// Uses an explicit stack so nesting depth is bounded by memory only.
    fn write_tree(&mut self, root: NodeId, assignment: &SecurityAssignment) -> HiveResult<WrittenKey> {
        let mut stack = vec![self.open_key(root, 0)?];

        while let Some(mut key) = stack.pop() {
            if let Some(&child) = key.entry.children.get(key.next_child) {
                key.next_child += 1;
                let parent_offset = key.offset;
                stack.push(key);
                stack.push(self.open_key(child, parent_offset)?);
                continue;
            }

            let written = self.close_key(key, assignment)?;
            match stack.last_mut() {
                Some(parent) => parent.children.push(written),
                None => return Ok(written),
            }
        }
        Err(HiveError::InvalidOperation("key tree has no root".to_string()))
    }

    /// Allocates the nk cell of a key; it is filled in by [`Self::close_key`].
    fn open_key(&mut self, id: NodeId, parent_offset: u32) -> HiveResult<PendingKey<'a>> {
        let table = self.table;
        let entry = table.key(id)?;

        let mut node = KeyNode::new(entry.name.clone(), parent_offset, entry.last_written);
        node.flags = entry
            .flags
            .with(KeyNodeFlags::VOLATILE, false)
            .with(KeyNodeFlags::ROOT_KEY, entry.parent.is_none());
        let offset = self.bins.alloc(node.encoded_len())?;

        Ok(PendingKey {
            id,
            entry,
            node,
            offset,
            next_child: 0,
            children: Vec::with_capacity(entry.children.len()),
        })
    }

    fn close_key(&mut self, key: PendingKey<'a>, assignment: &SecurityAssignment) -> HiveResult<WrittenKey> {
        let table = self.table;
        let PendingKey {
            id,
            entry,
            mut node,
            offset,
            mut children,
            ..
        } = key;

        node.subkey_count = children.len() as u32;
        node.max_subkey_name_len = children.iter().map(|c| utf16_bytes(&c.name)).max().unwrap_or(0);
        node.max_subkey_class_len = children.iter().map(|c| c.class_len).max().unwrap_or(0);
        node.subkey_list_offset = self.write_subkey_list(&mut children)?;

        let mut value_offsets = Vec::with_capacity(entry.values.len());
        for &vid in &entry.values {
            let value = table.value(vid)?;
            node.max_value_name_len = node.max_value_name_len.max(utf16_bytes(&value.name));
            node.max_value_data_len = node.max_value_data_len.max(value.data.len() as u32);
            value_offsets.push(self.write_value(value)?);
        }
        node.value_count = value_offsets.len() as u32;
        if !value_offsets.is_empty() {
            let list: Vec<u8> = value_offsets.iter().flat_map(|o| o.to_le_bytes()).collect();
            node.value_list_offset = self.bins.alloc_with(&list)?;
        }

        if let Some(class) = entry.class_name.as_deref().filter(|c| !c.is_empty()) {
            node.class_name_length = u16::try_from(class.len())
                .map_err(|_| HiveError::TooLarge(format!("class name of key '{}'", entry.name)))?;
            node.class_name_offset = self.bins.alloc_with(class)?;
        }

        let sec_index = assignment
            .by_key
            .get(&id)
            .copied()
            .ok_or_else(|| HiveError::StaleHandle(id.to_string()))?;
        node.security_offset = self.security_cells[sec_index];

        node.write_into(self.bins.cell_mut(offset)?)?;
        Ok(WrittenKey {
            offset,
            name: node.name,
            class_len: u32::from(node.class_name_length),
        })
    }

    fn write_subkey_list(&mut self, children: &mut [WrittenKey]) -> HiveResult<u32> {
        if children.is_empty() {
            return Ok(NO_CELL);
        }
        children.sort_by_cached_key(|c| sort_key(&c.name));

        let mut leaves = Vec::new();
        for chunk in children.chunks(HASH_LEAF_CAPACITY) {
            let entries: Vec<(u32, &str)> = chunk.iter().map(|c| (c.offset, c.name.as_str())).collect();
            leaves.push(self.bins.alloc_with(&encode_hash_leaf(&entries)?)?);
        }

        if leaves.len() == 1 {
            Ok(leaves[0])
        } else {
            self.bins.alloc_with(&encode_index_root(&leaves)?)
        }
    }

    fn write_value(&mut self, value: &RawValue) -> HiveResult<u32> {
        let mut vk = ValueKey::for_payload(value.name.clone(), value.data_type, &value.data);
        if !vk.inline {
            vk.data_offset = self.write_data(&value.data)?;
        }

        let offset = self.bins.alloc(vk.encoded_len())?;
        vk.write_into(self.bins.cell_mut(offset)?)?;
        Ok(offset)
    }

    fn write_data(&mut self, data: &[u8]) -> HiveResult<u32> {
        if data.len() <= MAX_DIRECT_DATA_SIZE || !self.header.supports_big_data() {
            return self.bins.alloc_with(data);
        }

        let count = u16::try_from(BigDataBlock::segments_for(data.len()))
            .map_err(|_| HiveError::TooLarge(format!("value data of {} bytes", data.len())))?;
        let mut segments = Vec::with_capacity(count as usize);
        for chunk in data.chunks(MAX_DIRECT_DATA_SIZE) {
            segments.push(self.bins.alloc_with(chunk)?);
        }

        let list_offset = self.bins.alloc_with(&encode_segment_list(&segments))?;
        let header = BigDataBlock {
            segment_count: count,
            segment_list_offset: list_offset,
        };
        let offset = self.bins.alloc(BigDataBlock::SIZE)?;
        self.bins.cell_mut(offset)?[..BigDataBlock::SIZE].copy_from_slice(&header.encode());
        Ok(offset)
    }
}

/// Descriptor index per key and number of keys per descriptor.
#[derive(Default)]
struct SecurityAssignment {
    by_key: HashMap<NodeId, usize>,
    counts: Vec<u32>,
}

/// Length of a name in bytes of UTF-16, as the max-length fields count it.
fn utf16_bytes(name: &str) -> u32 {
    (name.encode_utf16().count() * 2) as u32
}
