//! In-memory node table backing an open hive.
//!
//! Keys and values live in two arenas addressed by [`NodeId`] and
//! [`ValueId`]. Children and values keep their insertion order, which is
//! the order exposed to lookups. Deleted entries leave a tombstone so a
//! stale handle is detected instead of silently aliasing a newer entry.

use crate::cell::KeyNodeFlags;
use crate::error::{HiveError, HiveResult};
use crate::subkey_list::sort_key;
use std::fmt;

/// Handle of a key node within one hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

/// Handle of a value within one hive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ValueId(u32);

impl NodeId {
    /// Creates a handle from a raw index.
    ///
    /// Only meaningful to the container that hands out the index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index of the handle.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl ValueId {
    /// Creates a handle from a raw index.
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    /// Raw index of the handle.
    pub fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node#{}", self.0)
    }
}

impl fmt::Display for ValueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "value#{}", self.0)
    }
}

/// A value as stored: name, raw type tag and payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawValue {
    /// Value name; empty for the default value.
    pub name: String,
    /// On-disk type tag.
    pub data_type: u32,
    /// Payload bytes.
    pub data: Vec<u8>,
}

impl RawValue {
    /// Creates a value record.
    pub fn new(name: impl Into<String>, data_type: u32, data: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            data_type,
            data,
        }
    }
}

/// A key record.
#[derive(Debug, Clone)]
pub(crate) struct KeyEntry {
    pub name: String,
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub values: Vec<ValueId>,
    pub class_name: Option<Vec<u8>>,
    pub security: Option<usize>,
    pub last_written: u64,
    pub flags: KeyNodeFlags,
}

impl KeyEntry {
    pub fn new(name: impl Into<String>, last_written: u64) -> Self {
        Self {
            name: name.into(),
            parent: None,
            children: Vec::new(),
            values: Vec::new(),
            class_name: None,
            security: None,
            last_written,
            flags: KeyNodeFlags::default(),
        }
    }
}

#[derive(Debug, Clone)]
struct ValueEntry {
    owner: NodeId,
    value: RawValue,
}

/// Arena of keys, values and security descriptors.
#[derive(Debug, Clone)]
pub struct NodeTable {
    keys: Vec<Option<KeyEntry>>,
    values: Vec<Option<ValueEntry>>,
    descriptors: Vec<Vec<u8>>,
    root: NodeId,
}

impl NodeTable {
    /// Creates a table holding only a root key.
    pub(crate) fn with_root(mut root: KeyEntry) -> Self {
        root.parent = None;
        root.flags = root.flags.with(KeyNodeFlags::ROOT_KEY, true);
        Self {
            keys: vec![Some(root)],
            values: Vec::new(),
            descriptors: Vec::new(),
            root: NodeId(0),
        }
    }

    /// Creates a table whose root carries `descriptor` as its security descriptor.
    pub(crate) fn with_secured_root(mut root: KeyEntry, descriptor: Vec<u8>) -> Self {
        root.security = Some(0);
        let mut table = Self::with_root(root);
        table.descriptors.push(descriptor);
        table
    }

    /// Returns the root key.
    pub fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn key(&self, id: NodeId) -> HiveResult<&KeyEntry> {
        self.keys
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| HiveError::StaleHandle(id.to_string()))
    }

    fn key_mut(&mut self, id: NodeId) -> HiveResult<&mut KeyEntry> {
        self.keys
            .get_mut(id.0 as usize)
            .and_then(Option::as_mut)
            .ok_or_else(|| HiveError::StaleHandle(id.to_string()))
    }

    fn value_entry(&self, id: ValueId) -> HiveResult<&ValueEntry> {
        self.values
            .get(id.0 as usize)
            .and_then(Option::as_ref)
            .ok_or_else(|| HiveError::StaleHandle(id.to_string()))
    }

    /// Returns the name of a key.
    pub fn key_name(&self, id: NodeId) -> HiveResult<&str> {
        Ok(&self.key(id)?.name)
    }

    /// Returns the parent of a key, `None` for the root.
    pub fn parent(&self, id: NodeId) -> HiveResult<Option<NodeId>> {
        Ok(self.key(id)?.parent)
    }

    /// Lists the direct children of a key in order.
    pub fn children(&self, id: NodeId) -> HiveResult<Vec<(NodeId, String)>> {
        let key = self.key(id)?;
        key.children
            .iter()
            .map(|&child| Ok((child, self.key(child)?.name.clone())))
            .collect()
    }

    /// Appends a new child key. Duplicate names are not checked here.
    pub(crate) fn insert_child(&mut self, parent: NodeId, mut entry: KeyEntry) -> HiveResult<NodeId> {
        self.key(parent)?;
        let id = NodeId(
            u32::try_from(self.keys.len())
                .map_err(|_| HiveError::TooLarge("key table".to_string()))?,
        );
        entry.parent = Some(parent);
        entry.flags = entry.flags.with(KeyNodeFlags::ROOT_KEY, false);
        self.keys.push(Some(entry));
        self.key_mut(parent)?.children.push(id);
        Ok(id)
    }

    /// Creates a child key that inherits the parent's security descriptor.
    ///
    /// Fails with [`HiveError::KeyExists`] when a sibling has the same name
    /// ignoring case, since subkey lists are keyed by the upper-cased name.
    pub fn add_child(&mut self, parent: NodeId, name: &str, now: u64) -> HiveResult<NodeId> {
        let key = self.key(parent)?;
        let wanted = sort_key(name);
        for &child in &key.children {
            let sibling = &self.key(child)?.name;
            if sort_key(sibling) == wanted {
                return Err(HiveError::KeyExists {
                    name: name.to_string(),
                    existing: sibling.clone(),
                });
            }
        }

        let security = key.security;
        let mut entry = KeyEntry::new(name, now);
        entry.security = security;
        let id = self.insert_child(parent, entry)?;
        self.key_mut(parent)?.last_written = now;
        Ok(id)
    }

    /// Removes a key together with its subtree and all their values.
    pub fn delete_key(&mut self, id: NodeId, now: u64) -> HiveResult<()> {
        let parent = self
            .key(id)?
            .parent
            .ok_or_else(|| HiveError::InvalidOperation("cannot delete the root key".to_string()))?;

        let siblings = &mut self.key_mut(parent)?.children;
        siblings.retain(|&c| c != id);
        self.key_mut(parent)?.last_written = now;

        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(entry) = self.keys.get_mut(next.0 as usize).and_then(Option::take) {
                for v in entry.values {
                    self.values[v.0 as usize] = None;
                }
                pending.extend(entry.children);
            }
        }
        Ok(())
    }

    /// Lists the values of a key in order.
    pub fn value_ids(&self, id: NodeId) -> HiveResult<Vec<ValueId>> {
        Ok(self.key(id)?.values.clone())
    }

    /// Returns a stored value.
    pub fn value(&self, id: ValueId) -> HiveResult<&RawValue> {
        Ok(&self.value_entry(id)?.value)
    }

    /// Appends a value without checking for an existing one of the same name.
    pub(crate) fn insert_value(&mut self, owner: NodeId, value: RawValue) -> HiveResult<ValueId> {
        self.key(owner)?;
        let id = ValueId(
            u32::try_from(self.values.len())
                .map_err(|_| HiveError::TooLarge("value table".to_string()))?,
        );
        self.values.push(Some(ValueEntry { owner, value }));
        self.key_mut(owner)?.values.push(id);
        Ok(id)
    }

    /// Creates the value, or replaces the first value with the same name.
    pub fn set_value(&mut self, owner: NodeId, value: RawValue, now: u64) -> HiveResult<ValueId> {
        let existing = self
            .key(owner)?
            .values
            .iter()
            .copied()
            .find(|&v| matches!(self.value_entry(v), Ok(e) if e.value.name == value.name));

        let id = match existing {
            Some(id) => {
                if let Some(Some(entry)) = self.values.get_mut(id.0 as usize) {
                    entry.value = value;
                }
                id
            }
            None => self.insert_value(owner, value)?,
        };
        self.key_mut(owner)?.last_written = now;
        Ok(id)
    }

    /// Removes a single value from its key.
    pub fn delete_value(&mut self, id: ValueId, now: u64) -> HiveResult<()> {
        let owner = self.value_entry(id)?.owner;
        self.values[id.0 as usize] = None;
        let key = self.key_mut(owner)?;
        key.values.retain(|&v| v != id);
        key.last_written = now;
        Ok(())
    }

    /// Registers a security descriptor, reusing an identical one.
    pub(crate) fn intern_descriptor(&mut self, descriptor: Vec<u8>) -> usize {
        if let Some(i) = self.descriptors.iter().position(|d| *d == descriptor) {
            return i;
        }
        self.descriptors.push(descriptor);
        self.descriptors.len() - 1
    }

    /// Sets the descriptor index of a key.
    pub(crate) fn set_security(&mut self, id: NodeId, index: usize) -> HiveResult<()> {
        self.key_mut(id)?.security = Some(index);
        Ok(())
    }

    pub(crate) fn descriptor(&self, index: usize) -> Option<&[u8]> {
        self.descriptors.get(index).map(Vec::as_slice)
    }

    /// Number of live keys, the root included.
    pub fn key_count(&self) -> usize {
        self.keys.iter().filter(|k| k.is_some()).count()
    }

    /// Number of live values.
    pub fn value_count(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NodeTable {
        NodeTable::with_root(KeyEntry::new("ROOT", 0))
    }

    #[test]
    fn test_children_keep_insertion_order() {
        let mut t = table();
        let root = t.root();
        t.add_child(root, "b", 1).unwrap();
        t.add_child(root, "a", 1).unwrap();
        let names: Vec<_> = t.children(root).unwrap().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn test_child_inherits_security() {
        let mut t = table();
        let root = t.root();
        let idx = t.intern_descriptor(vec![1, 2, 3]);
        t.set_security(root, idx).unwrap();
        let child = t.add_child(root, "c", 0).unwrap();
        assert_eq!(t.key(child).unwrap().security, Some(idx));
        assert_eq!(t.intern_descriptor(vec![1, 2, 3]), idx);
    }

    #[test]
    fn test_add_child_rejects_case_insensitive_duplicate() {
        let mut t = table();
        let root = t.root();
        t.add_child(root, "Software", 0).unwrap();

        match t.add_child(root, "SOFTWARE", 0) {
            Err(HiveError::KeyExists { name, existing }) => {
                assert_eq!(name, "SOFTWARE");
                assert_eq!(existing, "Software");
            }
            other => panic!("unexpected result: {:?}", other),
        }
        assert_eq!(t.children(root).unwrap().len(), 1);

        // Same name under another parent is fine
        let other = t.add_child(root, "Other", 0).unwrap();
        t.add_child(other, "software", 0).unwrap();
    }

    #[test]
    fn test_delete_subtree() {
        let mut t = table();
        let root = t.root();
        let a = t.add_child(root, "a", 0).unwrap();
        let b = t.add_child(a, "b", 0).unwrap();
        let v = t.set_value(b, RawValue::new("x", 1, vec![0, 0]), 0).unwrap();

        t.delete_key(a, 5).unwrap();
        assert_eq!(t.key_count(), 1);
        assert_eq!(t.value_count(), 0);
        assert!(matches!(t.children(b), Err(HiveError::StaleHandle(_))));
        assert!(t.value(v).is_err());
        assert!(t.children(root).unwrap().is_empty());
    }

    #[test]
    fn test_root_cannot_be_deleted() {
        let mut t = table();
        let root = t.root();
        assert!(matches!(t.delete_key(root, 0), Err(HiveError::InvalidOperation(_))));
    }

    #[test]
    fn test_set_value_replaces_by_name() {
        let mut t = table();
        let root = t.root();
        let first = t.set_value(root, RawValue::new("v", 4, vec![1, 0, 0, 0]), 0).unwrap();
        let second = t.set_value(root, RawValue::new("v", 1, vec![0, 0]), 0).unwrap();
        assert_eq!(first, second);
        assert_eq!(t.value_ids(root).unwrap().len(), 1);
        assert_eq!(t.value(first).unwrap().data_type, 1);

        // Names are case-sensitive
        t.set_value(root, RawValue::new("V", 1, vec![0, 0]), 0).unwrap();
        assert_eq!(t.value_ids(root).unwrap().len(), 2);
    }

    #[test]
    fn test_delete_value() {
        let mut t = table();
        let root = t.root();
        let v = t.set_value(root, RawValue::new("v", 1, vec![]), 0).unwrap();
        t.delete_value(v, 0).unwrap();
        assert!(t.value_ids(root).unwrap().is_empty());
        assert!(t.delete_value(v, 0).is_err());
    }
}
