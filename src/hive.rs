//! File-backed registry hive.
//!
//! A [`Hive`] loads the whole key tree of a REGF file into a [`NodeTable`]
//! when opened and writes a freshly laid out image back on commit. The file
//! handle stays open (read-only or read-write) until the hive is closed.

use crate::container::HiveContainer;
use crate::error::{HiveError, HiveResult};
use crate::header::{BaseBlock, BASE_BLOCK_SIZE};
use crate::reader::HiveReader;
use crate::security::default_descriptor;
use crate::tree::{KeyEntry, NodeId, NodeTable, RawValue, ValueId};
use crate::utils::filetime_now;
use crate::writer::HiveWriter;
use memmap2::Mmap;
use std::fs::{File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument, warn};

/// Name given to the root key of a newly created hive.
const NEW_ROOT_NAME: &str = "ROOT";

/// An open registry hive.
///
/// # Examples
///
/// ```no_run
/// use hivereg::{Hive, HiveContainer};
///
/// let hive = Hive::open("NTUSER.DAT", false).unwrap();
/// let root = hive.root().unwrap();
/// for (_, name) in hive.children(root).unwrap() {
///     println!("{}", name);
/// }
/// ```
#[derive(Debug)]
pub struct Hive {
    file: Option<File>,
    path: Option<PathBuf>,

    /// Header as last read or written.
    base_block: BaseBlock,

    /// Raw base block; bytes outside the modelled fields are written back as-is.
    header_bytes: Vec<u8>,

    table: NodeTable,
    writable: bool,
    dirty: bool,
}

impl Hive {
    /// Opens a registry hive file.
    ///
    /// With `writable` the file is opened for writing as well and
    /// [`HiveContainer::commit`] rewrites it in place.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - File cannot be opened
    /// - File is not a valid registry hive
    /// - A cell reachable from the root is corrupted
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> HiveResult<Self> {
        info!("Opening registry hive");
        let file = OpenOptions::new().read(true).write(writable).open(&path)?;

        let file_size = file.metadata()?.len() as usize;
        if file_size < BASE_BLOCK_SIZE {
            return Err(HiveError::HiveTooSmall {
                size: file_size,
                minimum: BASE_BLOCK_SIZE,
            });
        }
        debug!(size = file_size, "File size validated");

        // SAFETY: the file stays open for the lifetime of the map, the map
        // is dropped before this function returns, every access goes through
        // bounds-checked cell reads, and this process does not write to the
        // file while it is mapped.
        let mmap = unsafe { Mmap::map(&file)? };
        let mut hive = Self::load(&mmap, writable)?;
        drop(mmap);

        hive.file = Some(file);
        hive.path = Some(path.as_ref().to_path_buf());
        info!(
            keys = hive.table.key_count(),
            values = hive.table.value_count(),
            "Hive opened"
        );
        Ok(hive)
    }

    /// Creates a new hive file holding only an empty root key.
    ///
    /// # Errors
    ///
    /// Fails if the file already exists or cannot be written.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn create<P: AsRef<Path>>(path: P) -> HiveResult<Self> {
        info!("Creating registry hive");
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)?;

        let mut hive = Self::in_memory();
        hive.file = Some(file);
        hive.path = Some(path.as_ref().to_path_buf());
        hive.commit()?;
        Ok(hive)
    }

    /// Creates a writable hive that lives only in memory.
    pub fn in_memory() -> Self {
        let now = filetime_now();
        let table = NodeTable::with_secured_root(KeyEntry::new(NEW_ROOT_NAME, now), default_descriptor());

        Self {
            file: None,
            path: None,
            base_block: BaseBlock::new(now),
            header_bytes: Vec::new(),
            table,
            writable: true,
            dirty: true,
        }
    }

    /// Loads a hive from a complete in-memory image.
    pub fn from_vec(data: Vec<u8>, writable: bool) -> HiveResult<Self> {
        Self::load(&data, writable)
    }

    fn load(data: &[u8], writable: bool) -> HiveResult<Self> {
        let base_block = BaseBlock::parse(data)?;
        if !base_block.is_consistent() {
            warn!(
                primary = base_block.primary_sequence,
                secondary = base_block.secondary_sequence,
                "Hive was not cleanly written; loading the primary file as is"
            );
        }

        let table = HiveReader::new(data, &base_block).load()?;
        Ok(Self {
            file: None,
            path: None,
            header_bytes: data[..BASE_BLOCK_SIZE].to_vec(),
            base_block,
            table,
            writable,
            dirty: false,
        })
    }

    /// Serializes the current tree into a complete hive image.
    ///
    /// The stored header is not touched; only [`HiveContainer::commit`] advances it.
    pub fn to_bytes(&self) -> HiveResult<Vec<u8>> {
        let now = filetime_now();
        let (image, _) = HiveWriter::new(&self.table, &self.base_block, now).write(&self.header_bytes, now)?;
        Ok(image)
    }

    /// Returns a reference to the base block header.
    pub fn base_block(&self) -> &BaseBlock {
        &self.base_block
    }

    /// Returns the loaded key tree.
    pub fn table(&self) -> &NodeTable {
        &self.table
    }

    /// Path of the backing file, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true if there are changes not yet committed.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn ensure_writable(&self) -> HiveResult<()> {
        if self.writable {
            Ok(())
        } else {
            Err(HiveError::ReadOnly)
        }
    }

    fn touch(&mut self) -> u64 {
        self.dirty = true;
        filetime_now()
    }
}

impl HiveContainer for Hive {
    fn is_writable(&self) -> bool {
        self.writable
    }

    fn root(&self) -> HiveResult<NodeId> {
        Ok(self.table.root())
    }

    fn children(&self, node: NodeId) -> HiveResult<Vec<(NodeId, String)>> {
        self.table.children(node)
    }

    fn add_child(&mut self, parent: NodeId, name: &str) -> HiveResult<NodeId> {
        self.ensure_writable()?;
        let now = self.touch();
        let id = self.table.add_child(parent, name, now)?;
        debug!(parent = %parent, name, id = %id, "Added key");
        Ok(id)
    }

    fn delete_node(&mut self, node: NodeId) -> HiveResult<()> {
        self.ensure_writable()?;
        let now = self.touch();
        self.table.delete_key(node, now)?;
        debug!(node = %node, "Deleted key");
        Ok(())
    }

    fn values(&self, node: NodeId) -> HiveResult<Vec<ValueId>> {
        self.table.value_ids(node)
    }

    fn value_name(&self, value: ValueId) -> HiveResult<String> {
        Ok(self.table.value(value)?.name.clone())
    }

    fn value(&self, value: ValueId) -> HiveResult<RawValue> {
        self.table.value(value).cloned()
    }

    fn set_value(&mut self, node: NodeId, value: RawValue) -> HiveResult<()> {
        self.ensure_writable()?;
        let now = self.touch();
        debug!(node = %node, name = %value.name, data_type = value.data_type, len = value.data.len(), "Setting value");
        self.table.set_value(node, value, now)?;
        Ok(())
    }

    fn delete_value(&mut self, value: ValueId) -> HiveResult<()> {
        self.ensure_writable()?;
        let now = self.touch();
        self.table.delete_value(value, now)?;
        debug!(value = %value, "Deleted value");
        Ok(())
    }

    #[instrument(skip(self), fields(path = ?self.path))]
    fn commit(&mut self) -> HiveResult<()> {
        if !self.dirty {
            debug!("Nothing to commit");
            return Ok(());
        }
        self.ensure_writable()?;

        let now = filetime_now();
        let (image, header) = HiveWriter::new(&self.table, &self.base_block, now).write(&self.header_bytes, now)?;

        if let Some(file) = self.file.as_mut() {
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&image)?;
            file.set_len(image.len() as u64)?;
            file.sync_all()?;
        }

        info!(
            bytes = image.len(),
            sequence = header.primary_sequence,
            "Committed hive"
        );
        self.header_bytes = image[..BASE_BLOCK_SIZE].to_vec();
        self.base_block = header;
        self.dirty = false;
        Ok(())
    }

    fn close(mut self) -> HiveResult<()> {
        if self.dirty && self.writable {
            warn!(path = ?self.path, "Closing hive with uncommitted changes");
        }
        self.dirty = false;

        if let Some(file) = self.file.take() {
            if self.writable {
                file.sync_all()?;
            }
        }
        debug!(path = ?self.path, "Hive closed");
        Ok(())
    }
}

impl Drop for Hive {
    fn drop(&mut self) {
        if self.dirty && self.writable && self.file.is_some() {
            warn!(path = ?self.path, "Hive dropped with uncommitted changes");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_roundtrip() {
        let mut hive = Hive::in_memory();
        let root = hive.root().unwrap();
        let a = hive.add_child(root, "Software").unwrap();
        hive.set_value(a, RawValue::new("v", 4, vec![1, 2, 3, 4])).unwrap();

        let reloaded = Hive::from_vec(hive.to_bytes().unwrap(), false).unwrap();
        let root = reloaded.root().unwrap();
        let children = reloaded.children(root).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].1, "Software");
        let values = reloaded.values(children[0].0).unwrap();
        assert_eq!(reloaded.value(values[0]).unwrap().data, vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_new_root_carries_default_descriptor() {
        let hive = Hive::in_memory();
        let table = hive.table();
        let index = table.key(table.root()).unwrap().security.unwrap();
        assert_eq!(table.descriptor(index).unwrap(), default_descriptor().as_slice());

        let reloaded = Hive::from_vec(hive.to_bytes().unwrap(), false).unwrap();
        let table = reloaded.table();
        let index = table.key(table.root()).unwrap().security.unwrap();
        assert_eq!(table.descriptor(index).unwrap(), default_descriptor().as_slice());
    }

    #[test]
    fn test_read_only_rejects_mutation() {
        let bytes = Hive::in_memory().to_bytes().unwrap();
        let mut hive = Hive::from_vec(bytes, false).unwrap();
        let root = hive.root().unwrap();
        assert!(matches!(hive.add_child(root, "x"), Err(HiveError::ReadOnly)));
        assert!(matches!(
            hive.set_value(root, RawValue::new("v", 1, vec![])),
            Err(HiveError::ReadOnly)
        ));
        // Nothing pending, so committing a read-only hive is fine
        hive.commit().unwrap();
    }

    #[test]
    fn test_commit_advances_sequence() {
        let mut hive = Hive::in_memory();
        hive.commit().unwrap();
        let first = hive.base_block().primary_sequence;
        assert!(!hive.is_dirty());

        hive.commit().unwrap();
        assert_eq!(hive.base_block().primary_sequence, first);

        let root = hive.root().unwrap();
        hive.add_child(root, "k").unwrap();
        hive.commit().unwrap();
        assert_eq!(hive.base_block().primary_sequence, first + 1);
        assert!(hive.base_block().is_consistent());
    }

    #[test]
    fn test_create_and_reopen_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test.hiv");

        let mut hive = Hive::create(&path).unwrap();
        let root = hive.root().unwrap();
        hive.add_child(root, "Persisted").unwrap();
        hive.commit().unwrap();
        hive.close().unwrap();

        let reopened = Hive::open(&path, false).unwrap();
        let root = reopened.root().unwrap();
        let names: Vec<_> = reopened.children(root).unwrap().into_iter().map(|(_, n)| n).collect();
        assert_eq!(names, vec!["Persisted"]);
        assert_eq!(reopened.path(), Some(path.as_path()));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exists.hiv");
        std::fs::write(&path, b"data").unwrap();
        assert!(matches!(Hive::create(&path), Err(HiveError::Io(_))));
        assert_eq!(std::fs::read(&path).unwrap(), b"data");
    }

    #[test]
    fn test_open_rejects_small_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("small.hiv");
        std::fs::write(&path, vec![0u8; 100]).unwrap();
        assert!(matches!(Hive::open(&path, false), Err(HiveError::HiveTooSmall { .. })));
    }
}
