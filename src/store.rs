//! Registry store: path-addressed key and value operations over a hive.
//!
//! Every mutating operation checks the store's writability first, before
//! any container primitive runs, so a read-only store never touches its
//! hive on a rejected call.

use crate::codec;
use crate::container::HiveContainer;
use crate::error::{ContainerContext, RegistryError, Result};
use crate::hive::Hive;
use crate::lookup::find_value;
use crate::path::{find, resolve, KeyPath};
use crate::regtype::RegType;
use crate::tree::RawValue;
use std::path::Path;
use tracing::{debug, info, instrument, warn};

/// Contents of a key as reported by [`RegistryStore::query_key`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyListing {
    /// Normalized path of the key.
    pub path: String,
    /// Names of the direct subkeys, in order.
    pub subkeys: Vec<String>,
    /// Values of the key, in order.
    pub values: Vec<RawValue>,
}

/// Path-addressed access to a registry hive.
///
/// # Examples
///
/// ```no_run
/// use hivereg::{RegType, RegistryStore};
///
/// # fn main() -> hivereg::Result<()> {
/// let mut store = RegistryStore::open("user.hiv", true)?;
/// store.add_value("Software\\Vendor", "Level", RegType::Dword, "\0", "0x10")?;
/// store.close()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct RegistryStore<C: HiveContainer = Hive> {
    hive: C,
    writable: bool,
}

impl RegistryStore<Hive> {
    /// Opens the hive file at `path`.
    pub fn open<P: AsRef<Path>>(path: P, writable: bool) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let hive = Hive::open(path, writable).context_with(|| format!("failed to open store {}", display))?;
        Ok(Self::new(hive))
    }

    /// Creates a new, empty hive file at `path` and opens it writable.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let display = path.as_ref().display().to_string();
        let hive = Hive::create(path).context_with(|| format!("failed to create store {}", display))?;
        Ok(Self::new(hive))
    }
}

impl<C: HiveContainer> RegistryStore<C> {
    /// Wraps an open container; the store is writable when the container is.
    pub fn new(hive: C) -> Self {
        let writable = hive.is_writable();
        Self { hive, writable }
    }

    /// Whether mutating operations are permitted.
    pub fn is_writable(&self) -> bool {
        self.writable
    }

    /// Returns the underlying container.
    pub fn hive(&self) -> &C {
        &self.hive
    }

    fn ensure_writable(&self) -> Result<()> {
        if self.writable {
            Ok(())
        } else {
            Err(RegistryError::WriteProtected)
        }
    }

    /// Creates the key at `path` along with any missing ancestors.
    ///
    /// Adding a key that already exists succeeds without changes.
    #[instrument(skip(self))]
    pub fn add_key(&mut self, path: &str) -> Result<()> {
        self.ensure_writable()?;
        resolve(&mut self.hive, path, true)?;
        info!("Key added");
        Ok(())
    }

    /// Deletes the key at `path` with all its subkeys and values.
    #[instrument(skip(self))]
    pub fn delete_key(&mut self, path: &str) -> Result<()> {
        self.ensure_writable()?;
        let node = resolve(&mut self.hive, path, false)?;
        self.hive
            .delete_node(node)
            .context_with(|| format!("failed to delete key {}", path))?;
        info!("Key deleted");
        Ok(())
    }

    /// Sets the value `name` under `path` from its textual form.
    ///
    /// The key is created when missing. `separator` splits `data` into items
    /// for [`RegType::MultiSz`] and is ignored otherwise.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn add_value(
        &mut self,
        path: &str,
        name: &str,
        reg_type: RegType,
        separator: &str,
        data: &str,
    ) -> Result<()> {
        self.ensure_writable()?;
        let node = resolve(&mut self.hive, path, true)?;
        let bytes = codec::encode(reg_type, data, separator)?;
        debug!(bytes = bytes.len(), "Encoded value data");

        self.hive
            .set_value(node, RawValue::new(name, reg_type.tag(), bytes))
            .context_with(|| format!("failed to set value {} in {}", name, path))?;
        info!("Value set");
        Ok(())
    }

    /// Deletes the value `name` under `path`. The key is never created.
    #[instrument(skip(self))]
    pub fn delete_value(&mut self, path: &str, name: &str) -> Result<()> {
        self.ensure_writable()?;
        let node = resolve(&mut self.hive, path, false)?;
        let value = find_value(&self.hive, node, name)?.ok_or_else(|| RegistryError::ValueNotFound {
            path: path.to_string(),
            name: name.to_string(),
        })?;

        self.hive
            .delete_value(value)
            .context_with(|| format!("failed to delete value {} in {}", name, path))?;
        info!("Value deleted");
        Ok(())
    }

    /// Lists the subkeys and values of the key at `path`.
    #[instrument(skip(self))]
    pub fn query_key(&self, path: &str) -> Result<KeyListing> {
        let node = find(&self.hive, path)?;

        let subkeys = self
            .hive
            .children(node)
            .context_with(|| format!("failed to list subkeys of {}", path))?
            .into_iter()
            .map(|(_, name)| name)
            .collect();

        let ids = self
            .hive
            .values(node)
            .context_with(|| format!("failed to list values of {}", path))?;
        let mut values = Vec::with_capacity(ids.len());
        for id in ids {
            values.push(
                self.hive
                    .value(id)
                    .context_with(|| format!("failed to read a value of {}", path))?,
            );
        }

        Ok(KeyListing {
            path: KeyPath::parse(path).to_string(),
            subkeys,
            values,
        })
    }

    /// Returns the value `name` under `path`, or `None` when the key has no such value.
    pub fn get_value(&self, path: &str, name: &str) -> Result<Option<RawValue>> {
        let node = find(&self.hive, path)?;
        match find_value(&self.hive, node, name)? {
            Some(id) => self
                .hive
                .value(id)
                .map(Some)
                .context_with(|| format!("failed to read value {} in {}", name, path)),
            None => Ok(None),
        }
    }

    /// Commits pending changes when writable, then closes the hive.
    ///
    /// The hive is closed even when the commit fails; the commit error is
    /// reported in preference to a close error.
    #[instrument(skip(self), fields(writable = self.writable))]
    pub fn close(mut self) -> Result<()> {
        let committed = if self.writable {
            self.hive.commit().context_with(|| "failed to commit store")
        } else {
            Ok(())
        };
        let closed = self.hive.close().context_with(|| "failed to close store");

        match (committed, closed) {
            (Err(e), Err(close_err)) => {
                warn!(error = %close_err, "Close failed after a failed commit");
                Err(e)
            }
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                debug!("Store closed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ValueData;

    fn store() -> RegistryStore {
        RegistryStore::new(Hive::in_memory())
    }

    #[test]
    fn test_add_key_is_idempotent() {
        let mut s = store();
        s.add_key("a\\b\\c").unwrap();
        let keys = s.hive().table().key_count();
        s.add_key("a\\b\\c").unwrap();
        assert_eq!(s.hive().table().key_count(), keys);
        assert_eq!(keys, 4);
    }

    #[test]
    fn test_add_value_creates_key() {
        let mut s = store();
        s.add_value("x\\y", "n", RegType::Dword, "\0", "0x10").unwrap();
        let value = s.get_value("x\\y", "n").unwrap().unwrap();
        assert_eq!(value.data, vec![0x10, 0, 0, 0]);
        assert_eq!(value.data_type, RegType::Dword.tag());
    }

    #[test]
    fn test_add_value_replaces() {
        let mut s = store();
        s.add_value("k", "v", RegType::Sz, "\0", "one").unwrap();
        s.add_value("k", "v", RegType::Qword, "\0", "5").unwrap();
        let listing = s.query_key("k").unwrap();
        assert_eq!(listing.values.len(), 1);
        assert_eq!(
            ValueData::parse(&listing.values[0].data, listing.values[0].data_type).unwrap(),
            ValueData::Qword(5)
        );
    }

    #[test]
    fn test_encoding_failure_leaves_key_created() {
        let mut s = store();
        let err = s.add_value("k", "v", RegType::Dword, "\0", "nope").unwrap_err();
        assert!(matches!(err, RegistryError::Encoding { .. }));
        // Resolution happens before encoding
        assert!(s.query_key("k").is_ok());
    }

    #[test]
    fn test_delete_value_does_not_create() {
        let mut s = store();
        let err = s.delete_value("missing\\key", "v").unwrap_err();
        assert!(matches!(err, RegistryError::PathNotFound { .. }));
        assert!(s.query_key("missing").is_err());

        s.add_key("present").unwrap();
        let err = s.delete_value("present", "v").unwrap_err();
        assert!(matches!(err, RegistryError::ValueNotFound { .. }));
    }

    #[test]
    fn test_delete_key_removes_subtree() {
        let mut s = store();
        s.add_value("a\\b", "v", RegType::Sz, "\0", "x").unwrap();
        s.delete_key("a").unwrap();
        assert!(s.query_key("a").unwrap_err().is_not_found());
        assert!(s.query_key("").unwrap().subkeys.is_empty());
        assert!(s.delete_key("a").unwrap_err().is_not_found());
    }

    #[test]
    fn test_delete_root_is_container_error() {
        let mut s = store();
        let err = s.delete_key("\\").unwrap_err();
        assert!(matches!(err, RegistryError::Container { .. }));
    }

    #[test]
    fn test_read_only_store() {
        let bytes = Hive::in_memory().to_bytes().unwrap();
        let mut s = RegistryStore::new(Hive::from_vec(bytes, false).unwrap());
        assert!(!s.is_writable());
        assert!(matches!(s.add_key("a"), Err(RegistryError::WriteProtected)));
        assert!(matches!(s.delete_key("a"), Err(RegistryError::WriteProtected)));
        assert!(matches!(
            s.add_value("a", "v", RegType::Sz, "\0", "x"),
            Err(RegistryError::WriteProtected)
        ));
        assert!(matches!(s.delete_value("a", "v"), Err(RegistryError::WriteProtected)));
        s.close().unwrap();
    }
}
