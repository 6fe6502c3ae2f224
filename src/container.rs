//! Primitive operations a hive container provides to the registry store.
//!
//! The store only ever talks to a hive through this trait, which keeps the
//! key-path and value logic independent of how the hive is persisted.
//! [`Hive`](crate::Hive) is the file-backed implementation.

use crate::error::HiveResult;
use crate::tree::{NodeId, RawValue, ValueId};

/// Node-handle based access to an open hive.
///
/// Handles are only meaningful for the container that issued them and only
/// while it is open.
pub trait HiveContainer {
    /// Whether mutating primitives are permitted.
    fn is_writable(&self) -> bool;

    /// Returns the root key.
    fn root(&self) -> HiveResult<NodeId>;

    /// Lists the direct children of `node` as (handle, name), in order.
    fn children(&self, node: NodeId) -> HiveResult<Vec<(NodeId, String)>>;

    /// Creates a child key named `name` under `parent`.
    fn add_child(&mut self, parent: NodeId, name: &str) -> HiveResult<NodeId>;

    /// Deletes `node` and everything below it.
    fn delete_node(&mut self, node: NodeId) -> HiveResult<()>;

    /// Lists the values owned by `node`, in order.
    fn values(&self, node: NodeId) -> HiveResult<Vec<ValueId>>;

    /// Returns the name of a value.
    fn value_name(&self, value: ValueId) -> HiveResult<String>;

    /// Returns a value's name, type tag and payload.
    fn value(&self, value: ValueId) -> HiveResult<RawValue>;

    /// Creates the value under `node`, or replaces the one with the same name.
    fn set_value(&mut self, node: NodeId, value: RawValue) -> HiveResult<()>;

    /// Deletes a single value.
    fn delete_value(&mut self, value: ValueId) -> HiveResult<()>;

    /// Persists pending changes.
    fn commit(&mut self) -> HiveResult<()>;

    /// Releases the hive. Uncommitted changes are discarded.
    fn close(self) -> HiveResult<()>
    where
        Self: Sized;
}
