//! Key path parsing and resolution.
//!
//! Paths are relative to the hive root. Both `\` and `/` separate segments;
//! leading and trailing separators are ignored, while empty segments in
//! the middle of a path are literal empty key names.

use crate::container::HiveContainer;
use crate::error::{ContainerContext, HiveError, RegistryError, Result};
use crate::tree::NodeId;
use std::fmt;
use tracing::{debug, warn};

/// Canonical separator between key path segments.
pub const SEPARATOR: char = '\\';

/// A normalized key path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPath {
    segments: Vec<String>,
}

impl KeyPath {
    /// Normalizes and splits `path`.
    ///
    /// ```
    /// use hivereg::KeyPath;
    ///
    /// let path = KeyPath::parse("/Software/Vendor\\App\\");
    /// assert_eq!(path.segments(), ["Software", "Vendor", "App"]);
    /// assert!(KeyPath::parse("\\").is_root());
    /// ```
    pub fn parse(path: &str) -> Self {
        let normalized = path.replace('/', "\\");
        let trimmed = normalized.trim_matches(SEPARATOR);
        let segments = if trimmed.is_empty() {
            Vec::new()
        } else {
            trimmed.split(SEPARATOR).map(str::to_string).collect()
        };
        Self { segments }
    }

    /// The segments from the root down.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Returns true for the path of the root key itself.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }
}

impl fmt::Display for KeyPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("\\"))
    }
}

/// Returns the first child of `node` named exactly `name`.
fn find_child<C>(hive: &C, node: NodeId, name: &str) -> std::result::Result<Option<NodeId>, HiveError>
where
    C: HiveContainer + ?Sized,
{
    for (id, child) in hive.children(node)? {
        if child == name {
            return Ok(Some(id));
        }
    }
    Ok(None)
}

/// Resolves `path` to an existing key without modifying the hive.
///
/// # Errors
///
/// [`RegistryError::PathNotFound`] names the first missing segment; a
/// failure to list a key's children is a [`RegistryError::Container`].
pub fn find<C>(hive: &C, path: &str) -> Result<NodeId>
where
    C: HiveContainer + ?Sized,
{
    let key_path = KeyPath::parse(path);
    let mut current = hive.root().context_with(|| "failed to open the root key")?;

    for segment in key_path.segments() {
        current = find_child(hive, current, segment)
            .context_with(|| format!("failed to get key {}", segment))?
            .ok_or_else(|| RegistryError::PathNotFound {
                path: path.to_string(),
                segment: segment.clone(),
            })?;
    }
    Ok(current)
}

/// Resolves `path`, creating missing keys when `create_missing` is set.
///
/// With creation, each segment is reused when a child of that exact name
/// exists and created otherwise, so resolving the same path twice creates
/// nothing the second time. A segment whose children cannot be listed is
/// created as well.
pub fn resolve<C>(hive: &mut C, path: &str, create_missing: bool) -> Result<NodeId>
where
    C: HiveContainer + ?Sized,
{
    if !create_missing {
        return find(&*hive, path);
    }

    let key_path = KeyPath::parse(path);
    let mut current = hive.root().context_with(|| "failed to open the root key")?;

    for segment in key_path.segments() {
        current = match find_child(&*hive, current, segment) {
            Ok(Some(id)) => id,
            Ok(None) => {
                debug!(segment = %segment, "Creating missing key");
                hive.add_child(current, segment)
                    .context_with(|| format!("failed to create key {}", segment))?
            }
            Err(e) => {
                warn!(segment = %segment, error = %e, "Listing children failed, creating key");
                hive.add_child(current, segment)
                    .context_with(|| format!("failed to create key {}", segment))?
            }
        };
    }
    Ok(current)
}
