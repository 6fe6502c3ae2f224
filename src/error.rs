//! Error types for hive container and registry store operations.
//!
//! Two layers of errors exist:
//!
//! - [`HiveError`] is raised by the hive container: I/O failures, format
//!   violations found while loading a hive file, and constraint violations
//!   such as writing to a read-only hive.
//! - [`RegistryError`] is raised by the [`RegistryStore`](crate::RegistryStore)
//!   facade. Container failures are wrapped with the path, segment or value
//!   that was being processed.

use std::io;
use thiserror::Error;

/// Result type alias for hive container operations.
pub type HiveResult<T> = std::result::Result<T, HiveError>;

/// Result type alias for registry store operations.
pub type Result<T> = std::result::Result<T, RegistryError>;

/// Errors raised by the hive container.
#[derive(Error, Debug)]
pub enum HiveError {
    /// I/O error occurred while reading or writing the hive file.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid magic signature in header or structure.
    #[error("Invalid signature: expected {expected:?}, found {found:?}")]
    InvalidSignature {
        /// Signature the structure must start with.
        expected: Vec<u8>,
        /// Bytes actually found.
        found: Vec<u8>,
    },

    /// Invalid hive format or corrupted data.
    #[error("Invalid hive format: {0}")]
    InvalidFormat(String),

    /// Cell offset is out of bounds.
    #[error("Invalid cell offset: {offset:#x} (hive size: {hive_size:#x})")]
    InvalidOffset {
        /// Offending offset, relative to the first hive bin.
        offset: u32,
        /// Size of the hive image.
        hive_size: usize,
    },

    /// Cell size is invalid or corrupted.
    #[error("Invalid cell size: {size} at offset {offset:#x}")]
    InvalidCellSize {
        /// Raw size field of the cell.
        size: i32,
        /// Offset of the cell.
        offset: u32,
    },

    /// Invalid UTF-16 string data.
    #[error("Invalid UTF-16 string at offset {offset:#x}")]
    InvalidUtf16 {
        /// Offset of the string.
        offset: u32,
    },

    /// Hive is too small to be valid.
    #[error("Hive too small: {size} bytes (minimum: {minimum} bytes)")]
    HiveTooSmall {
        /// Size of the file.
        size: usize,
        /// Smallest valid size.
        minimum: usize,
    },

    /// Checksum mismatch in hive header.
    #[error("Checksum mismatch: expected {expected:#x}, calculated {calculated:#x}")]
    ChecksumMismatch {
        /// Checksum stored in the header.
        expected: u32,
        /// Checksum computed over the header.
        calculated: u32,
    },

    /// Unsupported hive version.
    #[error("Unsupported hive version: {major}.{minor}")]
    UnsupportedVersion {
        /// Major format version.
        major: u32,
        /// Minor format version.
        minor: u32,
    },

    /// Data truncated or incomplete.
    #[error("Truncated data at offset {offset:#x}: expected {expected} bytes, got {actual} bytes")]
    TruncatedData {
        /// Offset of the structure.
        offset: u32,
        /// Bytes the structure needs.
        expected: usize,
        /// Bytes available.
        actual: usize,
    },

    /// Invalid subkey list type.
    #[error("Invalid subkey list type: {list_type:?}")]
    InvalidSubkeyList {
        /// Signature of the list cell.
        list_type: [u8; 2],
    },

    /// A mutating primitive was called on a hive opened read-only.
    #[error("hive is opened read-only")]
    ReadOnly,

    /// A node or value handle does not refer to a live entry of this hive.
    #[error("stale handle: {0}")]
    StaleHandle(String),

    /// A sibling key already has this name, compared ignoring case.
    #[error("key '{name}' conflicts with existing key '{existing}'")]
    KeyExists {
        /// Name of the key that was to be created.
        name: String,
        /// Name of the sibling it collides with.
        existing: String,
    },

    /// The operation is not allowed on this node.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    /// A structure grew past what the on-disk format can address.
    #[error("too large: {0}")]
    TooLarge(String),
}

impl HiveError {
    /// Creates an invalid signature error with context.
    pub fn invalid_signature(expected: &[u8], found: &[u8]) -> Self {
        Self::InvalidSignature {
            expected: expected.to_vec(),
            found: found.to_vec(),
        }
    }

    /// Creates an invalid offset error with context.
    pub fn invalid_offset(offset: u32, hive_size: usize) -> Self {
        Self::InvalidOffset { offset, hive_size }
    }

    /// Creates an invalid cell size error with context.
    pub fn invalid_cell_size(size: i32, offset: u32) -> Self {
        Self::InvalidCellSize { size, offset }
    }

    /// Creates a truncation error for a structure at `offset`.
    pub fn truncated(offset: u32, expected: usize, actual: usize) -> Self {
        Self::TruncatedData {
            offset,
            expected,
            actual,
        }
    }
}

/// Errors raised by the registry store.
#[derive(Error, Debug)]
pub enum RegistryError {
    /// A mutating operation was attempted on a store opened read-only.
    #[error("store is not writable")]
    WriteProtected,

    /// A segment of a key path does not exist and creation was not requested.
    #[error("key not found: '{segment}' in path '{path}'")]
    PathNotFound {
        /// Full key path as given by the caller.
        path: String,
        /// First segment that could not be found.
        segment: String,
    },

    /// A named value does not exist under an existing key.
    #[error("value '{name}' not found under key '{path}'")]
    ValueNotFound {
        /// Key path that was searched.
        path: String,
        /// Value name that was searched for.
        name: String,
    },

    /// The registry type has no string-to-bytes encoding rule.
    #[error("unsupported data type: {0}")]
    UnsupportedType(String),

    /// Malformed input for the requested registry type.
    #[error("cannot encode {reg_type} data: {reason}")]
    Encoding {
        /// Registry type name the data was meant for.
        reg_type: String,
        /// What was wrong with the input.
        reason: String,
    },

    /// A registry type name that is not one of the known types.
    #[error("invalid registry type: {0}")]
    InvalidType(String),

    /// Failure surfaced by the hive container.
    #[error("{context}: {source}")]
    Container {
        /// What the store was doing when the container failed.
        context: String,
        /// The underlying container error.
        #[source]
        source: HiveError,
    },
}

impl RegistryError {
    /// Wraps a container error with a description of the failed step.
    pub fn container(context: impl Into<String>, source: HiveError) -> Self {
        Self::Container {
            context: context.into(),
            source,
        }
    }

    /// Creates an encoding error for `reg_type`.
    pub fn encoding(reg_type: impl ToString, reason: impl Into<String>) -> Self {
        Self::Encoding {
            reg_type: reg_type.to_string(),
            reason: reason.into(),
        }
    }

    /// Returns true for errors that mean "the addressed key or value does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. } | Self::ValueNotFound { .. })
    }
}

/// Extension for attaching store context to container results.
pub(crate) trait ContainerContext<T> {
    /// Wraps the error, building the context string lazily.
    fn context_with<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ContainerContext<T> for HiveResult<T> {
    fn context_with<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| RegistryError::container(f(), e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_container_context_message() {
        let res: HiveResult<()> = Err(HiveError::ReadOnly);
        let err = res.context_with(|| "failed to add key Foo").unwrap_err();
        assert_eq!(err.to_string(), "failed to add key Foo: hive is opened read-only");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_not_found_kinds() {
        let err = RegistryError::PathNotFound {
            path: "a\\b".into(),
            segment: "b".into(),
        };
        assert!(err.is_not_found());
        assert!(err.to_string().contains("'b'"));
        assert!(!RegistryError::WriteProtected.is_not_found());
    }
}
