//! Registry value types.
//!
//! Twelve types are predefined by the format. Names are accepted
//! case-insensitively, with or without the `REG_` prefix.

use crate::error::RegistryError;
use std::fmt;
use std::str::FromStr;

/// Registry value data types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegType {
    /// No value type.
    None,
    /// String (null-terminated).
    Sz,
    /// String with environment variables.
    ExpandSz,
    /// Binary data.
    Binary,
    /// 32-bit little-endian integer.
    Dword,
    /// 32-bit big-endian integer.
    DwordBigEndian,
    /// Symbolic link (Unicode).
    Link,
    /// Multiple strings.
    MultiSz,
    /// Resource list.
    ResourceList,
    /// Full resource descriptor.
    FullResourceDesc,
    /// Resource requirements list.
    ResourceRequirementsList,
    /// 64-bit little-endian integer.
    Qword,
}

impl RegType {
    /// Every predefined type, in tag order.
    pub const ALL: [RegType; 12] = [
        RegType::None,
        RegType::Sz,
        RegType::ExpandSz,
        RegType::Binary,
        RegType::Dword,
        RegType::DwordBigEndian,
        RegType::Link,
        RegType::MultiSz,
        RegType::ResourceList,
        RegType::FullResourceDesc,
        RegType::ResourceRequirementsList,
        RegType::Qword,
    ];

    /// Returns the on-disk type tag.
    pub fn tag(self) -> u32 {
        self as u32
    }

    /// Maps an on-disk type tag back to a predefined type.
    ///
    /// Tags outside 0..=11 are legal on disk but have no name here.
    pub fn from_tag(tag: u32) -> Option<Self> {
        Self::ALL.get(tag as usize).copied()
    }

    /// Returns the canonical `REG_*` name.
    pub fn name(self) -> &'static str {
        match self {
            RegType::None => "REG_NONE",
            RegType::Sz => "REG_SZ",
            RegType::ExpandSz => "REG_EXPAND_SZ",
            RegType::Binary => "REG_BINARY",
            RegType::Dword => "REG_DWORD",
            RegType::DwordBigEndian => "REG_DWORD_BIG_ENDIAN",
            RegType::Link => "REG_LINK",
            RegType::MultiSz => "REG_MULTI_SZ",
            RegType::ResourceList => "REG_RESOURCE_LIST",
            RegType::FullResourceDesc => "REG_FULL_RESOURCE_DESC",
            RegType::ResourceRequirementsList => "REG_RESOURCE_REQUIREMENTS_LIST",
            RegType::Qword => "REG_QWORD",
        }
    }

    /// Formats a raw tag, falling back to a hex form for unknown tags.
    pub fn describe_tag(tag: u32) -> String {
        match Self::from_tag(tag) {
            Some(ty) => ty.name().to_string(),
            None => format!("REG_UNKNOWN_{:#010x}", tag),
        }
    }
}

impl FromStr for RegType {
    type Err = RegistryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("REG_").unwrap_or(&upper);

        Self::ALL
            .iter()
            .copied()
            .find(|ty| &ty.name()[4..] == bare)
            .ok_or_else(|| RegistryError::InvalidType(s.to_string()))
    }
}

impl fmt::Display for RegType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
