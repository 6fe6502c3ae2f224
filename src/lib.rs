//! # hivereg
//!
//! Add and delete keys and typed values in Windows registry hive (REGF)
//! files, addressed by path.
//!
//! ## Architecture
//!
//! The crate is built in layers:
//!
//! 1. **Binary structures**: base block, hive bins, cells and the
//!    nk/vk/sk/lf/lh/li/ri/db records ([`header`], [`hbin`], [`cell`],
//!    [`key`], [`value`], [`subkey_list`], [`security`], [`bigdata`])
//! 2. **Container**: [`Hive`] loads the key tree into a [`NodeTable`] and
//!    writes a fresh image on commit; it implements [`HiveContainer`]
//! 3. **Store**: [`RegistryStore`] resolves key paths ([`path`]), finds
//!    values ([`lookup`]) and encodes textual data ([`codec`])
//!
//! ## Binary Layout
//!
//! ```text
//! [Base Block - 4KB]
//!   - Signature: "regf"
//!   - Sequence numbers, version, root offset
//!   - Checksum
//!
//! [Hive Bins - variable size, 4KB aligned]
//!   [Hbin Header - 32 bytes]
//!   [Cells - 8 byte aligned, size negative if allocated]
//! ```
//!
//! ## Examples
//!
//! ```no_run
//! use hivereg::{RegType, RegistryStore};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut store = RegistryStore::open("SOFTWARE", true)?;
//!
//! store.add_key("Vendor\\App")?;
//! store.add_value("Vendor\\App", "Paths", RegType::MultiSz, ";", "C:\\a;C:\\b")?;
//! store.delete_value("Vendor\\App", "Obsolete").ok();
//!
//! for name in store.query_key("Vendor")?.subkeys {
//!     println!("{}", name);
//! }
//!
//! // Commits and closes
//! store.close()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bigdata;
pub mod cell;
pub mod codec;
pub mod container;
pub mod error;
pub mod hbin;
pub mod header;
pub mod hive;
pub mod key;
pub mod lookup;
pub mod path;
mod reader;
pub mod regtype;
pub mod security;
pub mod store;
pub mod subkey_list;
pub mod tree;
pub mod utils;
pub mod value;
mod writer;

#[cfg(feature = "cli")]
pub mod cli;

pub use cell::{CellType, KeyNodeFlags};
pub use container::HiveContainer;
pub use error::{HiveError, HiveResult, RegistryError, Result};
pub use header::BaseBlock;
pub use hive::Hive;
pub use path::KeyPath;
pub use regtype::RegType;
pub use store::{KeyListing, RegistryStore};
pub use tree::{NodeId, NodeTable, RawValue, ValueId};
pub use value::ValueData;

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
