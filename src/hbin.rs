//! Hive bin (hbin) blocks.
//!
//! Hive bins are 4KB-aligned blocks that contain registry cells. Each hbin
//! has a 32-byte header followed by a sequence of cells. A cell starts with
//! a signed 32-bit size: negative when allocated, positive when free.
//!
//! [`BinWriter`] lays out cells for a fresh hive image: cells are 8-byte
//! aligned, never straddle a bin boundary, and the unused tail of every bin
//! is covered by a single free cell.

use crate::error::{HiveError, HiveResult};
use crate::utils::{align8, read_i32_le, read_u32_le, read_u64_le, write_u32_le, write_u64_le};

/// Expected signature for hive bins ("hbin").
pub const HBIN_SIGNATURE: &[u8; 4] = b"hbin";

/// Size of an hbin header.
pub const HBIN_HEADER_SIZE: usize = 0x20;

/// Bins are sized in multiples of this.
pub const HBIN_ALIGNMENT: usize = 0x1000;

/// Hive bin header structure.
#[derive(Debug, Clone)]
pub struct HbinHeader {
    /// Offset of this hbin relative to the first hbin.
    pub offset: u32,

    /// Size of this hbin in bytes (including header).
    pub size: u32,

    /// Timestamp (Windows FILETIME), only meaningful in the first bin.
    pub timestamp: u64,
}

impl HbinHeader {
    /// Parses an hbin header from raw bytes.
    ///
    /// # Errors
    ///
    /// Returns an error if the data is too small, the signature is invalid,
    /// the offset doesn't match `expected_offset`, or the size is not a
    /// non-zero multiple of 4KB.
    pub fn parse(data: &[u8], expected_offset: u32) -> HiveResult<Self> {
        if data.len() < HBIN_HEADER_SIZE {
            return Err(HiveError::truncated(expected_offset, HBIN_HEADER_SIZE, data.len()));
        }

        if &data[0..4] != HBIN_SIGNATURE {
            return Err(HiveError::invalid_signature(HBIN_SIGNATURE, &data[0..4]));
        }

        let offset = read_u32_le(data, 0x04)?;
        let size = read_u32_le(data, 0x08)?;

        if offset != expected_offset {
            return Err(HiveError::InvalidFormat(format!(
                "Hbin offset mismatch: expected {:#x}, found {:#x}",
                expected_offset, offset
            )));
        }
        if size == 0 || size as usize % HBIN_ALIGNMENT != 0 {
            return Err(HiveError::InvalidFormat(format!(
                "Hbin at {:#x} has invalid size {:#x}",
                offset, size
            )));
        }

        Ok(HbinHeader {
            offset,
            size,
            timestamp: read_u64_le(data, 0x14)?,
        })
    }

    /// Serializes the header into the first 32 bytes of `buf`.
    pub fn write_into(&self, buf: &mut [u8]) {
        buf[..HBIN_HEADER_SIZE].fill(0);
        buf[0..4].copy_from_slice(HBIN_SIGNATURE);
        write_u32_le(buf, 0x04, self.offset);
        write_u32_le(buf, 0x08, self.size);
        write_u64_le(buf, 0x14, self.timestamp);
    }

    /// Returns the size of the data area (excluding the header).
    pub fn data_size(&self) -> u32 {
        self.size.saturating_sub(HBIN_HEADER_SIZE as u32)
    }
}

/// Iterator over the hbin headers of a hive bins area.
///
/// Stops at the first position that does not carry an hbin signature, which
/// is how trailing padding after the last bin is treated.
pub struct HbinIterator<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> HbinIterator<'a> {
    /// Iterates over `data`, which starts at the first hbin.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }
}

impl<'a> Iterator for HbinIterator<'a> {
    type Item = HiveResult<HbinHeader>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }

        match HbinHeader::parse(&self.data[self.offset..], self.offset as u32) {
            Ok(header) => {
                self.offset += header.size as usize;
                Some(Ok(header))
            }
            Err(HiveError::InvalidSignature { .. }) => None,
            Err(e) => {
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}

/// Allocates cells into freshly laid out hive bins.
///
/// Offsets handed out are relative to the first hbin, which is what every
/// on-disk cell reference uses.
#[derive(Debug)]
pub struct BinWriter {
    data: Vec<u8>,
    bin_end: usize,
    cursor: usize,
    timestamp: u64,
}

impl BinWriter {
    /// Creates an empty writer; the first bin carries `timestamp`.
    pub fn new(timestamp: u64) -> Self {
        Self {
            data: Vec::new(),
            bin_end: 0,
            cursor: 0,
            timestamp,
        }
    }

    /// Allocates a cell with room for `payload_len` bytes and returns its offset.
    ///
    /// The payload is zero-filled; fill it through [`BinWriter::cell_mut`].
    pub fn alloc(&mut self, payload_len: usize) -> HiveResult<u32> {
        let size = align8(payload_len + 4);
        if self.cursor + size > self.bin_end {
            self.open_bin(size)?;
        }

        let offset = self.cursor;
        let raw_size = i32::try_from(size)
            .map_err(|_| HiveError::TooLarge(format!("cell of {} bytes", size)))?;
        write_u32_le(&mut self.data, offset, (-raw_size) as u32);
        self.cursor += size;
        Ok(offset as u32)
    }

    /// Allocates a cell and copies `payload` into it.
    pub fn alloc_with(&mut self, payload: &[u8]) -> HiveResult<u32> {
        let offset = self.alloc(payload.len())?;
        self.cell_mut(offset)?[..payload.len()].copy_from_slice(payload);
        Ok(offset)
    }

    /// Returns the payload of an allocated cell.
    pub fn cell_mut(&mut self, offset: u32) -> HiveResult<&mut [u8]> {
        let start = offset as usize;
        let size = read_i32_le(&self.data, start)?;
        if size >= 0 {
            return Err(HiveError::invalid_cell_size(size, offset));
        }
        let end = start + size.unsigned_abs() as usize;
        Ok(&mut self.data[start + 4..end])
    }

    /// Total length of the bins laid out so far.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns true if no bin has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Closes the last bin and returns the hive bins area.
    pub fn finish(mut self) -> Vec<u8> {
        self.close_bin();
        self.data
    }

    fn open_bin(&mut self, min_cell: usize) -> HiveResult<()> {
        self.close_bin();

        let size = (HBIN_HEADER_SIZE + min_cell).div_ceil(HBIN_ALIGNMENT) * HBIN_ALIGNMENT;
        let start = self.data.len();
        let header = HbinHeader {
            offset: u32::try_from(start)
                .map_err(|_| HiveError::TooLarge("hive bins exceed 4 GiB".to_string()))?,
            size: size as u32,
            timestamp: if start == 0 { self.timestamp } else { 0 },
        };

        self.data.resize(start + size, 0);
        header.write_into(&mut self.data[start..]);
        self.cursor = start + HBIN_HEADER_SIZE;
        self.bin_end = start + size;
        Ok(())
    }

    fn close_bin(&mut self) {
        let remaining = self.bin_end - self.cursor;
        if remaining > 0 {
            write_u32_le(&mut self.data, self.cursor, remaining as u32);
            self.cursor = self.bin_end;
        }
    }
}
