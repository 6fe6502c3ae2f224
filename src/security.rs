//! Security key (sk) cells.
//!
//! Every key node references one security cell. Security cells form a
//! doubly linked circular list and are shared between keys through a
//! reference count. The descriptor itself is kept as opaque bytes.

use crate::cell::CellType;
use crate::error::{HiveError, HiveResult};
use crate::utils::{read_u32_le, write_u32_le};

/// Size of the fixed part of a security cell, up to the descriptor.
pub const SECURITY_FIXED_SIZE: usize = 0x14;

/// Security key (sk) structure.
#[derive(Debug, Clone)]
pub struct SecurityCell {
    /// Offset of the next security cell in the list.
    pub flink: u32,

    /// Offset of the previous security cell in the list.
    pub blink: u32,

    /// Number of key nodes referencing this cell.
    pub reference_count: u32,

    /// Self-relative security descriptor.
    pub descriptor: Vec<u8>,
}

impl SecurityCell {
    /// Parses a security cell from cell data.
    pub fn parse(data: &[u8], offset: u32) -> HiveResult<Self> {
        if data.len() < SECURITY_FIXED_SIZE {
            return Err(HiveError::truncated(offset, SECURITY_FIXED_SIZE, data.len()));
        }
        CellType::Security.expect(data, offset)?;

        let size = read_u32_le(data, 0x10)? as usize;
        let end = SECURITY_FIXED_SIZE + size;
        let descriptor = data
            .get(SECURITY_FIXED_SIZE..end)
            .ok_or_else(|| HiveError::truncated(offset, end, data.len()))?
            .to_vec();

        Ok(SecurityCell {
            flink: read_u32_le(data, 0x04)?,
            blink: read_u32_le(data, 0x08)?,
            reference_count: read_u32_le(data, 0x0C)?,
            descriptor,
        })
    }

    /// Returns the cell payload size needed to store this cell.
    pub fn encoded_len(&self) -> usize {
        SECURITY_FIXED_SIZE + self.descriptor.len()
    }

    /// Serializes the cell into `buf`, which must hold [`SecurityCell::encoded_len`] bytes.
    pub fn write_into(&self, buf: &mut [u8]) {
        buf[0..2].copy_from_slice(CellType::Security.signature());
        buf[2..4].fill(0);
        write_u32_le(buf, 0x04, self.flink);
        write_u32_le(buf, 0x08, self.blink);
        write_u32_le(buf, 0x0C, self.reference_count);
        write_u32_le(buf, 0x10, self.descriptor.len() as u32);
        buf[SECURITY_FIXED_SIZE..SECURITY_FIXED_SIZE + self.descriptor.len()]
            .copy_from_slice(&self.descriptor);
    }
}

/// Descriptor given to the root of a newly created hive.
///
/// Self-relative, no owner or group, a DACL with one container-inherited
/// ACE granting KEY_ALL_ACCESS to Everyone (S-1-1-0).
pub fn default_descriptor() -> Vec<u8> {
    const SE_DACL_PRESENT: u16 = 0x0004;
    const SE_SELF_RELATIVE: u16 = 0x8000;
    const KEY_ALL_ACCESS: u32 = 0x000F_003F;
    const CONTAINER_INHERIT_ACE: u8 = 0x02;

    let sid_everyone: [u8; 12] = [1, 1, 0, 0, 0, 0, 0, 1, 0, 0, 0, 0];
    let ace_size = 8 + sid_everyone.len();
    let acl_size = 8 + ace_size;

    let mut sd = Vec::with_capacity(20 + acl_size);
    // SECURITY_DESCRIPTOR_RELATIVE
    sd.push(1);
    sd.push(0);
    sd.extend_from_slice(&(SE_DACL_PRESENT | SE_SELF_RELATIVE).to_le_bytes());
    sd.extend_from_slice(&0u32.to_le_bytes());
    sd.extend_from_slice(&0u32.to_le_bytes());
    sd.extend_from_slice(&0u32.to_le_bytes());
    sd.extend_from_slice(&20u32.to_le_bytes());
    // ACL
    sd.push(2);
    sd.push(0);
    sd.extend_from_slice(&(acl_size as u16).to_le_bytes());
    sd.extend_from_slice(&1u16.to_le_bytes());
    sd.extend_from_slice(&0u16.to_le_bytes());
    // ACCESS_ALLOWED_ACE
    sd.push(0);
    sd.push(CONTAINER_INHERIT_ACE);
    sd.extend_from_slice(&(ace_size as u16).to_le_bytes());
    sd.extend_from_slice(&KEY_ALL_ACCESS.to_le_bytes());
    sd.extend_from_slice(&sid_everyone);
    sd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_security_roundtrip() {
        let cell = SecurityCell {
            flink: 0x20,
            blink: 0x80,
            reference_count: 3,
            descriptor: default_descriptor(),
        };
        let mut buf = vec![0u8; cell.encoded_len()];
        cell.write_into(&mut buf);

        let parsed = SecurityCell::parse(&buf, 0).unwrap();
        assert_eq!(parsed.flink, 0x20);
        assert_eq!(parsed.blink, 0x80);
        assert_eq!(parsed.reference_count, 3);
        assert_eq!(parsed.descriptor, cell.descriptor);
    }

    #[test]
    fn test_default_descriptor_layout() {
        let sd = default_descriptor();
        assert_eq!(sd.len(), 48);
        // DACL offset
        assert_eq!(read_u32_le(&sd, 16).unwrap(), 20);
        // ACL size covers the rest
        assert_eq!(u16::from_le_bytes([sd[22], sd[23]]) as usize, sd.len() - 20);
    }

    #[test]
    fn test_truncated_descriptor() {
        let mut buf = vec![0u8; SECURITY_FIXED_SIZE + 4];
        buf[0..2].copy_from_slice(b"sk");
        write_u32_le(&mut buf, 0x10, 64);
        assert!(SecurityCell::parse(&buf, 0).is_err());
    }
}
