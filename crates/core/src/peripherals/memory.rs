// LabWired - Firmware Simulation Platform
// Copyright (C) 2026 Andrii Shylenko
//
// This software is released under the MIT License.
// See the LICENSE file in the project root for full license information.

use crate::{AccessWidths, Peripheral};
use std::any::Any;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// A simple flat memory storage, addressable at every width.
///
/// Accesses beyond the end read as zero and are otherwise ignored.
#[derive(Debug)]
pub struct MappedMemory {
    data: RwLock<Vec<u8>>,
}

impl MappedMemory {
    pub fn new(size: usize) -> Self {
        Self {
            data: RwLock::new(vec![0; size]),
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn data(&self) -> RwLockReadGuard<'_, Vec<u8>> {
        self.data.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn data_mut(&self) -> RwLockWriteGuard<'_, Vec<u8>> {
        self.data.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Copies `bytes` in at `offset`. Fails without writing anything if the
    /// image does not fit.
    pub fn load(&self, offset: u64, bytes: &[u8]) -> bool {
        let mut data = self.data_mut();
        let Some(end) = (offset as usize).checked_add(bytes.len()) else {
            return false;
        };
        if end > data.len() {
            tracing::warn!(
                "Image of {} bytes at offset {:#x} does not fit {} bytes of memory",
                bytes.len(),
                offset,
                data.len()
            );
            return false;
        }
        data[offset as usize..end].copy_from_slice(bytes);
        true
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.data().clone()
    }

    fn read_le<const N: usize>(&self, offset: u64) -> [u8; N] {
        let mut out = [0u8; N];
        self.read_bytes(offset, &mut out);
        out
    }
}

impl Peripheral for MappedMemory {
    fn widths(&self) -> AccessWidths {
        AccessWidths::all()
    }

    fn read_u8(&self, offset: u64) -> u8 {
        self.data().get(offset as usize).copied().unwrap_or(0)
    }

    fn write_u8(&self, offset: u64, value: u8) {
        if let Some(byte) = self.data_mut().get_mut(offset as usize) {
            *byte = value;
        }
    }

    fn read_u16(&self, offset: u64) -> u16 {
        u16::from_le_bytes(self.read_le(offset))
    }

    fn write_u16(&self, offset: u64, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    fn read_u32(&self, offset: u64) -> u32 {
        u32::from_le_bytes(self.read_le(offset))
    }

    fn write_u32(&self, offset: u64, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    fn read_u64(&self, offset: u64) -> u64 {
        u64::from_le_bytes(self.read_le(offset))
    }

    fn write_u64(&self, offset: u64, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    fn supports_bulk(&self) -> bool {
        true
    }

    fn read_bytes(&self, offset: u64, buf: &mut [u8]) {
        let data = self.data();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(buf.len()).min(data.len());
        let n = end - start;
        buf[..n].copy_from_slice(&data[start..end]);
        buf[n..].fill(0);
    }

    fn write_bytes(&self, offset: u64, bytes: &[u8]) {
        let mut data = self.data_mut();
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(bytes.len()).min(data.len());
        let n = end - start;
        data[start..end].copy_from_slice(&bytes[..n]);
    }

    fn size(&self) -> Option<u64> {
        Some(self.len() as u64)
    }

    fn reset(&self) {
        self.data_mut().fill(0);
    }

    fn as_any(&self) -> Option<&dyn Any> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_read_write() {
        let mem = MappedMemory::new(1024);

        mem.write_u8(0, 42);
        mem.write_u8(0x3FF, 99); // Last byte
        mem.write_u8(0x400, 1); // Out of bounds, ignored

        assert_eq!(mem.read_u8(0), 42);
        assert_eq!(mem.read_u8(0x3FF), 99);
        assert_eq!(mem.read_u8(0x400), 0);

        mem.write_u32(0x10, 0xDEAD_BEEF);
        assert_eq!(mem.read_u8(0x10), 0xEF);
        assert_eq!(mem.read_u16(0x12), 0xDEAD);
        assert_eq!(mem.read_u64(0x10), 0xDEAD_BEEF);
    }

    #[test]
    fn test_partial_access_at_end() {
        let mem = MappedMemory::new(16);
        mem.write_u32(14, 0x4433_2211);
        assert_eq!(mem.read_u16(14), 0x2211);
        assert_eq!(mem.read_u32(14), 0x2211);
    }

    #[test]
    fn test_load() {
        let mem = MappedMemory::new(1024);

        assert!(mem.load(0, &[1, 2, 3]));
        assert_eq!(mem.read_u8(0), 1);

        // Overlaps the end; nothing is written.
        assert!(!mem.load(0x3FE, &[10, 20, 30]));
        assert_eq!(mem.read_u8(0x3FF), 0);

        // Exact fit at the end.
        assert!(mem.load(0x3FE, &[0xAA, 0xBB]));
        assert_eq!(mem.read_u8(0x3FE), 0xAA);
        assert_eq!(mem.read_u8(0x3FF), 0xBB);

        mem.reset();
        assert!(mem.to_vec().iter().all(|b| *b == 0));
    }
}
