//! Mock Memory Source
//!
//! Sparse in-memory address space for testing readers and heap walks.

use super::MemorySource;
use crate::target::Architecture;
use crate::{Error, Result};
use byteorder::{ByteOrder, LE};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::RwLock;

/// A mock memory source made of independent mapped ranges
///
/// Reads that run past the end of a range come back short, the same way
/// a dump with holes behaves.
pub struct MockMemorySource {
    /// Mapped ranges as (base address, data), sorted by base
    pub ranges: Vec<(u64, Vec<u8>)>,
    pub pointer_size: usize,
    /// Number of `read_bytes` calls served
    reads: AtomicUsize,
}

impl MockMemorySource {
    /// Create an empty address space for a target with the given pointer width
    pub fn new(pointer_size: usize) -> Self {
        Self {
            ranges: Vec::new(),
            pointer_size,
            reads: AtomicUsize::new(0),
        }
    }

    /// Create with a single zeroed range
    pub fn with_range(pointer_size: usize, base: u64, len: usize) -> Self {
        let mut source = Self::new(pointer_size);
        source.map(base, vec![0; len]);
        source
    }

    /// Map a range of bytes at `base`
    pub fn map(&mut self, base: u64, data: Vec<u8>) {
        self.ranges.push((base, data));
        self.ranges.sort_by_key(|(b, _)| *b);
    }

    fn range_mut(&mut self, address: u64, len: usize) -> &mut [u8] {
        let (base, data) = self
            .ranges
            .iter_mut()
            .find(|(base, data)| {
                address >= *base && address + len as u64 <= *base + data.len() as u64
            })
            .unwrap_or_else(|| panic!("Address {:#x} is not mapped in mock", address));
        let offset = (address - *base) as usize;
        &mut data[offset..offset + len]
    }

    /// Write raw bytes into an already mapped range
    pub fn write(&mut self, address: u64, bytes: &[u8]) {
        self.range_mut(address, bytes.len()).copy_from_slice(bytes);
    }

    pub fn write_u16(&mut self, address: u64, value: u16) {
        LE::write_u16(self.range_mut(address, 2), value);
    }

    pub fn write_u32(&mut self, address: u64, value: u32) {
        LE::write_u32(self.range_mut(address, 4), value);
    }

    pub fn write_u64(&mut self, address: u64, value: u64) {
        LE::write_u64(self.range_mut(address, 8), value);
    }

    /// Write a target-width pointer
    pub fn write_ptr(&mut self, address: u64, value: u64) {
        match self.pointer_size {
            4 => self.write_u32(address, value as u32),
            _ => self.write_u64(address, value),
        }
    }

    /// Number of reads that reached this source
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::Relaxed)
    }
}

impl MemorySource for MockMemorySource {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        self.reads.fetch_add(1, Ordering::Relaxed);

        let (base, data) = self
            .ranges
            .iter()
            .find(|(base, data)| address >= *base && address < *base + data.len() as u64)
            .ok_or(Error::MemoryRead { address, size })?;

        let offset = (address - base) as usize;
        let end = (offset + size).min(data.len());
        Ok(data[offset..end].to_vec())
    }

    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn architecture(&self) -> Architecture {
        match self.pointer_size {
            4 => Architecture::X86,
            _ => Architecture::Amd64,
        }
    }
}

/// A mock process whose memory can change between reads
pub struct LiveMockSource {
    memory: RwLock<MockMemorySource>,
}

impl LiveMockSource {
    pub fn new(memory: MockMemorySource) -> Self {
        Self {
            memory: RwLock::new(memory),
        }
    }

    /// Overwrite memory as the running process would
    pub fn write(&self, address: u64, bytes: &[u8]) {
        if let Ok(mut memory) = self.memory.write() {
            memory.write(address, bytes);
        }
    }
}

impl MemorySource for LiveMockSource {
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        match self.memory.read() {
            Ok(memory) => memory.read_bytes(address, size),
            Err(_) => Err(Error::MemoryRead { address, size }),
        }
    }

    fn pointer_size(&self) -> usize {
        self.memory.read().map(|m| m.pointer_size).unwrap_or(8)
    }

    fn architecture(&self) -> Architecture {
        match self.pointer_size() {
            4 => Architecture::X86,
            _ => Architecture::Amd64,
        }
    }

    fn is_live(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_source_read_bytes() {
        let mut source = MockMemorySource::new(8);
        source.map(0x1000, vec![0x41, 0x42, 0x43, 0x44]);

        let result = source.read_bytes(0x1000, 4).unwrap();
        assert_eq!(result, vec![0x41, 0x42, 0x43, 0x44]);

        let partial = source.read_bytes(0x1001, 2).unwrap();
        assert_eq!(partial, vec![0x42, 0x43]);
    }

    #[test]
    fn test_mock_source_short_read_at_range_end() {
        let mut source = MockMemorySource::new(8);
        source.map(0x1000, vec![1, 2, 3, 4]);

        let short = source.read_bytes(0x1002, 16).unwrap();
        assert_eq!(short, vec![3, 4]);
        assert!(source.read_exact(0x1002, 16).is_err());
    }

    #[test]
    fn test_mock_source_unmapped() {
        let source = MockMemorySource::with_range(8, 0x1000, 0x100);
        assert!(source.read_bytes(0x500, 4).is_err());
        assert!(source.read_bytes(0x1100, 4).is_err());
    }

    #[test]
    fn test_mock_source_read_ptr_width() {
        let mut source = MockMemorySource::with_range(4, 0x1000, 0x10);
        source.write_u64(0x1000, 0x1122_3344_5566_7788);
        assert_eq!(source.read_ptr(0x1000).unwrap(), 0x5566_7788);

        let mut source = MockMemorySource::with_range(8, 0x1000, 0x10);
        source.write_ptr(0x1000, 0x1122_3344_5566_7788);
        assert_eq!(source.read_ptr(0x1000).unwrap(), 0x1122_3344_5566_7788);
        assert_eq!(source.read_u32(0x1004).unwrap(), 0x1122_3344);
    }

    #[test]
    fn test_live_mock_sees_writes() {
        let source = LiveMockSource::new(MockMemorySource::with_range(8, 0x1000, 0x10));
        assert_eq!(source.read_u32(0x1000).unwrap(), 0);
        source.write(0x1000, &[1, 0, 0, 0]);
        assert_eq!(source.read_u32(0x1000).unwrap(), 1);
        assert!(source.is_live());
    }

    #[test]
    fn test_mock_source_counts_reads() {
        let source = MockMemorySource::with_range(8, 0x1000, 0x10);
        let _ = source.read_bytes(0x1000, 4);
        let _ = source.read_bytes(0x9000, 4);
        assert_eq!(source.read_count(), 2);
    }
}
