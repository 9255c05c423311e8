//! Cached Memory Readers
//!
//! Heap walking issues millions of tiny pointer reads in roughly increasing
//! address order. Both readers here keep exactly one page of target memory
//! and serve reads from it until a read falls outside:
//!
//! - `MemoryReader` - synchronous, refills the page on a miss
//! - `PrefetchReader` - also reads the following page on a worker thread
//!
//! A reader is owned by one walk at a time and is not shared between threads.

mod cache;
mod prefetch;

pub use cache::MemoryReader;
pub use prefetch::PrefetchReader;

use byteorder::{ByteOrder, LE};

/// Page size for general use
pub const DEFAULT_PAGE_SIZE: usize = 0x200;

/// Page size for heap walks, where reads are mostly sequential
pub const HEAP_PAGE_SIZE: usize = 0x10000;

/// Decode a little-endian target pointer of the given width
pub fn decode_pointer(bytes: &[u8], pointer_size: usize) -> u64 {
    match pointer_size {
        4 => LE::read_u32(bytes) as u64,
        _ => LE::read_u64(bytes),
    }
}

/// Reads through a single-page cache
///
/// `None` means the value is not available (unmapped, truncated dump, or a
/// failed read); it is never an error the caller has to propagate.
pub trait PageCache {
    /// Pointer width of the target in bytes
    fn pointer_size(&self) -> usize;

    /// Make sure `address` is inside the cached page, refilling if needed
    fn ensure_cached(&mut self, address: u64) -> bool;

    /// Read a target pointer, widened to u64
    fn read_ptr(&mut self, address: u64) -> Option<u64>;

    /// Read a little-endian u32
    fn read_u32(&mut self, address: u64) -> Option<u32>;

    /// Read a block of bytes without touching the cached page
    fn read_bytes(&mut self, address: u64, size: usize) -> Option<Vec<u8>>;

    /// Drop the cached page
    fn clear(&mut self);
}

/// One cached window of target memory
///
/// `data.len()` is the number of valid bytes, which is shorter than the
/// requested page size when the read ran into unmapped memory.
#[derive(Debug, Default)]
pub(crate) struct Page {
    pub base: u64,
    pub data: Vec<u8>,
}

impl Page {
    pub fn end(&self) -> u64 {
        self.base + self.data.len() as u64
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.base && address < self.end()
    }

    /// Bytes for `[address, address + len)` if they are all inside the page
    pub fn slice(&self, address: u64, len: usize) -> Option<&[u8]> {
        if address < self.base {
            return None;
        }
        let offset = usize::try_from(address - self.base).ok()?;
        self.data.get(offset..offset.checked_add(len)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_pointer() {
        let bytes = [0x88, 0x77, 0x66, 0x55, 0x44, 0x33, 0x22, 0x11];
        assert_eq!(decode_pointer(&bytes, 4), 0x5566_7788);
        assert_eq!(decode_pointer(&bytes, 8), 0x1122_3344_5566_7788);
    }

    #[test]
    fn test_page_slice_bounds() {
        let page = Page {
            base: 0x1000,
            data: vec![0; 16],
        };
        assert!(page.contains(0x1000));
        assert!(!page.contains(0x1010));
        assert!(page.slice(0x1008, 8).is_some());
        assert!(page.slice(0x100c, 8).is_none());
        assert!(page.slice(0xff8, 8).is_none());
        assert!(Page::default().slice(0, 1).is_none());
    }
}
