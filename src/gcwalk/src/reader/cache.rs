//! Single-page memory reader

use super::{decode_pointer, Page, PageCache};
use crate::source::MemorySource;
use crate::target::{RevisionWatch, Target};
use crate::{check_pointer_size, Error, Result};

use byteorder::{ByteOrder, LE};
use std::sync::Arc;

/// Synchronous single-page cache over a memory source
pub struct MemoryReader {
    source: Arc<dyn MemorySource>,
    pointer_size: usize,
    page_size: usize,
    page: Page,
    /// Set when built from a target; a flush empties the page
    revision: Option<RevisionWatch>,
}

impl MemoryReader {
    /// Create a reader using the source's own pointer width
    pub fn new(source: Arc<dyn MemorySource>, page_size: usize) -> Result<Self> {
        let pointer_size = source.pointer_size();
        Self::with_pointer_size(source, pointer_size, page_size)
    }

    /// Create a reader for a caller that assumes `pointer_size`
    ///
    /// Fails if the source disagrees with that assumption.
    pub fn with_pointer_size(
        source: Arc<dyn MemorySource>,
        pointer_size: usize,
        page_size: usize,
    ) -> Result<Self> {
        check_pointer_size(pointer_size)?;
        if source.pointer_size() != pointer_size {
            return Err(Error::ArchitectureMismatch {
                reader: pointer_size,
                target: source.pointer_size(),
            });
        }
        if page_size < pointer_size {
            return Err(Error::Config(format!(
                "page size {} is smaller than a pointer",
                page_size
            )));
        }

        Ok(Self {
            source,
            pointer_size,
            page_size,
            page: Page::default(),
            revision: None,
        })
    }

    /// Create a reader over a target's memory
    ///
    /// The cached page is dropped whenever the target is flushed.
    pub fn for_target(target: &Target, page_size: usize) -> Result<Self> {
        let mut reader =
            Self::with_pointer_size(target.source().clone(), target.pointer_size(), page_size)?;
        reader.revision = Some(target.watch());
        Ok(reader)
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Start of the cached window and number of valid bytes in it
    pub fn page_range(&self) -> (u64, usize) {
        (self.page.base, self.page.data.len())
    }

    /// Drop the cached page if the target was flushed since it was read
    fn sync_revision(&mut self) {
        if let Some(watch) = self.revision.as_mut() {
            if watch.changed() {
                tracing::debug!("Target flushed, dropping page at {:#x}", self.page.base);
                self.page = Page::default();
            }
        }
    }

    /// Replace the cached page with one starting at `address`
    ///
    /// A failed read leaves the window empty.
    fn move_to_page(&mut self, address: u64) -> bool {
        self.page.base = address;
        self.page.data = match self.source.read_bytes(address, self.page_size) {
            Ok(data) => data,
            Err(_) => Vec::new(),
        };
        !self.page.data.is_empty()
    }

    /// Serve `len` bytes at `address`, refilling or falling back to an uncached read
    fn read_with<T>(
        &mut self,
        address: u64,
        len: usize,
        decode: impl Fn(&[u8]) -> T,
    ) -> Option<T> {
        self.sync_revision();
        if let Some(bytes) = self.page.slice(address, len) {
            return Some(decode(bytes));
        }

        self.move_to_page(address);
        if let Some(bytes) = self.page.slice(address, len) {
            return Some(decode(bytes));
        }

        // The page came back short; read just this field.
        self.source
            .read_exact(address, len)
            .ok()
            .map(|bytes| decode(&bytes))
    }
}

impl PageCache for MemoryReader {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn ensure_cached(&mut self, address: u64) -> bool {
        self.sync_revision();
        self.page.contains(address) || self.move_to_page(address)
    }

    fn read_ptr(&mut self, address: u64) -> Option<u64> {
        let size = self.pointer_size;
        self.read_with(address, size, |b| decode_pointer(b, size))
    }

    fn read_u32(&mut self, address: u64) -> Option<u32> {
        self.read_with(address, 4, LE::read_u32)
    }

    fn read_bytes(&mut self, address: u64, size: usize) -> Option<Vec<u8>> {
        self.sync_revision();
        if let Some(bytes) = self.page.slice(address, size) {
            return Some(bytes.to_vec());
        }
        self.source.read_exact(address, size).ok()
    }

    fn clear(&mut self) {
        self.page = Page::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{LiveMockSource, MockMemorySource};

    fn patterned(pointer_size: usize, base: u64, len: usize) -> Arc<MockMemorySource> {
        let mut source = MockMemorySource::new(pointer_size);
        source.map(base, (0..len).map(|i| (i * 7 + 3) as u8).collect());
        Arc::new(source)
    }

    #[test]
    fn test_reads_match_direct_reads_across_page_boundaries() {
        let source = patterned(8, 0x1000, 0x100);
        let mut reader = MemoryReader::new(source.clone(), 16).unwrap();

        for offset in (0..0xf8u64).step_by(3) {
            let addr = 0x1000 + offset;
            assert_eq!(
                reader.read_ptr(addr),
                source.read_ptr(addr).ok(),
                "pointer at {:#x}",
                addr
            );
            assert_eq!(reader.read_u32(addr), source.read_u32(addr).ok());
        }
    }

    #[test]
    fn test_reads_match_direct_reads_32bit() {
        let source = patterned(4, 0x2000, 0x40);
        let mut reader = MemoryReader::new(source.clone(), 8).unwrap();

        for addr in 0x2000..0x203c {
            assert_eq!(reader.read_ptr(addr), source.read_ptr(addr).ok());
        }
    }

    #[test]
    fn test_page_hits_do_not_touch_source() {
        let source = patterned(8, 0x1000, 0x1000);
        let mut reader = MemoryReader::new(source.clone(), 0x200).unwrap();

        reader.read_ptr(0x1000).unwrap();
        let after_fill = source.read_count();
        for addr in (0x1000..0x11f8).step_by(8) {
            reader.read_ptr(addr).unwrap();
        }
        assert_eq!(source.read_count(), after_fill);
        assert_eq!(reader.page_range(), (0x1000, 0x200));
    }

    #[test]
    fn test_short_page_falls_back_to_field_read() {
        let mut source = MockMemorySource::new(8);
        source.map(0x1000, vec![0xaa; 0x10]);
        source.map(0x1010, vec![0xbb; 0x10]);
        let source = Arc::new(source);
        let mut reader = MemoryReader::new(source.clone(), 0x40).unwrap();

        // The page at 0x100c stops at 0x1010, so an 8-byte read straddles ranges
        // and fails even uncached.
        assert_eq!(reader.read_ptr(0x100c), None);
        // A field entirely inside the short page is still served.
        assert_eq!(reader.read_u32(0x100c), Some(0xaaaa_aaaa));
    }

    #[test]
    fn test_failed_read_leaves_empty_window() {
        let source = patterned(8, 0x1000, 0x100);
        let mut reader = MemoryReader::new(source, 0x40).unwrap();

        assert_eq!(reader.read_ptr(0x9000), None);
        assert_eq!(reader.page_range(), (0x9000, 0));
        assert!(!reader.ensure_cached(0x9000));
        assert!(reader.ensure_cached(0x1000));
    }

    #[test]
    fn test_pointer_size_mismatch_is_rejected() {
        let source = patterned(8, 0x1000, 0x10);
        assert!(matches!(
            MemoryReader::with_pointer_size(source, 4, 0x200),
            Err(Error::ArchitectureMismatch {
                reader: 4,
                target: 8
            })
        ));
    }

    #[test]
    fn test_flush_drops_cached_page() {
        let mut memory = MockMemorySource::new(8);
        memory.map(0x1000, vec![0x11; 0x100]);
        let source = Arc::new(LiveMockSource::new(memory));
        let target = Target::new(source.clone()).unwrap();
        let mut reader = MemoryReader::for_target(&target, 0x40).unwrap();

        assert_eq!(reader.read_ptr(0x1000), Some(0x1111_1111_1111_1111));

        source.write(0x1000, &[0x22; 8]);
        // Without a flush the cached page is still served
        assert_eq!(reader.read_ptr(0x1000), Some(0x1111_1111_1111_1111));

        target.flush();
        assert_eq!(reader.read_ptr(0x1000), Some(0x2222_2222_2222_2222));
        assert_eq!(reader.read_ptr(0x1000), target.source().read_ptr(0x1000).ok());
    }

    #[test]
    fn test_read_bytes_and_clear() {
        let source = patterned(8, 0x1000, 0x100);
        let mut reader = MemoryReader::new(source.clone(), 0x40).unwrap();

        reader.ensure_cached(0x1000);
        assert_eq!(
            reader.read_bytes(0x1010, 4),
            source.read_exact(0x1010, 4).ok()
        );
        reader.clear();
        assert_eq!(reader.page_range(), (0, 0));
        assert_eq!(reader.read_bytes(0x10f0, 0x20), None);
    }
}
