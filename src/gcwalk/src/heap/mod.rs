//! Heap model
//!
//! A [`Heap`] is a snapshot of the GC heap taken at one revision of the
//! target: its sub-heaps, segments and generation boundaries. It never
//! changes after construction. Every query checks the target's revision
//! first and fails with [`Error::StaleHeap`] once the target has been
//! flushed; build a new heap to continue.

mod builder;
mod objects;
pub mod segment;
pub mod types;

pub use objects::Objects;
pub use segment::{Segment, SubHeap};
pub use types::TypeInfo;

use builder::HeapLayout;
use types::{untag_method_table, TypeCache};

use crate::config::HeapConfig;
use crate::gcdesc::ObjectReference;
use crate::reader::{MemoryReader, PageCache, PrefetchReader};
use crate::request::{DataClient, UsefulGlobals, GENERATION_COUNT};
use crate::target::Target;
use crate::{Error, Result};

use serde::Serialize;
use std::cell::{Cell, RefCell};
use std::sync::Arc;

/// Serializable overview of a heap
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HeapSummary {
    pub server: bool,
    pub heap_count: usize,
    pub segment_count: usize,
    pub total_heap_size: u64,
    pub size_by_generation: [u64; GENERATION_COUNT],
    pub revision: u64,
}

/// The reconstructed GC heap of one target
pub struct Heap {
    target: Arc<Target>,
    client: DataClient,
    config: HeapConfig,
    revision: u64,
    layout: HeapLayout,
    globals: Option<UsefulGlobals>,
    types: TypeCache,
    /// Small-page reader for type descriptors and single-object queries
    reader: RefCell<MemoryReader>,
    /// Index of the last segment matched by `segment_for`
    last_segment: Cell<usize>,
}

impl Heap {
    /// Query the backend and assemble the heap
    ///
    /// Fails if the backend has no usable heap data or disagrees with the
    /// target about pointer width. Corrupt segment or thread lists only
    /// truncate the result.
    pub fn build(target: Arc<Target>, client: DataClient, config: &HeapConfig) -> Result<Self> {
        config.validate()?;
        if client.pointer_size() != target.pointer_size() {
            return Err(Error::ArchitectureMismatch {
                reader: client.pointer_size(),
                target: target.pointer_size(),
            });
        }

        let revision = target.revision();
        let layout = HeapLayout::collect(&client, config)?;
        let globals = client.useful_globals();
        let types = TypeCache::new(globals.map(|g| g.free_mt).unwrap_or(0));
        let reader = MemoryReader::for_target(&target, config.page_size)?;

        Ok(Self {
            target,
            client,
            config: config.clone(),
            revision,
            layout,
            globals,
            types,
            reader: RefCell::new(reader),
            last_segment: Cell::new(0),
        })
    }

    fn check(&self) -> Result<()> {
        let current = self.target.revision();
        if current != self.revision {
            return Err(Error::StaleHeap {
                heap: self.revision,
                target: current,
            });
        }
        Ok(())
    }

    /// Target revision this heap was built at
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn target(&self) -> &Arc<Target> {
        &self.target
    }

    pub fn is_server(&self) -> Result<bool> {
        self.check()?;
        Ok(self.layout.server)
    }

    pub fn sub_heaps(&self) -> Result<&[SubHeap]> {
        self.check()?;
        Ok(&self.layout.sub_heaps)
    }

    /// All segments, sorted by start address
    pub fn segments(&self) -> Result<&[Segment]> {
        self.check()?;
        Ok(&self.layout.segments)
    }

    /// Well-known method tables, if the backend provided them
    pub fn globals(&self) -> Result<Option<&UsefulGlobals>> {
        self.check()?;
        Ok(self.globals.as_ref())
    }

    /// The segment containing `address`
    pub fn segment_for(&self, address: u64) -> Result<Option<&Segment>> {
        self.check()?;
        Ok(self.find_segment(address).map(|i| &self.layout.segments[i]))
    }

    /// Circular scan from the last hit; walks tend to ask in address order
    fn find_segment(&self, address: u64) -> Option<usize> {
        let segments = &self.layout.segments;
        if segments.is_empty() {
            return None;
        }

        let start = self.last_segment.get().min(segments.len() - 1);
        for step in 0..segments.len() {
            let i = (start + step) % segments.len();
            if segments[i].contains(address) {
                self.last_segment.set(i);
                return Some(i);
            }
        }
        None
    }

    /// Generation of `address`: 0-2, 3 for large objects, -1 if not on the heap
    pub fn generation(&self, address: u64) -> Result<i32> {
        self.check()?;
        Ok(self
            .find_segment(address)
            .map_or(-1, |i| self.layout.segments[i].generation_of(address)))
    }

    pub fn total_heap_size(&self) -> Result<u64> {
        self.check()?;
        Ok(self.layout.total_heap_size)
    }

    /// Bytes in one generation (3 is the large object heap); 0 for any other
    pub fn size_by_generation(&self, generation: usize) -> Result<u64> {
        self.check()?;
        Ok(self
            .layout
            .size_by_generation
            .get(generation)
            .copied()
            .unwrap_or(0))
    }

    /// Every object on the heap
    pub fn objects(&self) -> Result<Objects<'_>> {
        self.check()?;
        Ok(Objects::new(self, self.walk_reader()?, 0..self.layout.segments.len()))
    }

    /// Objects of the segment at `index` in [`Heap::segments`]
    pub fn segment_objects(&self, index: usize) -> Result<Objects<'_>> {
        self.check()?;
        let range = if index < self.layout.segments.len() {
            index..index + 1
        } else {
            0..0
        };
        Ok(Objects::new(self, self.walk_reader()?, range))
    }

    /// A fresh large-page reader for one object walk
    fn walk_reader(&self) -> Result<Box<dyn PageCache>> {
        let page_size = self.config.heap_page_size;
        Ok(if self.config.prefetch {
            Box::new(PrefetchReader::for_target(&self.target, page_size)?)
        } else {
            Box::new(MemoryReader::for_target(&self.target, page_size)?)
        })
    }

    fn resolve_type(&self, method_table: u64) -> Option<Arc<TypeInfo>> {
        let mut reader = self.reader.borrow_mut();
        self.types.resolve(method_table, &self.client, &mut *reader)
    }

    fn type_at(&self, address: u64) -> Option<Arc<TypeInfo>> {
        let raw = self.reader.borrow_mut().read_ptr(address)?;
        self.resolve_type(untag_method_table(raw))
    }

    /// Type of the object at `address`
    pub fn object_type(&self, address: u64) -> Result<Option<Arc<TypeInfo>>> {
        self.check()?;
        Ok(self.type_at(address))
    }

    /// Unaligned size of the object at `address`
    pub fn object_size(&self, address: u64) -> Result<Option<u64>> {
        self.check()?;
        Ok(self
            .type_at(address)
            .and_then(|info| info.object_size(&mut *self.reader.borrow_mut(), address)))
    }

    /// Whether `address` holds a free block rather than a live object
    pub fn is_free(&self, address: u64) -> Result<bool> {
        self.check()?;
        Ok(self.type_at(address).is_some_and(|info| info.is_free))
    }

    pub fn type_name(&self, method_table: u64) -> Result<Option<String>> {
        self.check()?;
        Ok(self.client.method_table_name(method_table))
    }

    /// Read one target pointer
    pub fn read_pointer(&self, address: u64) -> Result<Option<u64>> {
        self.check()?;
        Ok(self.reader.borrow_mut().read_ptr(address))
    }

    /// Report each nonzero reference held by the object at `address`
    ///
    /// The callback receives the referenced address and the slot offset. It
    /// may query the heap. Objects whose type or size cannot be read report
    /// nothing.
    pub fn walk_references(
        &self,
        address: u64,
        mut callback: impl FnMut(u64, u64),
    ) -> Result<()> {
        for r in self.object_references(address)? {
            callback(r.target, r.offset);
        }
        Ok(())
    }

    pub fn object_references(&self, address: u64) -> Result<Vec<ObjectReference>> {
        self.check()?;

        let Some(info) = self.type_at(address) else {
            return Ok(Vec::new());
        };
        let Some(desc) = info.gc_desc.as_ref().filter(|_| info.contains_pointers) else {
            return Ok(Vec::new());
        };

        let mut reader = self.reader.borrow_mut();
        Ok(info
            .object_size(&mut *reader, address)
            .map(|size| desc.references(address, size, &mut *reader))
            .unwrap_or_default())
    }

    pub fn summary(&self) -> Result<HeapSummary> {
        self.check()?;
        Ok(HeapSummary {
            server: self.layout.server,
            heap_count: self.layout.sub_heaps.len(),
            segment_count: self.layout.segments.len(),
            total_heap_size: self.layout.total_heap_size,
            size_by_generation: self.layout.size_by_generation,
            revision: self.revision,
        })
    }
}

impl std::fmt::Debug for Heap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Heap")
            .field("revision", &self.revision)
            .field("server", &self.layout.server)
            .field("segments", &self.layout.segments.len())
            .field("types", &self.types.len())
            .finish()
    }
}
