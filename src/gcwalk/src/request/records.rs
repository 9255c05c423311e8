//! Backend response records
//!
//! `P` below is the target pointer width.

use super::layout::{FieldReader, Layout};

/// Generations 0, 1, 2 and the large object heap
pub const GENERATION_COUNT: usize = 4;

/// Heap mode and sub-heap count
///
/// Layout: server_mode u32, structures_valid u32, heap_count u32, max_generation u32
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GcHeapData {
    pub server_mode: bool,
    /// False while the runtime is in the middle of a GC
    pub structures_valid: bool,
    pub heap_count: u32,
    pub max_generation: u32,
}

impl Layout for GcHeapData {
    fn size(_pointer_size: usize) -> usize {
        16
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        Some(Self {
            server_mode: fields.bool32()?,
            structures_valid: fields.bool32()?,
            heap_count: fields.u32()?,
            max_generation: fields.u32()?,
        })
    }
}

/// One entry of a heap's generation table
///
/// Layout: start_segment P, allocation_start P, alloc_context_ptr P, alloc_context_limit P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GenerationData {
    pub start_segment: u64,
    pub allocation_start: u64,
    pub alloc_context_ptr: u64,
    pub alloc_context_limit: u64,
}

impl Layout for GenerationData {
    fn size(pointer_size: usize) -> usize {
        4 * pointer_size
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        Some(Self {
            start_segment: fields.ptr()?,
            allocation_start: fields.ptr()?,
            alloc_context_ptr: fields.ptr()?,
            alloc_context_limit: fields.ptr()?,
        })
    }
}

/// One sub-heap
///
/// Layout: heap_addr P, alloc_allocated P, ephemeral_heap_segment P,
/// then `GENERATION_COUNT` generation entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HeapDetails {
    pub heap_addr: u64,
    /// Allocation high-water mark of the ephemeral segment
    pub alloc_allocated: u64,
    pub ephemeral_heap_segment: u64,
    pub generations: [GenerationData; GENERATION_COUNT],
}

impl HeapDetails {
    /// Head of the regular segment list
    pub fn first_segment(&self) -> u64 {
        self.generations[2].start_segment
    }

    /// Head of the large object segment list
    pub fn first_large_segment(&self) -> u64 {
        self.generations[3].start_segment
    }
}

impl Layout for HeapDetails {
    fn size(pointer_size: usize) -> usize {
        3 * pointer_size + GENERATION_COUNT * GenerationData::size(pointer_size)
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        let heap_addr = fields.ptr()?;
        let alloc_allocated = fields.ptr()?;
        let ephemeral_heap_segment = fields.ptr()?;

        let mut generations = [GenerationData::default(); GENERATION_COUNT];
        for generation in generations.iter_mut() {
            *generation = GenerationData::decode(fields)?;
        }

        Some(Self {
            heap_addr,
            alloc_allocated,
            ephemeral_heap_segment,
            generations,
        })
    }
}

/// One heap segment
///
/// Layout: segment_addr P, mem P, allocated P, committed P, reserved P,
/// used P, next P, gc_heap P, flags P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SegmentData {
    pub segment_addr: u64,
    /// First byte of object memory
    pub mem: u64,
    pub allocated: u64,
    pub committed: u64,
    pub reserved: u64,
    pub used: u64,
    pub next: u64,
    pub gc_heap: u64,
    pub flags: u64,
}

impl Layout for SegmentData {
    fn size(pointer_size: usize) -> usize {
        9 * pointer_size
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        Some(Self {
            segment_addr: fields.ptr()?,
            mem: fields.ptr()?,
            allocated: fields.ptr()?,
            committed: fields.ptr()?,
            reserved: fields.ptr()?,
            used: fields.ptr()?,
            next: fields.ptr()?,
            gc_heap: fields.ptr()?,
            flags: fields.ptr()?,
        })
    }
}

/// Head of the managed thread list
///
/// Layout: thread_count u32, reserved u32, first_thread P, finalizer_thread P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadStoreData {
    pub thread_count: u32,
    pub first_thread: u64,
    pub finalizer_thread: u64,
}

impl Layout for ThreadStoreData {
    fn size(pointer_size: usize) -> usize {
        8 + 2 * pointer_size
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        let thread_count = fields.u32()?;
        let _reserved = fields.u32()?;
        Some(Self {
            thread_count,
            first_thread: fields.ptr()?,
            finalizer_thread: fields.ptr()?,
        })
    }
}

/// One managed thread
///
/// Layout: os_thread_id u32, state u32, alloc_context_ptr P,
/// alloc_context_limit P, next_thread P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ThreadData {
    pub os_thread_id: u32,
    pub state: u32,
    pub alloc_context_ptr: u64,
    pub alloc_context_limit: u64,
    pub next_thread: u64,
}

impl Layout for ThreadData {
    fn size(pointer_size: usize) -> usize {
        8 + 3 * pointer_size
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        Some(Self {
            os_thread_id: fields.u32()?,
            state: fields.u32()?,
            alloc_context_ptr: fields.ptr()?,
            alloc_context_limit: fields.ptr()?,
            next_thread: fields.ptr()?,
        })
    }
}

/// Size and layout facts for one method table
///
/// Layout: base_size u32, component_size u32, flags u32, token u32, module P, parent P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MethodTableData {
    pub base_size: u32,
    /// Per-element size for arrays and strings, 0 otherwise
    pub component_size: u32,
    pub flags: u32,
    pub token: u32,
    pub module: u64,
    pub parent: u64,
}

impl MethodTableData {
    pub const FLAG_CONTAINS_POINTERS: u32 = 0x1;
    pub const FLAG_FREE: u32 = 0x2;

    pub fn contains_pointers(&self) -> bool {
        self.flags & Self::FLAG_CONTAINS_POINTERS != 0
    }

    pub fn is_free(&self) -> bool {
        self.flags & Self::FLAG_FREE != 0
    }
}

impl Layout for MethodTableData {
    fn size(pointer_size: usize) -> usize {
        16 + 2 * pointer_size
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        Some(Self {
            base_size: fields.u32()?,
            component_size: fields.u32()?,
            flags: fields.u32()?,
            token: fields.u32()?,
            module: fields.ptr()?,
            parent: fields.ptr()?,
        })
    }
}

/// Well-known method tables
///
/// Layout: array_mt P, string_mt P, object_mt P, exception_mt P, free_mt P
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct UsefulGlobals {
    pub array_mt: u64,
    pub string_mt: u64,
    pub object_mt: u64,
    pub exception_mt: u64,
    /// Method table stamped on free (unused) heap blocks
    pub free_mt: u64,
}

impl Layout for UsefulGlobals {
    fn size(pointer_size: usize) -> usize {
        5 * pointer_size
    }

    fn decode(fields: &mut FieldReader<'_>) -> Option<Self> {
        Some(Self {
            array_mt: fields.ptr()?,
            string_mt: fields.ptr()?,
            object_mt: fields.ptr()?,
            exception_mt: fields.ptr()?,
            free_mt: fields.ptr()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode<T: Layout>(data: &[u8], pointer_size: usize) -> Option<T> {
        T::decode(&mut FieldReader::new(data, pointer_size))
    }

    #[test]
    fn test_heap_details_size_matches_decode() {
        for pointer_size in [4, 8] {
            let size = HeapDetails::size(pointer_size);
            let data = vec![0u8; size];
            let mut fields = FieldReader::new(&data, pointer_size);
            assert!(HeapDetails::decode(&mut fields).is_some());
            assert_eq!(fields.position(), size);
            assert!(decode::<HeapDetails>(&data[..size - 1], pointer_size).is_none());
        }
    }

    #[test]
    fn test_segment_data_32bit() {
        let mut data = Vec::new();
        for value in 1u32..=9 {
            data.extend_from_slice(&(value * 0x1000).to_le_bytes());
        }
        let seg: SegmentData = decode(&data, 4).unwrap();
        assert_eq!(seg.segment_addr, 0x1000);
        assert_eq!(seg.mem, 0x2000);
        assert_eq!(seg.next, 0x7000);
        assert_eq!(seg.flags, 0x9000);
    }

    #[test]
    fn test_method_table_flags() {
        let mt = MethodTableData {
            flags: MethodTableData::FLAG_CONTAINS_POINTERS,
            ..Default::default()
        };
        assert!(mt.contains_pointers());
        assert!(!mt.is_free());
    }

    #[test]
    fn test_heap_details_segment_heads() {
        let mut details = HeapDetails::default();
        details.generations[2].start_segment = 0x100;
        details.generations[3].start_segment = 0x200;
        assert_eq!(details.first_segment(), 0x100);
        assert_eq!(details.first_large_segment(), 0x200);
    }
}
