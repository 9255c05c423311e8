//! Segments and sub-heaps

use crate::request::{HeapDetails, SegmentData, GENERATION_COUNT};

use serde::Serialize;
use std::collections::BTreeMap;

/// Generation number reported for objects on the large object heap
pub const LARGE_OBJECT_GENERATION: i32 = 3;

/// Round an object size up to the allocator's alignment
///
/// Small objects align to the pointer size (4 or 8); large objects always
/// align to 8, even on 32-bit targets.
pub fn align_object_size(size: u64, large: bool, pointer_size: usize) -> u64 {
    let mask: u64 = if large || pointer_size == 8 { 7 } else { 3 };
    size.saturating_add(mask) & !mask
}

/// Smallest object the allocator ever produces
pub fn min_object_size(pointer_size: usize) -> u64 {
    3 * pointer_size as u64
}

/// A contiguous range of object memory owned by one sub-heap
///
/// Generation boundaries satisfy
/// `start <= gen2_start <= gen1_start <= gen0_start <= end`. Only the
/// ephemeral segment has non-empty generation 0 and 1 ranges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Segment {
    /// Address of the runtime's segment descriptor
    pub address: u64,
    pub start: u64,
    /// End of allocated objects
    pub end: u64,
    pub committed_end: u64,
    pub reserved_end: u64,
    pub gen0_start: u64,
    pub gen1_start: u64,
    pub gen2_start: u64,
    pub large: bool,
    pub ephemeral: bool,
    /// Index of the owning sub-heap
    pub heap_index: usize,
}

impl Segment {
    /// Build a segment from backend data
    ///
    /// Boundaries that come back out of order are clamped into place.
    pub fn from_data(
        data: &SegmentData,
        heap: &HeapDetails,
        heap_index: usize,
        large: bool,
    ) -> Self {
        let ephemeral = !large && data.segment_addr == heap.ephemeral_heap_segment;

        let start = data.mem;
        let end = if ephemeral {
            heap.alloc_allocated
        } else {
            data.allocated
        }
        .max(start);

        let (gen1_start, gen0_start) = if ephemeral {
            let gen1 = heap.generations[1].allocation_start.clamp(start, end);
            let gen0 = heap.generations[0].allocation_start.clamp(gen1, end);
            (gen1, gen0)
        } else {
            (end, end)
        };

        Self {
            address: data.segment_addr,
            start,
            end,
            committed_end: data.committed,
            reserved_end: data.reserved,
            gen0_start,
            gen1_start,
            gen2_start: start,
            large,
            ephemeral,
            heap_index,
        }
    }

    pub fn length(&self) -> u64 {
        self.end - self.start
    }

    pub fn contains(&self, address: u64) -> bool {
        address >= self.start && address < self.end
    }

    pub fn gen0_length(&self) -> u64 {
        self.end - self.gen0_start
    }

    pub fn gen1_length(&self) -> u64 {
        self.gen0_start - self.gen1_start
    }

    /// Bytes below generation 1 (generation 2, or the whole large segment)
    pub fn gen2_length(&self) -> u64 {
        self.gen1_start - self.gen2_start
    }

    /// Objects are never read at or past this address
    pub fn object_limit(&self) -> u64 {
        self.end.min(self.committed_end)
    }

    /// Address of the first object, if the segment holds any
    pub fn first_object(&self) -> Option<u64> {
        (self.gen2_start < self.object_limit()).then_some(self.gen2_start)
    }

    /// Generation of an address inside this segment, -1 if outside
    pub fn generation_of(&self, address: u64) -> i32 {
        if !self.contains(address) {
            return -1;
        }
        if self.large {
            return LARGE_OBJECT_GENERATION;
        }
        if address >= self.gen0_start {
            0
        } else if address >= self.gen1_start {
            1
        } else {
            2
        }
    }
}

/// One logical GC heap (one per process in workstation mode)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubHeap {
    pub index: usize,
    /// Runtime address of the heap (0 in workstation mode)
    pub address: u64,
    pub first_segment: u64,
    pub first_large_segment: u64,
    pub ephemeral_segment: u64,
    pub generation_starts: [u64; GENERATION_COUNT],
    /// Allocation contexts: reserved space with no objects yet, start -> limit
    pub alloc_contexts: BTreeMap<u64, u64>,
}

impl SubHeap {
    pub fn new(index: usize, details: &HeapDetails) -> Self {
        let mut generation_starts = [0; GENERATION_COUNT];
        for (start, generation) in generation_starts.iter_mut().zip(&details.generations) {
            *start = generation.allocation_start;
        }

        Self {
            index,
            address: details.heap_addr,
            first_segment: details.first_segment(),
            first_large_segment: details.first_large_segment(),
            ephemeral_segment: details.ephemeral_heap_segment,
            generation_starts,
            alloc_contexts: BTreeMap::new(),
        }
    }

    /// Record an allocation context; empty or inverted ranges are ignored
    pub fn add_alloc_context(&mut self, ptr: u64, limit: u64) -> bool {
        if ptr == 0 || limit <= ptr {
            return false;
        }
        self.alloc_contexts.insert(ptr, limit);
        true
    }

    /// The allocation context containing `address`, as (start, limit)
    pub fn alloc_context_at(&self, address: u64) -> Option<(u64, u64)> {
        self.alloc_contexts
            .range(..=address)
            .next_back()
            .filter(|(_, &limit)| address < limit)
            .map(|(&start, &limit)| (start, limit))
    }
}
