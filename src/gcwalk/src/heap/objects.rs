//! Object iteration
//!
//! Objects are laid out back to back inside a segment. The next object is
//! found by sizing the current one from its type, except where a thread's
//! allocation context reserves space that holds no objects yet.

use super::segment::{align_object_size, min_object_size, Segment};
use super::types::untag_method_table;
use super::Heap;
use crate::reader::PageCache;
use crate::Result;

use std::ops::Range;

/// Lazy walk over heap objects, in increasing address order per segment
///
/// Yields `Err(StaleHeap)` once if the target is flushed mid-walk, then ends.
pub struct Objects<'h> {
    heap: &'h Heap,
    reader: Box<dyn PageCache>,
    segments: Range<usize>,
    /// Segment index and the object to yield next
    current: Option<(usize, u64)>,
    done: bool,
}

impl<'h> Objects<'h> {
    pub(super) fn new(heap: &'h Heap, reader: Box<dyn PageCache>, segments: Range<usize>) -> Self {
        Self {
            heap,
            reader,
            segments,
            current: None,
            done: false,
        }
    }
}

impl Iterator for Objects<'_> {
    type Item = Result<u64>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Err(e) = self.heap.check() {
            self.done = true;
            return Some(Err(e));
        }

        loop {
            if let Some((index, obj)) = self.current.take() {
                let segment = &self.heap.layout.segments[index];
                self.current = self
                    .heap
                    .next_object(self.reader.as_mut(), segment, obj)
                    .map(|next| (index, next));
                return Some(Ok(obj));
            }

            let Some(index) = self.segments.next() else {
                self.done = true;
                return None;
            };
            let segment = &self.heap.layout.segments[index];
            self.current = self
                .heap
                .first_object(self.reader.as_mut(), segment)
                .map(|obj| (index, obj));
        }
    }
}

impl std::iter::FusedIterator for Objects<'_> {}

impl Heap {
    /// First object of a segment, if it holds one
    pub(super) fn first_object(
        &self,
        reader: &mut dyn PageCache,
        segment: &Segment,
    ) -> Option<u64> {
        let obj = segment.first_object()?;
        has_method_table(reader, obj).then_some(obj)
    }

    /// The object following `obj`, or `None` at the end of the segment
    ///
    /// Always returns an address greater than `obj`.
    pub(super) fn next_object(
        &self,
        reader: &mut dyn PageCache,
        segment: &Segment,
        obj: u64,
    ) -> Option<u64> {
        let limit = segment.object_limit();
        if obj >= limit {
            return None;
        }

        let ps = reader.pointer_size();
        let mt = untag_method_table(reader.read_ptr(obj)?);
        let Some(info) = self.resolve_type(mt) else {
            tracing::warn!(
                "Object {:#x} has unresolvable type {:#x}, ending segment walk",
                obj,
                mt
            );
            return None;
        };

        let min_size = min_object_size(ps);
        let raw_size = info.object_size(reader, obj)?;
        let size = align_object_size(raw_size, segment.large, ps).max(min_size);
        let mut next = obj.checked_add(size)?;

        if !segment.large {
            let sub_heap = self.layout.sub_heaps.get(segment.heap_index)?;
            while next < limit {
                let Some((_, hole_limit)) = sub_heap.alloc_context_at(next) else {
                    break;
                };
                let skipped = hole_limit.saturating_add(align_object_size(min_size, false, ps));
                if skipped <= next {
                    tracing::warn!(
                        "Allocation context at {:#x} does not advance, ending segment walk",
                        next
                    );
                    return None;
                }
                next = skipped;
            }
        }

        if next >= limit || !has_method_table(reader, next) {
            return None;
        }
        Some(next)
    }
}

/// Whether `address` starts with a nonzero method table
fn has_method_table(reader: &mut dyn PageCache, address: u64) -> bool {
    reader
        .read_ptr(address)
        .map(untag_method_table)
        .is_some_and(|mt| mt != 0)
}
