//! Heap construction
//!
//! Collects sub-heaps, segment chains and allocation contexts from the
//! analysis backend. Missing data ends whatever chain was being followed;
//! the result is as much of the heap as could be read.

use super::segment::{Segment, SubHeap};
use crate::config::HeapConfig;
use crate::request::{DataClient, HeapDetails, GENERATION_COUNT};
use crate::{Error, Result};

use std::collections::HashSet;

/// Everything known about a heap's shape at one instant
pub(super) struct HeapLayout {
    pub server: bool,
    pub sub_heaps: Vec<SubHeap>,
    /// Sorted by start, non-overlapping
    pub segments: Vec<Segment>,
    pub total_heap_size: u64,
    pub size_by_generation: [u64; GENERATION_COUNT],
}

impl HeapLayout {
    pub fn collect(client: &DataClient, config: &HeapConfig) -> Result<Self> {
        let data = client
            .gc_heap_data()
            .ok_or(Error::HeapUnavailable("no GC heap data"))?;

        if !data.structures_valid {
            tracing::warn!("GC structures are marked invalid; the heap may be mid-collection");
        }

        let details = collect_heap_details(client, data.server_mode, data.heap_count as usize)?;

        let mut sub_heaps = Vec::with_capacity(details.len());
        let mut segments = Vec::new();
        let mut seen = HashSet::new();

        for (index, heap) in details.iter().enumerate() {
            let mut sub_heap = SubHeap::new(index, heap);

            let chains = [
                (heap.first_large_segment(), true),
                (heap.first_segment(), false),
            ];
            for (head, large) in chains {
                walk_segment_chain(
                    client,
                    heap,
                    index,
                    head,
                    large,
                    config.max_segment_hops,
                    &mut seen,
                    &mut segments,
                );
            }

            let gen0 = &heap.generations[0];
            sub_heap.add_alloc_context(gen0.alloc_context_ptr, gen0.alloc_context_limit);
            sub_heaps.push(sub_heap);
        }

        segments.sort_by_key(|s| s.start);
        let segments = drop_overlapping(segments);

        assign_thread_contexts(client, config.max_thread_hops, &segments, &mut sub_heaps);

        let mut total_heap_size = 0;
        let mut size_by_generation = [0u64; GENERATION_COUNT];
        for seg in &segments {
            total_heap_size += seg.length();
            size_by_generation[0] += seg.gen0_length();
            size_by_generation[1] += seg.gen1_length();
            size_by_generation[if seg.large { 3 } else { 2 }] += seg.gen2_length();
        }

        tracing::info!(
            "Built {} heap: {} sub-heaps, {} segments, {:#x} bytes",
            if data.server_mode { "server" } else { "workstation" },
            sub_heaps.len(),
            segments.len(),
            total_heap_size
        );

        Ok(Self {
            server: data.server_mode,
            sub_heaps,
            segments,
            total_heap_size,
            size_by_generation,
        })
    }
}

/// Details for every sub-heap that answers
fn collect_heap_details(
    client: &DataClient,
    server: bool,
    count: usize,
) -> Result<Vec<HeapDetails>> {
    let details: Vec<HeapDetails> = if server {
        let heaps = client
            .heap_list(count)
            .ok_or(Error::HeapUnavailable("no server heap list"))?;
        heaps
            .into_iter()
            .filter_map(|heap| {
                let details = client.heap_details(heap);
                if details.is_none() {
                    tracing::warn!("No details for server heap {:#x}, skipping", heap);
                }
                details
            })
            .collect()
    } else {
        client.static_heap_details().into_iter().collect()
    };

    if details.is_empty() {
        return Err(Error::HeapUnavailable("no heap details"));
    }
    Ok(details)
}

/// Follow one segment linked list
///
/// Stops at a null link, a segment the backend cannot describe, a segment
/// already visited, or after `max_hops` segments.
#[allow(clippy::too_many_arguments)]
fn walk_segment_chain(
    client: &DataClient,
    heap: &HeapDetails,
    heap_index: usize,
    head: u64,
    large: bool,
    max_hops: usize,
    seen: &mut HashSet<u64>,
    out: &mut Vec<Segment>,
) {
    let mut addr = head;
    let mut hops = 0;

    while addr != 0 {
        if hops == max_hops {
            tracing::warn!(
                "Heap {} {} segment list exceeds {} entries, truncating",
                heap_index,
                if large { "large" } else { "small" },
                max_hops
            );
            break;
        }
        hops += 1;

        if !seen.insert(addr) {
            tracing::warn!("Segment {:#x} seen twice, list is corrupt", addr);
            break;
        }

        let Some(data) = client.segment_data(addr) else {
            tracing::debug!("No data for segment {:#x}, ending list", addr);
            break;
        };

        out.push(Segment::from_data(&data, heap, heap_index, large));
        addr = data.next;
    }
}

/// Drop segments that overlap an earlier one (input sorted by start)
fn drop_overlapping(segments: Vec<Segment>) -> Vec<Segment> {
    let mut kept: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        if let Some(prev) = kept.last() {
            if seg.start < prev.end {
                tracing::warn!(
                    "Segment {:#x}-{:#x} overlaps {:#x}-{:#x}, ignoring it",
                    seg.start,
                    seg.end,
                    prev.start,
                    prev.end
                );
                continue;
            }
        }
        kept.push(seg);
    }
    kept
}

/// Attach every thread's allocation context to the sub-heap that owns it
fn assign_thread_contexts(
    client: &DataClient,
    max_hops: usize,
    segments: &[Segment],
    sub_heaps: &mut [SubHeap],
) {
    let Some(store) = client.thread_store() else {
        tracing::debug!("No thread store; only heap allocation contexts are known");
        return;
    };

    let mut addr = store.first_thread;
    let mut seen = HashSet::new();

    while addr != 0 && seen.len() < max_hops {
        if !seen.insert(addr) {
            tracing::warn!("Thread {:#x} seen twice, thread list is corrupt", addr);
            break;
        }
        let Some(thread) = client.thread_data(addr) else {
            break;
        };

        let ptr = thread.alloc_context_ptr;
        let owner = segments
            .iter()
            .find(|s| !s.large && s.contains(ptr))
            .map(|s| s.heap_index)
            .or(if sub_heaps.len() == 1 { Some(0) } else { None });

        if let Some(sub_heap) = owner.and_then(|i| sub_heaps.get_mut(i)) {
            sub_heap.add_alloc_context(ptr, thread.alloc_context_limit);
        }

        addr = thread.next_thread;
    }
}
