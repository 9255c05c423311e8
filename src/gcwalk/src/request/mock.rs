//! Mock Analysis Backend
//!
//! Canned responses keyed by (request id, input bytes), plus encoders for
//! every record so tests can describe a runtime in typed terms.

use super::records::*;
use super::{DataBackend, RequestId, E_FAIL, S_OK};

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};

/// Little-endian record encoder, the inverse of `FieldReader`
pub struct FieldWriter {
    pub buf: Vec<u8>,
    pointer_size: usize,
}

impl FieldWriter {
    pub fn new(pointer_size: usize) -> Self {
        Self {
            buf: Vec::new(),
            pointer_size,
        }
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn ptr(&mut self, value: u64) -> &mut Self {
        match self.pointer_size {
            4 => self.buf.extend_from_slice(&(value as u32).to_le_bytes()),
            _ => self.buf.extend_from_slice(&value.to_le_bytes()),
        }
        self
    }
}

/// Records the mock knows how to encode
pub trait Encode {
    fn encode(&self, w: &mut FieldWriter);
}

impl Encode for GcHeapData {
    fn encode(&self, w: &mut FieldWriter) {
        w.u32(self.server_mode as u32)
            .u32(self.structures_valid as u32)
            .u32(self.heap_count)
            .u32(self.max_generation);
    }
}

impl Encode for HeapDetails {
    fn encode(&self, w: &mut FieldWriter) {
        w.ptr(self.heap_addr)
            .ptr(self.alloc_allocated)
            .ptr(self.ephemeral_heap_segment);
        for generation in &self.generations {
            w.ptr(generation.start_segment)
                .ptr(generation.allocation_start)
                .ptr(generation.alloc_context_ptr)
                .ptr(generation.alloc_context_limit);
        }
    }
}

impl Encode for SegmentData {
    fn encode(&self, w: &mut FieldWriter) {
        w.ptr(self.segment_addr)
            .ptr(self.mem)
            .ptr(self.allocated)
            .ptr(self.committed)
            .ptr(self.reserved)
            .ptr(self.used)
            .ptr(self.next)
            .ptr(self.gc_heap)
            .ptr(self.flags);
    }
}

impl Encode for ThreadStoreData {
    fn encode(&self, w: &mut FieldWriter) {
        w.u32(self.thread_count)
            .u32(0)
            .ptr(self.first_thread)
            .ptr(self.finalizer_thread);
    }
}

impl Encode for ThreadData {
    fn encode(&self, w: &mut FieldWriter) {
        w.u32(self.os_thread_id)
            .u32(self.state)
            .ptr(self.alloc_context_ptr)
            .ptr(self.alloc_context_limit)
            .ptr(self.next_thread);
    }
}

impl Encode for MethodTableData {
    fn encode(&self, w: &mut FieldWriter) {
        w.u32(self.base_size)
            .u32(self.component_size)
            .u32(self.flags)
            .u32(self.token)
            .ptr(self.module)
            .ptr(self.parent);
    }
}

impl Encode for UsefulGlobals {
    fn encode(&self, w: &mut FieldWriter) {
        w.ptr(self.array_mt)
            .ptr(self.string_mt)
            .ptr(self.object_mt)
            .ptr(self.exception_mt)
            .ptr(self.free_mt);
    }
}

/// In-memory analysis backend
pub struct MockRuntime {
    pointer_size: usize,
    responses: HashMap<(u32, Vec<u8>), Vec<u8>>,
    failing: HashSet<u32>,
    counts: RefCell<HashMap<u32, usize>>,
}

impl MockRuntime {
    pub fn new(pointer_size: usize) -> Self {
        Self {
            pointer_size,
            responses: HashMap::new(),
            failing: HashSet::new(),
            counts: Default::default(),
        }
    }

    /// Encode a target address the way the client does
    pub fn address(&self, address: u64) -> Vec<u8> {
        let mut w = FieldWriter::new(self.pointer_size);
        w.ptr(address);
        w.buf
    }

    fn encode(&self, record: &impl Encode) -> Vec<u8> {
        let mut w = FieldWriter::new(self.pointer_size);
        record.encode(&mut w);
        w.buf
    }

    /// Register a raw response
    pub fn respond(&mut self, id: RequestId, input: Vec<u8>, output: Vec<u8>) {
        self.responses.insert((id.code(), input), output);
    }

    /// Make every request with this id fail
    pub fn fail(&mut self, id: RequestId) {
        self.failing.insert(id.code());
    }

    pub fn gc_heap(&mut self, data: &GcHeapData) {
        let out = self.encode(data);
        self.respond(RequestId::GcHeapData, Vec::new(), out);
    }

    pub fn heap_list(&mut self, heaps: &[u64]) {
        let mut w = FieldWriter::new(self.pointer_size);
        for heap in heaps {
            w.ptr(*heap);
        }
        self.respond(RequestId::GcHeapList, Vec::new(), w.buf);
    }

    /// Register details for a server heap
    pub fn heap_details(&mut self, details: &HeapDetails) {
        let out = self.encode(details);
        let input = self.address(details.heap_addr);
        self.respond(RequestId::GcHeapDetails, input, out);
    }

    /// Register details for the workstation heap
    pub fn static_heap_details(&mut self, details: &HeapDetails) {
        let out = self.encode(details);
        self.respond(RequestId::GcHeapStaticDetails, Vec::new(), out);
    }

    pub fn segment(&mut self, data: &SegmentData) {
        let out = self.encode(data);
        let input = self.address(data.segment_addr);
        self.respond(RequestId::SegmentData, input, out);
    }

    pub fn thread_store(&mut self, data: &ThreadStoreData) {
        let out = self.encode(data);
        self.respond(RequestId::ThreadStoreData, Vec::new(), out);
    }

    pub fn thread(&mut self, address: u64, data: &ThreadData) {
        let out = self.encode(data);
        let input = self.address(address);
        self.respond(RequestId::ThreadData, input, out);
    }

    pub fn method_table(&mut self, mt: u64, data: &MethodTableData) {
        let out = self.encode(data);
        let input = self.address(mt);
        self.respond(RequestId::MethodTableData, input, out);
    }

    /// Register a NUL-terminated UTF-16 type name
    pub fn type_name(&mut self, mt: u64, name: &str) {
        let out = name
            .encode_utf16()
            .chain(std::iter::once(0))
            .flat_map(|u| u.to_le_bytes())
            .collect();
        let input = self.address(mt);
        self.respond(RequestId::MethodTableName, input, out);
    }

    pub fn useful_globals(&mut self, data: &UsefulGlobals) {
        let out = self.encode(data);
        self.respond(RequestId::UsefulGlobals, Vec::new(), out);
    }

    /// Total number of requests received
    pub fn calls(&self) -> usize {
        self.counts.borrow().values().sum()
    }

    /// Number of requests received with this id
    pub fn calls_for(&self, id: RequestId) -> usize {
        self.counts.borrow().get(&id.code()).copied().unwrap_or(0)
    }
}

impl DataBackend for MockRuntime {
    fn request(&self, id: u32, input: &[u8], output: &mut Vec<u8>) -> i32 {
        *self.counts.borrow_mut().entry(id).or_insert(0) += 1;

        if self.failing.contains(&id) {
            return E_FAIL;
        }

        match self.responses.get(&(id, input.to_vec())) {
            Some(response) => {
                output.extend_from_slice(response);
                S_OK
            }
            None => E_FAIL,
        }
    }
}
