//! Analysis Backend Requests
//!
//! Structural facts about the runtime (heaps, segments, threads, method
//! tables) come from an out-of-process analysis backend that speaks a narrow
//! protocol: a request id, an input byte buffer, an output byte buffer and an
//! integer status. This module serializes inputs and decodes outputs. It
//! knows nothing about how a heap is shaped.
//!
//! Any nonzero status, or a response shorter than the expected layout, is
//! reported as "no data" (`None`) rather than an error. Heap construction
//! treats missing data as the end of whatever chain it was following.

mod client;
mod layout;
mod records;

#[cfg(test)]
pub mod mock;

pub use client::DataClient;
pub use layout::{FieldReader, Layout};
pub use records::{
    GcHeapData, GenerationData, HeapDetails, MethodTableData, SegmentData, ThreadData,
    ThreadStoreData, UsefulGlobals, GENERATION_COUNT,
};

/// Status returned by a backend for a successful request
pub const S_OK: i32 = 0;

/// Generic failure status (`E_FAIL`)
pub const E_FAIL: i32 = 0x8000_4005_u32 as i32;

/// A backend that answers structural queries about the target runtime
pub trait DataBackend {
    /// Issue request `id` with `input`, writing the response into `output`
    ///
    /// Returns `S_OK` on success. Any other value means no data is available.
    fn request(&self, id: u32, input: &[u8], output: &mut Vec<u8>) -> i32;
}

/// Request identifiers understood by the backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum RequestId {
    /// Server/workstation mode and sub-heap count; no input
    GcHeapData = 0xf000_0000,
    /// Addresses of every sub-heap (server mode); no input
    GcHeapList = 0xf000_0001,
    /// Details of one sub-heap; input is the heap address
    GcHeapDetails = 0xf000_0002,
    /// Details of the only heap in workstation mode; no input
    GcHeapStaticDetails = 0xf000_0003,
    /// One heap segment; input is the segment address
    SegmentData = 0xf000_0004,
    /// Thread list head; no input
    ThreadStoreData = 0xf000_0005,
    /// One managed thread; input is the thread address
    ThreadData = 0xf000_0006,
    /// Sizes and flags of a method table; input is the method table address
    MethodTableData = 0xf000_0007,
    /// UTF-16 type name of a method table; input is the method table address
    MethodTableName = 0xf000_0008,
    /// Well-known method tables; no input
    UsefulGlobals = 0xf000_0009,
}

impl RequestId {
    pub fn code(self) -> u32 {
        self as u32
    }
}

impl From<RequestId> for u32 {
    fn from(id: RequestId) -> Self {
        id.code()
    }
}

impl<T: DataBackend + ?Sized> DataBackend for std::rc::Rc<T> {
    fn request(&self, id: u32, input: &[u8], output: &mut Vec<u8>) -> i32 {
        (**self).request(id, input, output)
    }
}

impl<T: DataBackend + ?Sized> DataBackend for std::sync::Arc<T> {
    fn request(&self, id: u32, input: &[u8], output: &mut Vec<u8>) -> i32 {
        (**self).request(id, input, output)
    }
}
