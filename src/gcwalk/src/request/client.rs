//! Typed request client

use super::layout::{FieldReader, Layout};
use super::records::*;
use super::{DataBackend, RequestId, S_OK};
use crate::{check_pointer_size, Result};

use byteorder::{ByteOrder, LE};
use widestring::{U16CStr, U16Str};

/// Longest type name requested, in UTF-16 units
const MAX_NAME_UNITS: usize = 1024;

/// Serializes requests to a backend and decodes typed responses
pub struct DataClient {
    backend: Box<dyn DataBackend>,
    pointer_size: usize,
}

impl DataClient {
    pub fn new(backend: impl DataBackend + 'static, pointer_size: usize) -> Result<Self> {
        Ok(Self {
            backend: Box::new(backend),
            pointer_size: check_pointer_size(pointer_size)?,
        })
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Encode a target address as request input
    pub fn address_input(&self, address: u64) -> Vec<u8> {
        let mut buf = vec![0u8; self.pointer_size];
        match self.pointer_size {
            4 => LE::write_u32(&mut buf, address as u32),
            _ => LE::write_u64(&mut buf, address),
        }
        buf
    }

    /// Issue a request and return the raw response, `None` on a failure status
    pub fn request_raw(&self, id: RequestId, input: &[u8], capacity: usize) -> Option<Vec<u8>> {
        let mut output = Vec::with_capacity(capacity);
        let status = self.backend.request(id.code(), input, &mut output);
        if status != S_OK {
            tracing::debug!("Request {:?} failed with status {:#010x}", id, status);
            return None;
        }
        Some(output)
    }

    /// Issue a request and decode a fixed-layout record
    ///
    /// A response shorter than the record's layout is treated as a failure.
    pub fn request_struct<T: Layout>(&self, id: RequestId, input: &[u8]) -> Option<T> {
        let size = T::size(self.pointer_size);
        let output = self.request_raw(id, input, size)?;
        if output.len() < size {
            tracing::debug!(
                "Request {:?} returned {} bytes, expected {}",
                id,
                output.len(),
                size
            );
            return None;
        }
        T::decode(&mut FieldReader::new(&output, self.pointer_size))
    }

    /// Request a record keyed by a target address
    pub fn request_for<T: Layout>(&self, id: RequestId, address: u64) -> Option<T> {
        let input = self.address_input(address);
        self.request_struct(id, &input)
    }

    /// Request a list of `count` target pointers
    pub fn request_pointer_list(
        &self,
        id: RequestId,
        input: &[u8],
        count: usize,
    ) -> Option<Vec<u64>> {
        let size = count.checked_mul(self.pointer_size)?;
        let output = self.request_raw(id, input, size)?;
        if output.len() < size {
            tracing::debug!(
                "Request {:?} returned {} bytes for {} pointers",
                id,
                output.len(),
                count
            );
            return None;
        }

        let mut fields = FieldReader::new(&output, self.pointer_size);
        (0..count).map(|_| fields.ptr()).collect()
    }

    /// Request a UTF-16 string keyed by a target address
    ///
    /// The string ends at the first NUL or at the end of the response.
    pub fn request_string(&self, id: RequestId, address: u64) -> Option<String> {
        let input = self.address_input(address);
        let output = self.request_raw(id, &input, MAX_NAME_UNITS * 2)?;

        let units: Vec<u16> = output.chunks_exact(2).map(LE::read_u16).collect();
        let name = match U16CStr::from_slice_truncate(&units) {
            Ok(s) => s.to_string_lossy(),
            Err(_) => U16Str::from_slice(&units).to_string_lossy(),
        };
        Some(name)
    }

    pub fn gc_heap_data(&self) -> Option<GcHeapData> {
        self.request_struct(RequestId::GcHeapData, &[])
    }

    /// Addresses of every sub-heap in server mode
    pub fn heap_list(&self, count: usize) -> Option<Vec<u64>> {
        self.request_pointer_list(RequestId::GcHeapList, &[], count)
    }

    pub fn heap_details(&self, heap: u64) -> Option<HeapDetails> {
        self.request_for(RequestId::GcHeapDetails, heap)
    }

    /// Details of the single workstation heap
    pub fn static_heap_details(&self) -> Option<HeapDetails> {
        self.request_struct(RequestId::GcHeapStaticDetails, &[])
    }

    pub fn segment_data(&self, segment: u64) -> Option<SegmentData> {
        self.request_for(RequestId::SegmentData, segment)
    }

    pub fn thread_store(&self) -> Option<ThreadStoreData> {
        self.request_struct(RequestId::ThreadStoreData, &[])
    }

    pub fn thread_data(&self, thread: u64) -> Option<ThreadData> {
        self.request_for(RequestId::ThreadData, thread)
    }

    pub fn method_table_data(&self, mt: u64) -> Option<MethodTableData> {
        self.request_for(RequestId::MethodTableData, mt)
    }

    pub fn method_table_name(&self, mt: u64) -> Option<String> {
        self.request_string(RequestId::MethodTableName, mt)
    }

    pub fn useful_globals(&self) -> Option<UsefulGlobals> {
        self.request_struct(RequestId::UsefulGlobals, &[])
    }
}
