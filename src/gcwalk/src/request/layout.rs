//! Fixed-layout response decoding
//!
//! Responses are little-endian. Address-sized fields are as wide as a target
//! pointer, so the same record is 4 or 8 bytes per address field depending
//! on the target.

use crate::reader::decode_pointer;
use byteorder::{ByteOrder, LE};

/// Sequential little-endian field reader over a response buffer
pub struct FieldReader<'a> {
    data: &'a [u8],
    pos: usize,
    pointer_size: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8], pointer_size: usize) -> Self {
        Self {
            data,
            pos: 0,
            pointer_size,
        }
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Bytes consumed so far
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, len: usize) -> Option<&'a [u8]> {
        let bytes = self.data.get(self.pos..self.pos.checked_add(len)?)?;
        self.pos += len;
        Some(bytes)
    }

    pub fn u16(&mut self) -> Option<u16> {
        self.take(2).map(LE::read_u16)
    }

    pub fn u32(&mut self) -> Option<u32> {
        self.take(4).map(LE::read_u32)
    }

    pub fn i32(&mut self) -> Option<i32> {
        self.take(4).map(LE::read_i32)
    }

    /// Read an address-sized field, widened to u64
    pub fn ptr(&mut self) -> Option<u64> {
        let size = self.pointer_size;
        self.take(size).map(|b| decode_pointer(b, size))
    }

    pub fn bool32(&mut self) -> Option<bool> {
        self.u32().map(|v| v != 0)
    }
}

/// A record with a fixed binary layout
pub trait Layout: Sized {
    /// Encoded size in bytes for a target with the given pointer width
    fn size(pointer_size: usize) -> usize;

    /// Decode from the front of a response
    fn decode(fields: &mut FieldReader<'_>) -> Option<Self>;
}
