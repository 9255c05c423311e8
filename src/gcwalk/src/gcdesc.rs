//! GCDesc: per-type pointer maps
//!
//! Every type whose instances contain references carries a packed descriptor
//! immediately before its method table, growing downward:
//!
//! ```text
//!   mt - P            series count (signed, pointer sized)
//!   mt - 2P           offset of the highest series
//!   mt - 3P           size of the highest series
//!   mt - 4P, mt - 5P  next series (offset, size) ...
//! ```
//!
//! A positive count describes fixed-layout objects: each series is a run of
//! reference slots starting at `offset`, whose stored size is relative to the
//! object's base size so the same descriptor works for any instance size.
//!
//! A negative count describes arrays of value types. The entry at `mt - 2P`
//! is the offset of the first element; below it, each pointer-sized item
//! packs (reference count, bytes to skip) as two halves. The items are
//! applied in turn, repeatedly, until the array ends.

use crate::reader::{decode_pointer, PageCache};
use crate::{check_pointer_size, Error, Result};

use byteorder::{ByteOrder, LE};
use serde::Serialize;

/// Largest series count accepted from target memory
pub const MAX_GCDESC_SERIES: u64 = 0x1_0000;

/// One outgoing reference found in an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ObjectReference {
    /// Address the reference points to
    pub target: u64,
    /// Byte offset of the reference slot from the object's start
    pub offset: u64,
}

/// Decoded pointer map for one type
#[derive(Debug, Clone)]
pub struct GcDesc {
    data: Vec<u8>,
    pointer_size: usize,
}

impl GcDesc {
    /// Wrap descriptor bytes (everything up to, not including, the method table)
    pub fn new(data: Vec<u8>, pointer_size: usize) -> Result<Self> {
        let ps = check_pointer_size(pointer_size)?;
        if data.len() < ps || data.len() % ps != 0 {
            return Err(Error::InvalidGcDesc(format!(
                "length {} is not a multiple of the pointer size",
                data.len()
            )));
        }

        let desc = Self {
            data,
            pointer_size: ps,
        };

        let count = desc.series_count();
        let series = count.unsigned_abs();
        if series > MAX_GCDESC_SERIES {
            return Err(Error::InvalidGcDesc(format!("{} series", count)));
        }

        let slots = if count > 0 { 1 + 2 * series } else { 2 + series };
        if count != 0 && (desc.data.len() as u64) < slots * ps as u64 {
            return Err(Error::InvalidGcDesc(format!(
                "{} series need {} bytes, have {}",
                count,
                slots * ps as u64,
                desc.data.len()
            )));
        }

        Ok(desc)
    }

    /// Read the descriptor stored in front of `method_table`
    ///
    /// Returns `None` if the type has no descriptor or it cannot be read.
    pub fn read(reader: &mut dyn PageCache, method_table: u64) -> Option<Self> {
        let ps = reader.pointer_size();
        let raw = reader.read_ptr(method_table.checked_sub(ps as u64)?)?;
        let series = sign_extend(raw, ps).unsigned_abs();
        if series == 0 {
            return None;
        }
        if series > MAX_GCDESC_SERIES {
            tracing::warn!(
                "Method table {:#x} claims {} GCDesc series, ignoring",
                method_table,
                series
            );
            return None;
        }

        let len = (1 + 2 * series as usize) * ps;
        let start = method_table.checked_sub(len as u64)?;
        let data = reader.read_bytes(start, len)?;

        match Self::new(data, ps) {
            Ok(desc) => Some(desc),
            Err(e) => {
                tracing::warn!("Method table {:#x}: {}", method_table, e);
                None
            }
        }
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    /// Signed series count; negative for value-type arrays
    pub fn series_count(&self) -> i64 {
        sign_extend(self.ptr_at(self.data.len() - self.pointer_size), self.pointer_size)
    }

    fn ptr_at(&self, offset: usize) -> u64 {
        decode_pointer(&self.data[offset..offset + self.pointer_size], self.pointer_size)
    }

    fn highest_series(&self) -> usize {
        self.data.len() - 3 * self.pointer_size
    }

    /// (reference count, skip bytes) packed into the item at `offset`
    fn packed_item(&self, offset: usize) -> (u64, u64) {
        let half = self.pointer_size / 2;
        let item = &self.data[offset..offset + self.pointer_size];
        match half {
            4 => (LE::read_u32(&item[..4]) as u64, LE::read_u32(&item[4..]) as u64),
            _ => (LE::read_u16(&item[..2]) as u64, LE::read_u16(&item[2..]) as u64),
        }
    }

    /// Report every nonzero reference in the object at `address`
    ///
    /// `size` is the full object size. The callback receives the referenced
    /// address and the slot's offset from `address`. Slots that cannot be
    /// read are skipped.
    pub fn walk_object(
        &self,
        address: u64,
        size: u64,
        reader: &mut dyn PageCache,
        mut callback: impl FnMut(u64, u64),
    ) {
        let count = self.series_count();
        if count > 0 {
            self.walk_series(address, size, count as usize, reader, &mut callback);
        } else if count < 0 {
            let items = count.unsigned_abs() as usize;
            self.walk_repeating(address, size, items, reader, &mut callback);
        }
    }

    /// Collect the references of one object
    pub fn references(
        &self,
        address: u64,
        size: u64,
        reader: &mut dyn PageCache,
    ) -> Vec<ObjectReference> {
        let mut refs = Vec::new();
        self.walk_object(address, size, reader, |target, offset| {
            refs.push(ObjectReference { target, offset })
        });
        refs
    }

    fn walk_series(
        &self,
        address: u64,
        size: u64,
        series: usize,
        reader: &mut dyn PageCache,
        callback: &mut impl FnMut(u64, u64),
    ) {
        let ps = self.pointer_size;
        let object_end = address.saturating_add(size);
        let mut curr = self.highest_series();

        for _ in 0..series {
            let series_size = sign_extend(self.ptr_at(curr), ps);
            let offset = self.ptr_at(curr + ps);

            let start = address.saturating_add(offset);
            let stop = (start as i128 + series_size as i128 + size as i128)
                .min(object_end as i128)
                .max(start as i128) as u64;

            let mut ptr = start;
            while ptr < stop {
                if let Some(value) = reader.read_ptr(ptr) {
                    if value != 0 {
                        callback(value, ptr - address);
                    }
                }
                ptr += ps as u64;
            }

            match curr.checked_sub(2 * ps) {
                Some(next) => curr = next,
                None => break,
            }
        }
    }

    fn walk_repeating(
        &self,
        address: u64,
        size: u64,
        items: usize,
        reader: &mut dyn PageCache,
        callback: &mut impl FnMut(u64, u64),
    ) {
        let ps = self.pointer_size as u64;
        let highest = self.highest_series();
        let object_end = address.saturating_add(size);
        let limit = object_end.saturating_sub(ps);
        let mut ptr = address.saturating_add(self.ptr_at(highest + self.pointer_size));

        while ptr < limit {
            let round_start = ptr;

            for i in 0..items {
                let (refs, skip) = self.packed_item(highest - i * self.pointer_size);
                for _ in 0..refs {
                    if ptr + ps > object_end {
                        return;
                    }
                    if let Some(value) = reader.read_ptr(ptr) {
                        if value != 0 {
                            callback(value, ptr - address);
                        }
                    }
                    ptr += ps;
                }
                ptr = ptr.saturating_add(skip);
            }

            // A descriptor with no references and no skip would never advance.
            if ptr == round_start {
                break;
            }
        }
    }
}

/// Interpret a pointer-sized value as signed
fn sign_extend(value: u64, pointer_size: usize) -> i64 {
    match pointer_size {
        4 => value as u32 as i32 as i64,
        _ => value as i64,
    }
}
