//! Memory Source Trait
//!
//! Core abstraction for reading memory from a target.

use crate::reader::decode_pointer;
use crate::target::Architecture;
use crate::{Error, Result};
use byteorder::{ByteOrder, LE};

/// Trait for reading memory from various sources (live process, dump file, etc.)
pub trait MemorySource: Send + Sync {
    /// Read up to `size` bytes from a virtual address
    ///
    /// The returned buffer may be shorter than `size` when the range runs
    /// into unmapped memory. An error means nothing at `address` is readable.
    fn read_bytes(&self, address: u64, size: usize) -> Result<Vec<u8>>;

    /// Pointer width of the target in bytes (4 or 8)
    fn pointer_size(&self) -> usize;

    /// CPU architecture of the target
    fn architecture(&self) -> Architecture;

    /// Whether the source is a minidump (only part of the address space is present)
    fn is_minidump(&self) -> bool {
        false
    }

    /// Check if this is a live process rather than a dump
    fn is_live(&self) -> bool {
        false
    }

    /// Read exactly `size` bytes, failing on a short read
    fn read_exact(&self, address: u64, size: usize) -> Result<Vec<u8>> {
        let bytes = self.read_bytes(address, size)?;
        if bytes.len() < size {
            return Err(Error::MemoryRead { address, size });
        }
        Ok(bytes)
    }

    /// Read a u64 from memory
    fn read_u64(&self, address: u64) -> Result<u64> {
        let bytes = self.read_exact(address, 8)?;
        Ok(LE::read_u64(&bytes))
    }

    /// Read a u32 from memory
    fn read_u32(&self, address: u64) -> Result<u32> {
        let bytes = self.read_exact(address, 4)?;
        Ok(LE::read_u32(&bytes))
    }

    /// Read a target pointer, widened to u64
    fn read_ptr(&self, address: u64) -> Result<u64> {
        let size = self.pointer_size();
        let bytes = self.read_exact(address, size)?;
        Ok(decode_pointer(&bytes, size))
    }
}
