//! Out-of-process GC heap reconstruction
//!
//! Rebuilds the garbage-collected heap of a managed runtime from a memory
//! source (live process or dump) and an analysis backend that answers
//! structural questions about the runtime's internals.
//!
//! # Layers
//!
//! - `source` - Memory source abstraction (dump, live process, mocks)
//! - `target` - The process being diagnosed and its revision counter
//! - `reader` - Single-page cached reader, with an optional prefetching variant
//! - `request` - Byte-buffer request/response protocol to the analysis backend
//! - `heap` - Segments, generations, object iteration
//! - `gcdesc` - Per-type pointer maps and reference walking
//!
//! # Example
//!
//! ```ignore
//! let target = Arc::new(Target::new(source)?);
//! let client = DataClient::new(backend, target.pointer_size())?;
//! let heap = Heap::build(target.clone(), client, &HeapConfig::default())?;
//!
//! for obj in heap.objects()? {
//!     let obj = obj?;
//!     for r in heap.object_references(obj)? {
//!         println!("{:#x} +{:#x} -> {:#x}", obj, r.offset, r.target);
//!     }
//! }
//! ```

pub mod config;
pub mod gcdesc;
pub mod heap;
pub mod reader;
pub mod request;
pub mod source;
pub mod target;

pub use config::HeapConfig;
pub use gcdesc::{GcDesc, ObjectReference};
pub use heap::{Heap, HeapSummary, Objects, Segment, SubHeap, TypeInfo};
pub use reader::{MemoryReader, PageCache, PrefetchReader};
pub use request::{DataBackend, DataClient, RequestId};
pub use source::MemorySource;
pub use target::{Architecture, RevisionWatch, Target};

/// Errors from heap reconstruction
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("Failed to read {size} bytes at {address:#x}")]
    MemoryRead { address: u64, size: usize },

    #[error("Unsupported pointer size: {0} (expected 4 or 8)")]
    UnsupportedPointerSize(usize),

    #[error("Pointer size mismatch: reader uses {reader} bytes, target uses {target}")]
    ArchitectureMismatch { reader: usize, target: usize },

    #[error("Heap is stale: built at revision {heap}, target is at revision {target}")]
    StaleHeap { heap: u64, target: u64 },

    #[error("GC heap unavailable: {0}")]
    HeapUnavailable(&'static str),

    #[error("Invalid GCDesc: {0}")]
    InvalidGcDesc(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Check a pointer width is one the decoders understand
pub fn check_pointer_size(size: usize) -> Result<usize> {
    match size {
        4 | 8 => Ok(size),
        other => Err(Error::UnsupportedPointerSize(other)),
    }
}
