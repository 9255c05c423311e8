//! Memory Source Abstraction
//!
//! The core never talks to an OS or a dump format directly. Backends
//! (minidumps, live processes, debugger sessions) implement `MemorySource`
//! outside this crate; tests use `MockMemorySource`.

mod traits;

#[cfg(test)]
mod mock;

#[cfg(test)]
pub use mock::{LiveMockSource, MockMemorySource};
pub use traits::MemorySource;
