//! Target Process
//!
//! The address space being diagnosed. Everything derived from it (heaps,
//! segments, cached pages) is stamped with the revision current at the time
//! it was built and must be discarded after a `flush`.

use crate::source::MemorySource;
use crate::{check_pointer_size, Result};

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// CPU architecture of a target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Architecture {
    X86,
    Amd64,
    Arm,
    Arm64,
}

impl Architecture {
    /// Native pointer width for this architecture
    pub fn pointer_size(self) -> usize {
        match self {
            Architecture::X86 | Architecture::Arm => 4,
            Architecture::Amd64 | Architecture::Arm64 => 8,
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Architecture::X86 => "x86",
            Architecture::Amd64 => "amd64",
            Architecture::Arm => "arm",
            Architecture::Arm64 => "arm64",
        };
        f.write_str(name)
    }
}

/// A process (or dump of one) under diagnosis
pub struct Target {
    source: Arc<dyn MemorySource>,
    pointer_size: usize,
    architecture: Architecture,
    minidump: bool,
    live: bool,
    revision: Arc<AtomicU64>,
}

impl Target {
    /// Wrap a memory source
    ///
    /// Fails if the source reports a pointer width other than 4 or 8, or one
    /// that disagrees with its architecture.
    pub fn new(source: Arc<dyn MemorySource>) -> Result<Self> {
        let pointer_size = check_pointer_size(source.pointer_size())?;
        let architecture = source.architecture();
        if architecture.pointer_size() != pointer_size {
            return Err(crate::Error::ArchitectureMismatch {
                reader: pointer_size,
                target: architecture.pointer_size(),
            });
        }

        Ok(Self {
            minidump: source.is_minidump(),
            live: source.is_live(),
            source,
            pointer_size,
            architecture,
            revision: Arc::new(AtomicU64::new(0)),
        })
    }

    pub fn source(&self) -> &Arc<dyn MemorySource> {
        &self.source
    }

    pub fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    pub fn architecture(&self) -> Architecture {
        self.architecture
    }

    /// Whether only part of the address space is available
    pub fn is_minidump(&self) -> bool {
        self.minidump
    }

    /// Whether the source is a running process rather than a dump
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Current revision; bumped by every `flush`
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    /// Follow this target's revision from another owner, such as a reader
    pub fn watch(&self) -> RevisionWatch {
        RevisionWatch {
            seen: self.revision(),
            counter: self.revision.clone(),
        }
    }

    /// Invalidate all state derived from this target
    ///
    /// Heaps built before the flush refuse further queries; readers drop
    /// their cached page on next use.
    pub fn flush(&self) -> u64 {
        let revision = self.revision.fetch_add(1, Ordering::AcqRel) + 1;
        tracing::debug!("Target flushed, now at revision {}", revision);
        revision
    }
}

impl fmt::Debug for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Target")
            .field("architecture", &self.architecture)
            .field("pointer_size", &self.pointer_size)
            .field("minidump", &self.minidump)
            .field("live", &self.live)
            .field("revision", &self.revision())
            .finish()
    }
}

/// A target revision as last seen by one observer
#[derive(Debug, Clone)]
pub struct RevisionWatch {
    counter: Arc<AtomicU64>,
    seen: u64,
}

impl RevisionWatch {
    /// True once per flush that happened since the last call
    pub fn changed(&mut self) -> bool {
        let current = self.counter.load(Ordering::Acquire);
        if current == self.seen {
            return false;
        }
        self.seen = current;
        true
    }
}
