//! Heap walk configuration

use crate::reader::{DEFAULT_PAGE_SIZE, HEAP_PAGE_SIZE};
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Most segments followed in one segment list before giving up
pub const MAX_SEGMENT_HOPS: usize = 1024;

/// Most threads followed in the thread list before giving up
pub const MAX_THREAD_HOPS: usize = 0x4000;

/// Tunables for building and walking a heap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeapConfig {
    /// Page size for general-purpose reads (type descriptors, single objects)
    pub page_size: usize,
    /// Page size used while iterating objects
    pub heap_page_size: usize,
    /// Read the next page on a worker thread during object iteration
    pub prefetch: bool,
    pub max_segment_hops: usize,
    pub max_thread_hops: usize,
}

impl Default for HeapConfig {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            heap_page_size: HEAP_PAGE_SIZE,
            prefetch: false,
            max_segment_hops: MAX_SEGMENT_HOPS,
            max_thread_hops: MAX_THREAD_HOPS,
        }
    }
}

impl HeapConfig {
    /// Parse a TOML document; missing keys take their defaults
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Self = toml::from_str(contents).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&contents)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size < 8 || self.heap_page_size < 8 {
            return Err(Error::Config("page sizes must be at least 8 bytes".to_string()));
        }
        if self.max_segment_hops == 0 || self.max_thread_hops == 0 {
            return Err(Error::Config("hop limits must be nonzero".to_string()));
        }
        Ok(())
    }
}
