//! Prefetching memory reader
//!
//! Same single-page contract as `MemoryReader`, but while the caller works
//! through the current page a worker thread is already reading the next one.
//! At most one background read is outstanding at a time.

use super::{decode_pointer, Page, PageCache};
use crate::source::MemorySource;
use crate::target::{RevisionWatch, Target};
use crate::{check_pointer_size, Error, Result};

use byteorder::{ByteOrder, LE};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Single-page cache that reads ahead on a worker thread
pub struct PrefetchReader {
    source: Arc<dyn MemorySource>,
    pointer_size: usize,
    page_size: usize,
    page: Page,
    requests: Option<Sender<u64>>,
    responses: Receiver<Page>,
    /// Base address of the outstanding background read
    in_flight: Option<u64>,
    adopted: usize,
    worker: Option<JoinHandle<()>>,
    /// Set when built from a target; a flush empties the page
    revision: Option<RevisionWatch>,
}

impl PrefetchReader {
    /// Create a reader and start its worker thread
    pub fn new(source: Arc<dyn MemorySource>, page_size: usize) -> Result<Self> {
        let pointer_size = check_pointer_size(source.pointer_size())?;
        if page_size < pointer_size {
            return Err(Error::Config(format!(
                "page size {} is smaller than a pointer",
                page_size
            )));
        }

        let (request_tx, request_rx) = mpsc::channel::<u64>();
        let (response_tx, response_rx) = mpsc::channel::<Page>();

        let worker_source = source.clone();
        let worker = thread::Builder::new()
            .name("gcwalk-prefetch".to_string())
            .spawn(move || {
                for base in request_rx {
                    let data = worker_source
                        .read_bytes(base, page_size)
                        .unwrap_or_default();
                    if response_tx.send(Page { base, data }).is_err() {
                        break;
                    }
                }
            })?;

        Ok(Self {
            source,
            pointer_size,
            page_size,
            page: Page::default(),
            requests: Some(request_tx),
            responses: response_rx,
            in_flight: None,
            adopted: 0,
            worker: Some(worker),
            revision: None,
        })
    }

    /// Create a reader over a target's memory
    ///
    /// The cached page and any outstanding read are dropped whenever the
    /// target is flushed.
    pub fn for_target(target: &Target, page_size: usize) -> Result<Self> {
        let mut reader = Self::new(target.source().clone(), page_size)?;
        reader.revision = Some(target.watch());
        Ok(reader)
    }

    /// Number of cache misses served by a background read
    pub fn prefetch_hits(&self) -> usize {
        self.adopted
    }

    /// Drop everything read before the target was last flushed
    fn sync_revision(&mut self) {
        let flushed = self.revision.as_mut().is_some_and(|watch| watch.changed());
        if !flushed {
            return;
        }
        tracing::debug!("Target flushed, dropping page at {:#x}", self.page.base);
        if self.in_flight.take().is_some() {
            let _ = self.responses.recv();
        }
        self.page = Page::default();
    }

    /// Queue a read of the page following the current one
    fn prefetch_next(&mut self) {
        if self.in_flight.is_some() || self.page.data.is_empty() {
            return;
        }

        let next = self.page.end();
        if let Some(requests) = &self.requests {
            if requests.send(next).is_ok() {
                self.in_flight = Some(next);
            }
        }
    }

    /// If the outstanding read covers `address`, wait for it and make it the current page
    fn adopt_in_flight(&mut self, address: u64) -> bool {
        let base = match self.in_flight {
            Some(base) if address >= base && address - base < self.page_size as u64 => base,
            _ => return false,
        };

        self.in_flight = None;
        match self.responses.recv() {
            Ok(page) => {
                debug_assert_eq!(page.base, base);
                self.page = page;
                self.adopted += 1;
                self.prefetch_next();
                true
            }
            Err(_) => false,
        }
    }

    /// Collect a finished background read nobody wants, without blocking
    fn reap_stale(&mut self) {
        if self.in_flight.is_none() {
            return;
        }
        match self.responses.try_recv() {
            Ok(_) | Err(TryRecvError::Disconnected) => self.in_flight = None,
            Err(TryRecvError::Empty) => {}
        }
    }

    fn move_to_page(&mut self, address: u64) -> bool {
        if self.adopt_in_flight(address) && self.page.contains(address) {
            return true;
        }

        self.page.base = address;
        self.page.data = self
            .source
            .read_bytes(address, self.page_size)
            .unwrap_or_default();
        self.reap_stale();
        self.prefetch_next();
        !self.page.data.is_empty()
    }

    fn read_with<T>(
        &mut self,
        address: u64,
        len: usize,
        decode: impl Fn(&[u8]) -> T,
    ) -> Option<T> {
        self.sync_revision();
        if let Some(bytes) = self.page.slice(address, len) {
            let value = decode(bytes);
            self.prefetch_next();
            return Some(value);
        }

        self.move_to_page(address);
        if let Some(bytes) = self.page.slice(address, len) {
            return Some(decode(bytes));
        }

        self.source
            .read_exact(address, len)
            .ok()
            .map(|bytes| decode(&bytes))
    }
}

impl PageCache for PrefetchReader {
    fn pointer_size(&self) -> usize {
        self.pointer_size
    }

    fn ensure_cached(&mut self, address: u64) -> bool {
        self.sync_revision();
        self.page.contains(address) || self.move_to_page(address)
    }

    fn read_ptr(&mut self, address: u64) -> Option<u64> {
        let size = self.pointer_size;
        self.read_with(address, size, |b| decode_pointer(b, size))
    }

    fn read_u32(&mut self, address: u64) -> Option<u32> {
        self.read_with(address, 4, LE::read_u32)
    }

    fn read_bytes(&mut self, address: u64, size: usize) -> Option<Vec<u8>> {
        self.sync_revision();
        if let Some(bytes) = self.page.slice(address, size) {
            return Some(bytes.to_vec());
        }
        self.source.read_exact(address, size).ok()
    }

    fn clear(&mut self) {
        self.page = Page::default();
    }
}

impl Drop for PrefetchReader {
    fn drop(&mut self) {
        // Closing the request channel ends the worker loop.
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
