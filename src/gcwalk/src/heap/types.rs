//! Object types
//!
//! An object's first field is its method table pointer. Everything needed to
//! size an object and find its references is resolved once per method table
//! and cached for the lifetime of the heap.

use crate::gcdesc::GcDesc;
use crate::reader::PageCache;
use crate::request::{DataClient, MethodTableData};

use std::cell::RefCell;
use std::collections::HashMap;
use std::sync::Arc;

/// Low bits of the method table slot used by the GC for marking
const METHOD_TABLE_TAG_BITS: u64 = 3;

/// Strip GC mark bits from a raw method table slot
pub fn untag_method_table(raw: u64) -> u64 {
    raw & !METHOD_TABLE_TAG_BITS
}

/// Layout facts for one method table
#[derive(Debug, Clone)]
pub struct TypeInfo {
    pub method_table: u64,
    pub base_size: u32,
    /// Per-element size for arrays and strings, 0 for fixed-size types
    pub component_size: u32,
    pub contains_pointers: bool,
    /// Free (unused) block rather than a real object
    pub is_free: bool,
    pub token: u32,
    pub module: u64,
    /// Pointer map, present when instances contain references
    pub gc_desc: Option<GcDesc>,
}

impl TypeInfo {
    pub fn from_data(method_table: u64, data: &MethodTableData, gc_desc: Option<GcDesc>) -> Self {
        Self {
            method_table,
            base_size: data.base_size,
            component_size: data.component_size,
            contains_pointers: data.contains_pointers(),
            is_free: data.is_free(),
            token: data.token,
            module: data.module,
            gc_desc,
        }
    }

    /// Whether instances carry an element count after the method table
    pub fn has_components(&self) -> bool {
        self.component_size != 0
    }

    /// Size in bytes of the instance at `address`, before alignment
    ///
    /// Variable-size types read their element count from the field following
    /// the method table.
    pub fn object_size(&self, reader: &mut dyn PageCache, address: u64) -> Option<u64> {
        if !self.has_components() {
            return Some(self.base_size as u64);
        }

        let count = reader.read_u32(address + reader.pointer_size() as u64)?;
        Some(self.base_size as u64 + self.component_size as u64 * count as u64)
    }
}

/// Per-heap cache of resolved types
///
/// Failed lookups are cached too, so a bad method table costs one request.
#[derive(Default)]
pub struct TypeCache {
    types: RefCell<HashMap<u64, Option<Arc<TypeInfo>>>>,
    free_method_table: u64,
}

impl TypeCache {
    pub fn new(free_method_table: u64) -> Self {
        Self {
            types: RefCell::default(),
            free_method_table,
        }
    }

    /// Resolve a method table, reading its GCDesc through `reader`
    pub fn resolve(
        &self,
        method_table: u64,
        client: &DataClient,
        reader: &mut dyn PageCache,
    ) -> Option<Arc<TypeInfo>> {
        if method_table == 0 {
            return None;
        }
        if let Some(cached) = self.types.borrow().get(&method_table) {
            return cached.clone();
        }

        let resolved = client.method_table_data(method_table).map(|data| {
            let gc_desc = if data.contains_pointers() {
                GcDesc::read(reader, method_table)
            } else {
                None
            };
            let mut info = TypeInfo::from_data(method_table, &data, gc_desc);
            info.is_free |= self.free_method_table != 0 && method_table == self.free_method_table;
            Arc::new(info)
        });

        if resolved.is_none() {
            tracing::debug!("Could not resolve method table {:#x}", method_table);
        }

        self.types
            .borrow_mut()
            .insert(method_table, resolved.clone());
        resolved
    }

    /// Number of method tables looked up so far
    pub fn len(&self) -> usize {
        self.types.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.borrow().is_empty()
    }
}
