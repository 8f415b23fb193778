//! The common index interface (§4.3) and the heap-dereferencing helper
//! every concrete index engine uses to fetch a record's column value.

pub mod avl;
pub mod hash;
pub mod btree;
pub mod rtree;

use std::sync::Arc;

use crate::codec;
use crate::error::StoreResult;
use crate::heap::{HeapFile, RecordId};
use crate::schema::Schema;
use crate::value::Value;

/// Every index engine persists one column's value → record-id mapping,
/// recomputing the value on demand by re-reading the heap file (§4.3):
/// indexes store record ids, not the values themselves.
pub trait Index {
    /// Honours `is_key`: if the column value already maps to any id, the
    /// insert is refused (returns `Ok(false)`) and nothing changes.
    fn insert(&mut self, record_id: RecordId) -> StoreResult<bool>;

    /// All ids whose column equals `value`; ordering unspecified.
    fn search(&self, value: &Value) -> StoreResult<Vec<RecordId>>;

    /// All ids with `lo <= value <= hi`. `HashIdx` always returns
    /// `UnsupportedOperation` here — callers must treat that as a fatal
    /// query error, never a fallback to scanning.
    fn range_search(&self, lo: &Value, hi: &Value) -> StoreResult<Vec<RecordId>>;

    /// Removes `record_id` if present; `Ok(None)` if it was absent.
    fn delete(&mut self, record_id: RecordId) -> StoreResult<Option<RecordId>>;
}

/// Fetches the indexed column's current value for a given record id by
/// dereferencing the heap file and decoding via the shared schema. Every
/// index op is linear in tree-height times this cost — a deliberate design
/// choice carried from the source (§4.3).
#[derive(Clone)]
pub struct HeapColumnReader {
    heap: Arc<HeapFile>,
    schema: Arc<Schema>,
    attr_index: usize,
}

impl HeapColumnReader {
    pub fn new(heap: Arc<HeapFile>, schema: Arc<Schema>, attr_index: usize) -> Self {
        HeapColumnReader {
            heap,
            schema,
            attr_index,
        }
    }

    pub fn value_of(&self, id: RecordId) -> StoreResult<Value> {
        let block = self.heap.read_live(id)?.ok_or_else(|| {
            crate::error::StoreError::Corruption(format!(
                "index references record {id} but it is not live in the heap"
            ))
        })?;
        let (values, _next) = codec::decode(&self.schema, &block)?;
        Ok(values[self.attr_index].clone())
    }
}
