//! Table manager (§4.4): owns one table's heap file and secondary indexes,
//! routes inserts/deletes into both, and evaluates predicate triples by
//! intersecting per-index candidate sets.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::codec;
use crate::error::{StoreError, StoreResult};
use crate::heap::{HeapFile, RecordId};
use crate::index::avl::AvlIdx;
use crate::index::btree::BPlusIdx;
use crate::index::hash::HashIdx;
use crate::index::rtree::RTreeIdx;
use crate::index::{HeapColumnReader, Index};
use crate::schema::{IndexKind, Schema};
use crate::value::{Point, Value};

/// One equality predicate: `attr = value`.
pub struct EqualsPredicate {
    pub attr: String,
    pub value: Value,
}

/// One range predicate: `lo <= attr <= hi`.
pub struct RangePredicate {
    pub attr: String,
    pub lo: Value,
    pub hi: Value,
}

/// A RADIUS or KNN spatial predicate.
pub enum SpatialPredicate {
    Radius { attr: String, center: Point, radius: f64 },
    Knn { attr: String, center: Point, k: usize },
}

#[derive(Default)]
pub struct Predicates {
    pub equals: Vec<EqualsPredicate>,
    pub ranges: Vec<RangePredicate>,
    pub spatials: Vec<SpatialPredicate>,
}

impl Predicates {
    pub fn is_empty(&self) -> bool {
        self.equals.is_empty() && self.ranges.is_empty() && self.spatials.is_empty()
    }
}

enum ColumnIndex {
    Hash(HashIdx),
    Avl(AvlIdx),
    Btree(BPlusIdx),
    Rtree(RTreeIdx),
}

impl ColumnIndex {
    fn as_index(&self) -> Option<&dyn Index> {
        match self {
            ColumnIndex::Hash(i) => Some(i),
            ColumnIndex::Avl(i) => Some(i),
            ColumnIndex::Btree(i) => Some(i),
            ColumnIndex::Rtree(_) => None,
        }
    }

    fn as_index_mut(&mut self) -> Option<&mut dyn Index> {
        match self {
            ColumnIndex::Hash(i) => Some(i),
            ColumnIndex::Avl(i) => Some(i),
            ColumnIndex::Btree(i) => Some(i),
            ColumnIndex::Rtree(_) => None,
        }
    }
}

pub struct Table {
    pub schema: Arc<Schema>,
    heap: Arc<HeapFile>,
    indexes: HashMap<String, ColumnIndex>,
    base_dir: PathBuf,
}

fn sidecar(base_dir: &Path, table: &str, attr: &str, suffix: &str) -> PathBuf {
    base_dir.join(format!("{table}_{attr}_{suffix}"))
}

impl Table {
    /// Initializes a brand-new table: heap file and every declared index
    /// are created from scratch.
    pub fn create(base_dir: PathBuf, schema: Schema) -> StoreResult<Table> {
        let schema = Arc::new(schema);
        let heap = Arc::new(HeapFile::init(
            base_dir.join(format!("{}.bin", schema.table_name)),
            schema.record_size(),
        )?);
        let indexes = Self::open_indexes(&base_dir, &schema, &heap)?;
        Ok(Table { schema, heap, indexes, base_dir })
    }

    /// Re-attaches an already-cataloged table at startup: the heap file
    /// must already exist; index sidecars are loaded or created empty.
    pub fn open_existing(base_dir: PathBuf, schema: Schema) -> StoreResult<Table> {
        let schema = Arc::new(schema);
        let heap = Arc::new(HeapFile::open_existing(
            base_dir.join(format!("{}.bin", schema.table_name)),
            schema.record_size(),
        )?);
        let indexes = Self::open_indexes(&base_dir, &schema, &heap)?;
        Ok(Table { schema, heap, indexes, base_dir })
    }

    fn open_indexes(
        base_dir: &Path,
        schema: &Arc<Schema>,
        heap: &Arc<HeapFile>,
    ) -> StoreResult<HashMap<String, ColumnIndex>> {
        let mut indexes = HashMap::new();
        for (attr_index, attr) in schema.attributes.iter().enumerate() {
            let Some(kind) = attr.index_kind else { continue };
            let reader = HeapColumnReader::new(heap.clone(), schema.clone(), attr_index);
            let table_name = &schema.table_name;
            let column_index = match kind.canonical() {
                IndexKind::Hash => ColumnIndex::Hash(HashIdx::init(
                    sidecar(base_dir, table_name, &attr.name, "index.dat"),
                    sidecar(base_dir, table_name, &attr.name, "buckets.dat"),
                    reader,
                    attr.is_key,
                )?),
                IndexKind::Avl => ColumnIndex::Avl(AvlIdx::init(
                    sidecar(base_dir, table_name, &attr.name, "avl.dat"),
                    reader,
                    attr.is_key,
                    attr.data_type.is_spatial(),
                )?),
                IndexKind::Btree | IndexKind::Isam => ColumnIndex::Btree(BPlusIdx::init(
                    sidecar(base_dir, table_name, &attr.name, "tree.dat"),
                    sidecar(base_dir, table_name, &attr.name, "meta.dat"),
                    reader,
                    attr.is_key,
                )?),
                IndexKind::Rtree => ColumnIndex::Rtree(RTreeIdx::init(
                    sidecar(base_dir, table_name, &attr.name, "rtree_meta.json"),
                    reader,
                    attr.is_key,
                )?),
            };
            indexes.insert(attr.name.clone(), column_index);
        }
        Ok(indexes)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Validates, coerces, checks PK uniqueness, writes the heap slot, then
    /// inserts the new id into every index (§4.4).
    pub fn insert(&mut self, values: &[Value]) -> StoreResult<RecordId> {
        if values.len() != self.schema.attributes.len() {
            return Err(StoreError::SchemaMismatch(format!(
                "table '{}' expects {} values, got {}",
                self.schema.table_name,
                self.schema.attributes.len(),
                values.len()
            )));
        }
        if let Some(pk) = self.schema.primary_key() {
            let pk_index = self.schema.attr_index(&pk.name)?;
            let duplicate = match self.indexes.get(&pk.name).and_then(ColumnIndex::as_index) {
                Some(idx) => !idx.search(&values[pk_index])?.is_empty(),
                None => {
                    // No index on the PK column: fall back to a live-scan probe.
                    let mut found = false;
                    for id in self.heap.live_scan()? {
                        if self.column_value(id, pk_index)? == values[pk_index] {
                            found = true;
                            break;
                        }
                    }
                    found
                }
            };
            if duplicate {
                return Err(StoreError::DuplicateKey {
                    table: self.schema.table_name.clone(),
                    column: pk.name.clone(),
                });
            }
        }

        let block = codec::encode(&self.schema, values, codec::NEXT_LIVE)?;
        let id = self.heap.insert(&block)?;
        for (attr_name, column_index) in self.indexes.iter_mut() {
            let inserted = match column_index {
                ColumnIndex::Hash(i) => i.insert(id)?,
                ColumnIndex::Avl(i) => i.insert(id)?,
                ColumnIndex::Btree(i) => i.insert(id)?,
                ColumnIndex::Rtree(i) => i.insert(id)?,
            };
            if !inserted {
                return Err(StoreError::DuplicateKey {
                    table: self.schema.table_name.clone(),
                    column: attr_name.clone(),
                });
            }
        }
        tracing::debug!(table = %self.schema.table_name, id, "record inserted");
        Ok(id)
    }

    fn column_value(&self, id: RecordId, attr_index: usize) -> StoreResult<Value> {
        let block = self.heap.read_live(id)?.ok_or_else(|| {
            StoreError::Corruption(format!("record {id} missing during live scan"))
        })?;
        let (values, _) = codec::decode(&self.schema, &block)?;
        Ok(values[attr_index].clone())
    }

    /// Removes `record_id` from every index first, then frees the heap
    /// slot. Best-effort atomicity: if any index removal fails, the slot
    /// is not freed (§4.4).
    pub fn delete(&mut self, record_id: RecordId) -> StoreResult<bool> {
        if self.heap.read_live(record_id)?.is_none() {
            return Ok(false);
        }
        for (attr_name, column_index) in self.indexes.iter_mut() {
            let removed = match column_index {
                ColumnIndex::Hash(i) => i.delete(record_id),
                ColumnIndex::Avl(i) => i.delete(record_id),
                ColumnIndex::Btree(i) => i.delete(record_id),
                ColumnIndex::Rtree(i) => i.delete(record_id),
            };
            if let Err(e) = removed {
                tracing::warn!(table = %self.schema.table_name, column = attr_name, id = record_id, error = %e, "index removal failed mid-delete");
                return Err(e);
            }
        }
        self.heap.delete(record_id)?;
        tracing::debug!(table = %self.schema.table_name, id = record_id, "record deleted");
        Ok(true)
    }

    pub fn get(&self, record_id: RecordId) -> StoreResult<Option<Vec<Value>>> {
        let Some(block) = self.heap.read_live(record_id)? else {
            return Ok(None);
        };
        let (values, _) = codec::decode(&self.schema, &block)?;
        Ok(Some(values))
    }

    /// Core query primitive (§4.4.1): probes each predicate's index and
    /// intersects the resulting candidate sets. An empty predicate triple
    /// yields the full live-scan. Every predicate's attribute must carry a
    /// usable index — there is no table-scan fallback for indexed queries.
    pub fn select(&self, predicates: &Predicates) -> StoreResult<Vec<RecordId>> {
        if predicates.is_empty() {
            return self.heap.live_scan();
        }

        let mut candidate_sets: Vec<Vec<RecordId>> = Vec::new();

        for eq in &predicates.equals {
            let idx = self.require_index(&eq.attr)?;
            candidate_sets.push(idx.search(&eq.value)?);
            if candidate_sets.last().unwrap().is_empty() {
                return Ok(Vec::new());
            }
        }
        for range in &predicates.ranges {
            let idx = self.require_index(&range.attr)?;
            candidate_sets.push(idx.range_search(&range.lo, &range.hi)?);
            if candidate_sets.last().unwrap().is_empty() {
                return Ok(Vec::new());
            }
        }
        for spatial in &predicates.spatials {
            let ids: Vec<RecordId> = match spatial {
                SpatialPredicate::Radius { attr, center, radius } => {
                    self.require_rtree(attr)?.radius_search(center, *radius)?
                }
                SpatialPredicate::Knn { attr, center, k } => {
                    let hits = self.require_rtree(attr)?.knn_search(center, *k)?;
                    hits.into_iter().map(|(id, _)| id).collect()
                }
            };
            if ids.is_empty() {
                return Ok(Vec::new());
            }
            candidate_sets.push(ids);
        }

        let mut result = candidate_sets.pop().unwrap_or_default();
        for set in candidate_sets {
            let allowed: std::collections::HashSet<RecordId> = set.into_iter().collect();
            result.retain(|id| allowed.contains(id));
            if result.is_empty() {
                break;
            }
        }
        Ok(result)
    }

    /// Runs the same probe as `select`, then deletes each candidate,
    /// reporting only the ids actually removed (§12 Decision D5).
    pub fn delete_where(&mut self, predicates: &Predicates) -> StoreResult<Vec<RecordId>> {
        let candidates = self.select(predicates)?;
        let mut removed = Vec::new();
        for id in candidates {
            if self.delete(id)? {
                removed.push(id);
            }
        }
        Ok(removed)
    }

    fn require_index(&self, attr: &str) -> StoreResult<&dyn Index> {
        self.indexes
            .get(attr)
            .and_then(ColumnIndex::as_index)
            .ok_or_else(|| StoreError::MissingIndex {
                table: self.schema.table_name.clone(),
                column: attr.to_string(),
            })
    }

    fn require_rtree(&self, attr: &str) -> StoreResult<&RTreeIdx> {
        match self.indexes.get(attr) {
            Some(ColumnIndex::Rtree(idx)) => Ok(idx),
            _ => Err(StoreError::MissingIndex {
                table: self.schema.table_name.clone(),
                column: attr.to_string(),
            }),
        }
    }

    /// Rebuilds every B+ tree index from the current heap contents (§12 D3).
    pub fn rebuild_btree_indexes(&mut self) -> StoreResult<()> {
        for column_index in self.indexes.values_mut() {
            if let ColumnIndex::Btree(idx) = column_index {
                idx.rebuild(&self.heap)?;
            }
        }
        Ok(())
    }
}
