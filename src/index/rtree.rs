//! RTreeIdx — 2-D spatial index backed by an in-memory R*-tree (§4.3.4).
//!
//! Each record id is stored as a degenerate point bounding box. The
//! authoritative persisted state is a JSON `id -> [x, y]` sidecar; the
//! in-memory `rstar::RTree` is rebuilt from it at open time, matching the
//! "no held-open state, rebuild from disk at any time" resource model (§5).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use rstar::{RTree, RTreeObject, AABB};
use serde::{Deserialize, Serialize};

use crate::error::StoreResult;
use crate::heap::RecordId;
use crate::index::{HeapColumnReader, Index};
use crate::value::{Point, Value};

#[derive(Clone, Copy, Debug)]
struct SpatialEntry {
    id: RecordId,
    point: Point,
}

impl RTreeObject for SpatialEntry {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_point([self.point.x, self.point.y])
    }
}

impl rstar::PointDistance for SpatialEntry {
    fn distance_2(&self, other_point: &[f64; 2]) -> f64 {
        let dx = self.point.x - other_point[0];
        let dy = self.point.y - other_point[1];
        dx * dx + dy * dy
    }
}

pub struct RTreeIdx {
    sidecar_path: PathBuf,
    is_key: bool,
    reader: HeapColumnReader,
}

impl RTreeIdx {
    pub fn init(sidecar_path: PathBuf, reader: HeapColumnReader, is_key: bool) -> StoreResult<Self> {
        if !sidecar_path.exists() {
            let empty: HashMap<RecordId, [f64; 2]> = HashMap::new();
            fs::write(&sidecar_path, serde_json::to_vec(&empty)?)?;
        }
        Ok(RTreeIdx { sidecar_path, is_key, reader })
    }

    fn load_map(&self) -> StoreResult<HashMap<RecordId, [f64; 2]>> {
        let bytes = fs::read(&self.sidecar_path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_map(&self, map: &HashMap<RecordId, [f64; 2]>) -> StoreResult<()> {
        fs::write(&self.sidecar_path, serde_json::to_vec(map)?)?;
        Ok(())
    }

    fn build_tree(map: &HashMap<RecordId, [f64; 2]>) -> RTree<SpatialEntry> {
        tracing::trace!(entries = map.len(), "r-tree rebuild from sidecar");
        RTree::bulk_load(
            map.iter()
                .map(|(&id, &[x, y])| SpatialEntry { id, point: Point::new(x, y) })
                .collect(),
        )
    }

    /// All ids within `radius` of `center` (inclusive); `radius <= 0` yields
    /// an empty result rather than an error (§4.3.4).
    pub fn radius_search(&self, center: &Point, radius: f64) -> StoreResult<Vec<RecordId>> {
        if radius <= 0.0 {
            return Ok(Vec::new());
        }
        let map = self.load_map()?;
        let tree = Self::build_tree(&map);
        let envelope = AABB::from_corners(
            [center.x - radius, center.y - radius],
            [center.x + radius, center.y + radius],
        );
        let mut out = Vec::new();
        for entry in tree.locate_in_envelope_intersecting(&envelope) {
            if center.distance_to(&entry.point) <= radius {
                out.push(entry.id);
            }
        }
        Ok(out)
    }

    /// The `k` nearest ids to `center`, nearest first; `k == 0` yields an
    /// empty result rather than an error (§4.3.4).
    pub fn knn_search(&self, center: &Point, k: usize) -> StoreResult<Vec<(RecordId, f64)>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let map = self.load_map()?;
        let tree = Self::build_tree(&map);
        let mut found: Vec<(RecordId, f64)> = tree
            .nearest_neighbor_iter(&[center.x, center.y])
            .take(k)
            .map(|entry| (entry.id, center.distance_to(&entry.point)))
            .collect();
        found.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
        Ok(found)
    }
}

impl Index for RTreeIdx {
    fn insert(&mut self, record_id: RecordId) -> StoreResult<bool> {
        let value = self.reader.value_of(record_id)?;
        let Value::Point(point) = value else {
            return Err(crate::error::StoreError::SchemaMismatch(
                "rtree index requires a POINT column".to_string(),
            ));
        };
        if self.is_key && !self.search(&Value::Point(point))?.is_empty() {
            return Ok(false);
        }
        let mut map = self.load_map()?;
        map.insert(record_id, [point.x, point.y]);
        self.save_map(&map)?;
        Ok(true)
    }

    /// Exact match: bbox intersection at the target point, followed by a
    /// float-equality re-check within POINT's 1e-10 tolerance (§4.3.4).
    fn search(&self, value: &Value) -> StoreResult<Vec<RecordId>> {
        let Value::Point(target) = value else {
            return Err(crate::error::StoreError::SchemaMismatch(
                "rtree search requires a POINT value".to_string(),
            ));
        };
        let map = self.load_map()?;
        let tree = Self::build_tree(&map);
        let mut out = Vec::new();
        for entry in tree.locate_at_point(&[target.x, target.y]) {
            if &entry.point == target {
                out.push(entry.id);
            }
        }
        // locate_at_point requires exact f64 equality on the envelope key,
        // which float noise can miss; fall back to a full tolerance scan.
        if out.is_empty() {
            for entry in tree.iter() {
                if &entry.point == target {
                    out.push(entry.id);
                }
            }
        }
        Ok(out)
    }

    fn range_search(&self, lo: &Value, hi: &Value) -> StoreResult<Vec<RecordId>> {
        let (Value::Point(lo), Value::Point(hi)) = (lo, hi) else {
            return Err(crate::error::StoreError::SchemaMismatch(
                "rtree range_search requires POINT bounds".to_string(),
            ));
        };
        let map = self.load_map()?;
        let tree = Self::build_tree(&map);
        let envelope = AABB::from_corners([lo.x, lo.y], [hi.x, hi.y]);
        Ok(tree
            .locate_in_envelope_intersecting(&envelope)
            .filter(|entry| entry.point.is_in_range(lo, hi))
            .map(|entry| entry.id)
            .collect())
    }

    fn delete(&mut self, record_id: RecordId) -> StoreResult<Option<RecordId>> {
        let mut map = self.load_map()?;
        let removed = map.remove(&record_id);
        if removed.is_some() {
            self.save_map(&map)?;
        }
        Ok(removed.map(|_| record_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec;
    use crate::heap::HeapFile;
    use crate::schema::{Attribute, DataType, IndexKind, Schema};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, Arc<HeapFile>, Arc<Schema>) {
        let dir = tempdir().unwrap();
        let schema = Arc::new(Schema::new(
            "lugares",
            vec![
                Attribute::new("id", DataType::Int).primary_key(),
                Attribute::new("loc", DataType::Point).indexed(IndexKind::Rtree),
            ],
        ));
        let heap = Arc::new(HeapFile::init(dir.path().join("t.bin"), schema.record_size()).unwrap());
        (dir, heap, schema)
    }

    fn insert_row(heap: &HeapFile, schema: &Schema, id: i32, x: f64, y: f64) -> RecordId {
        let bytes = codec::encode(schema, &[Value::Int(id), Value::Point(Point::new(x, y))], codec::NEXT_LIVE).unwrap();
        heap.insert(&bytes).unwrap()
    }

    #[test]
    fn radius_search_matches_spec_scenario_e4() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = RTreeIdx::init(dir.path().join("loc_rtree_meta.json"), reader, false).unwrap();
        let r10 = insert_row(&heap, &schema, 10, 0.0, 0.0);
        let r11 = insert_row(&heap, &schema, 11, 3.0, 4.0);
        let r12 = insert_row(&heap, &schema, 12, 1.0, 1.0);
        idx.insert(r10).unwrap();
        idx.insert(r11).unwrap();
        idx.insert(r12).unwrap();
        let mut found = idx.radius_search(&Point::new(0.0, 0.0), 2.0).unwrap();
        found.sort();
        let mut expected = vec![r10, r12];
        expected.sort();
        assert_eq!(found, expected);
    }

    #[test]
    fn knn_search_matches_spec_scenario_e4() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = RTreeIdx::init(dir.path().join("loc_rtree_meta.json"), reader, false).unwrap();
        let r10 = insert_row(&heap, &schema, 10, 0.0, 0.0);
        let r11 = insert_row(&heap, &schema, 11, 3.0, 4.0);
        let r12 = insert_row(&heap, &schema, 12, 1.0, 1.0);
        idx.insert(r10).unwrap();
        idx.insert(r11).unwrap();
        idx.insert(r12).unwrap();
        let found = idx.knn_search(&Point::new(0.0, 0.0), 2).unwrap();
        let ids: Vec<RecordId> = found.iter().map(|(id, _)| *id).collect();
        assert_eq!(ids, vec![r10, r12]);
    }

    #[test]
    fn radius_non_positive_is_empty() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = RTreeIdx::init(dir.path().join("loc_rtree_meta.json"), reader, false).unwrap();
        let r = insert_row(&heap, &schema, 1, 0.0, 0.0);
        idx.insert(r).unwrap();
        assert!(idx.radius_search(&Point::new(0.0, 0.0), 0.0).unwrap().is_empty());
    }

    #[test]
    fn knn_zero_is_empty() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = RTreeIdx::init(dir.path().join("loc_rtree_meta.json"), reader, false).unwrap();
        let r = insert_row(&heap, &schema, 1, 0.0, 0.0);
        idx.insert(r).unwrap();
        assert!(idx.knn_search(&Point::new(0.0, 0.0), 0).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_from_sidecar() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = RTreeIdx::init(dir.path().join("loc_rtree_meta.json"), reader, false).unwrap();
        let r = insert_row(&heap, &schema, 1, 5.0, 5.0);
        idx.insert(r).unwrap();
        assert_eq!(idx.delete(r).unwrap(), Some(r));
        assert!(idx.search(&Value::Point(Point::new(5.0, 5.0))).unwrap().is_empty());
    }
}
