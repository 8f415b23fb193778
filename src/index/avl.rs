//! AvlIdx — disk-resident AVL tree (§4.3.2).
//!
//! File layout: `[root: i32][free_head: i32][node₁][node₂]…`, each node
//! `(key, left, right, height, next)` at 4 bytes apiece = 20 bytes. `key`
//! is a record id; `left`/`right`/the free-list `next` are 1-based node
//! indices (`0` = nil). A live node's `next` is the `-2` sentinel; a freed
//! node's `next` links the free-list.

use std::cmp::Ordering;
use std::fs;
use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};
use crate::heap::RecordId;
use crate::index::{HeapColumnReader, Index};
use crate::value::{compare_values, Value};

const NODE_SIZE: usize = 20;
const NODE_LIVE: i32 = -2;

#[derive(Clone, Copy)]
struct Node {
    key: i32,
    left: i32,
    right: i32,
    height: i32,
    next: i32,
}

impl Node {
    fn to_bytes(self) -> [u8; NODE_SIZE] {
        let mut buf = [0u8; NODE_SIZE];
        buf[0..4].copy_from_slice(&self.key.to_le_bytes());
        buf[4..8].copy_from_slice(&self.left.to_le_bytes());
        buf[8..12].copy_from_slice(&self.right.to_le_bytes());
        buf[12..16].copy_from_slice(&self.height.to_le_bytes());
        buf[16..20].copy_from_slice(&self.next.to_le_bytes());
        buf
    }

    fn from_bytes(b: &[u8]) -> Self {
        Node {
            key: i32::from_le_bytes(b[0..4].try_into().unwrap()),
            left: i32::from_le_bytes(b[4..8].try_into().unwrap()),
            right: i32::from_le_bytes(b[8..12].try_into().unwrap()),
            height: i32::from_le_bytes(b[12..16].try_into().unwrap()),
            next: i32::from_le_bytes(b[16..20].try_into().unwrap()),
        }
    }
}

struct Tree {
    root: i32,
    free_head: i32,
    nodes: Vec<Node>,
}

impl Tree {
    fn load(bytes: &[u8]) -> StoreResult<Tree> {
        if bytes.len() < 8 {
            return Err(StoreError::Corruption("avl file shorter than its header".into()));
        }
        let root = i32::from_le_bytes(bytes[0..4].try_into().unwrap());
        let free_head = i32::from_le_bytes(bytes[4..8].try_into().unwrap());
        let body = &bytes[8..];
        let count = body.len() / NODE_SIZE;
        let mut nodes = Vec::with_capacity(count);
        for i in 0..count {
            nodes.push(Node::from_bytes(&body[i * NODE_SIZE..(i + 1) * NODE_SIZE]));
        }
        Ok(Tree { root, free_head, nodes })
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8 + self.nodes.len() * NODE_SIZE);
        buf.extend_from_slice(&self.root.to_le_bytes());
        buf.extend_from_slice(&self.free_head.to_le_bytes());
        for node in &self.nodes {
            buf.extend_from_slice(&node.to_bytes());
        }
        buf
    }

    fn height(&self, idx: i32) -> i32 {
        if idx == 0 {
            0
        } else {
            self.nodes[idx as usize - 1].height
        }
    }

    fn balance_factor(&self, idx: i32) -> i32 {
        if idx == 0 {
            return 0;
        }
        let node = self.nodes[idx as usize - 1];
        self.height(node.left) - self.height(node.right)
    }

    fn update_height(&mut self, idx: i32) {
        let node = self.nodes[idx as usize - 1];
        let h = 1 + self.height(node.left).max(self.height(node.right));
        self.nodes[idx as usize - 1].height = h;
    }

    fn rotate_left(&mut self, idx: i32) -> i32 {
        let new_root = self.nodes[idx as usize - 1].right;
        let new_root_left = self.nodes[new_root as usize - 1].left;
        self.nodes[new_root as usize - 1].left = idx;
        self.nodes[idx as usize - 1].right = new_root_left;
        self.update_height(idx);
        self.update_height(new_root);
        new_root
    }

    fn rotate_right(&mut self, idx: i32) -> i32 {
        let new_root = self.nodes[idx as usize - 1].left;
        let new_root_right = self.nodes[new_root as usize - 1].right;
        self.nodes[new_root as usize - 1].right = idx;
        self.nodes[idx as usize - 1].left = new_root_right;
        self.update_height(idx);
        self.update_height(new_root);
        new_root
    }

    fn rebalance(&mut self, idx: i32) -> i32 {
        self.update_height(idx);
        let balance = self.balance_factor(idx);
        let node = self.nodes[idx as usize - 1];
        if balance > 1 {
            if self.balance_factor(node.left) < 0 {
                tracing::trace!(kind = "left-right", "avl rotation");
                self.nodes[idx as usize - 1].left = self.rotate_left(node.left);
            } else {
                tracing::trace!(kind = "right", "avl rotation");
            }
            return self.rotate_right(idx);
        }
        if balance < -1 {
            if self.balance_factor(node.right) > 0 {
                tracing::trace!(kind = "right-left", "avl rotation");
                self.nodes[idx as usize - 1].right = self.rotate_right(node.right);
            } else {
                tracing::trace!(kind = "left", "avl rotation");
            }
            return self.rotate_left(idx);
        }
        idx
    }

    fn allocate(&mut self, key: i32) -> i32 {
        if self.free_head != 0 {
            let idx = self.free_head;
            self.free_head = self.nodes[idx as usize - 1].next;
            self.nodes[idx as usize - 1] = Node {
                key,
                left: 0,
                right: 0,
                height: 1,
                next: NODE_LIVE,
            };
            idx
        } else {
            self.nodes.push(Node {
                key,
                left: 0,
                right: 0,
                height: 1,
                next: NODE_LIVE,
            });
            self.nodes.len() as i32
        }
    }

    fn free(&mut self, idx: i32) {
        self.nodes[idx as usize - 1].next = self.free_head;
        self.free_head = idx;
    }

    fn insert_rec(
        &mut self,
        idx: i32,
        record_id: RecordId,
        value: &Value,
        is_key: bool,
        reader: &HeapColumnReader,
    ) -> StoreResult<(i32, bool)> {
        if idx == 0 {
            return Ok((self.allocate(record_id as i32), true));
        }
        let node_key = self.nodes[idx as usize - 1].key;
        let node_value = reader.value_of(node_key as RecordId)?;
        match compare_values(value, &node_value) {
            Ordering::Equal if is_key => Ok((idx, false)),
            Ordering::Equal | Ordering::Greater => {
                let right = self.nodes[idx as usize - 1].right;
                let (new_right, inserted) = self.insert_rec(right, record_id, value, is_key, reader)?;
                if !inserted {
                    return Ok((idx, false));
                }
                self.nodes[idx as usize - 1].right = new_right;
                Ok((self.rebalance(idx), true))
            }
            Ordering::Less => {
                let left = self.nodes[idx as usize - 1].left;
                let (new_left, inserted) = self.insert_rec(left, record_id, value, is_key, reader)?;
                if !inserted {
                    return Ok((idx, false));
                }
                self.nodes[idx as usize - 1].left = new_left;
                Ok((self.rebalance(idx), true))
            }
        }
    }

    fn search_rec(
        &self,
        idx: i32,
        value: &Value,
        is_key: bool,
        reader: &HeapColumnReader,
        out: &mut Vec<RecordId>,
    ) -> StoreResult<()> {
        if idx == 0 {
            return Ok(());
        }
        let node = self.nodes[idx as usize - 1];
        let node_value = reader.value_of(node.key as RecordId)?;
        match compare_values(value, &node_value) {
            Ordering::Equal => {
                out.push(node.key as RecordId);
                if !is_key {
                    // Duplicates may lie on either side after rotations.
                    self.search_rec(node.left, value, is_key, reader, out)?;
                    self.search_rec(node.right, value, is_key, reader, out)?;
                }
            }
            Ordering::Less => self.search_rec(node.left, value, is_key, reader, out)?,
            Ordering::Greater => self.search_rec(node.right, value, is_key, reader, out)?,
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    fn range_search_rec(
        &self,
        idx: i32,
        lo: &Value,
        hi: &Value,
        is_point: bool,
        reader: &HeapColumnReader,
        out: &mut Vec<RecordId>,
    ) -> StoreResult<()> {
        if idx == 0 {
            return Ok(());
        }
        let node = self.nodes[idx as usize - 1];
        let node_value = reader.value_of(node.key as RecordId)?;

        if is_point {
            // POINT ordering isn't rectangle-compatible, so both subtrees
            // are explored unconditionally and a rectangular containment
            // check does the real filtering (§4.3.2).
            if let (Value::Point(p), Value::Point(lo_p), Value::Point(hi_p)) =
                (&node_value, lo, hi)
            {
                if p.is_in_range(lo_p, hi_p) {
                    out.push(node.key as RecordId);
                }
            }
            self.range_search_rec(node.left, lo, hi, is_point, reader, out)?;
            self.range_search_rec(node.right, lo, hi, is_point, reader, out)?;
            return Ok(());
        }

        if compare_values(&node_value, lo) != Ordering::Less {
            self.range_search_rec(node.left, lo, hi, is_point, reader, out)?;
        }
        if compare_values(&node_value, lo) != Ordering::Less
            && compare_values(&node_value, hi) != Ordering::Greater
        {
            out.push(node.key as RecordId);
        }
        if compare_values(&node_value, hi) != Ordering::Greater {
            self.range_search_rec(node.right, lo, hi, is_point, reader, out)?;
        }
        Ok(())
    }

    fn delete_min(&mut self, idx: i32) -> (i32, i32) {
        let node = self.nodes[idx as usize - 1];
        if node.left == 0 {
            let key = node.key;
            let right = node.right;
            self.free(idx);
            (right, key)
        } else {
            let (new_left, key) = self.delete_min(node.left);
            self.nodes[idx as usize - 1].left = new_left;
            (self.rebalance(idx), key)
        }
    }

    fn remove_node(&mut self, idx: i32) -> i32 {
        let node = self.nodes[idx as usize - 1];
        match (node.left, node.right) {
            (0, 0) => {
                self.free(idx);
                0
            }
            (0, right) => {
                self.free(idx);
                right
            }
            (left, 0) => {
                self.free(idx);
                left
            }
            (_, right) => {
                let (new_right, succ_key) = self.delete_min(right);
                self.nodes[idx as usize - 1].key = succ_key;
                self.nodes[idx as usize - 1].right = new_right;
                self.rebalance(idx)
            }
        }
    }

    fn delete_rec(
        &mut self,
        idx: i32,
        record_id: RecordId,
        value: &Value,
        reader: &HeapColumnReader,
    ) -> StoreResult<(i32, bool)> {
        if idx == 0 {
            return Ok((0, false));
        }
        let node = self.nodes[idx as usize - 1];
        let node_value = reader.value_of(node.key as RecordId)?;
        match compare_values(value, &node_value) {
            Ordering::Less => {
                let (new_left, removed) = self.delete_rec(node.left, record_id, value, reader)?;
                self.nodes[idx as usize - 1].left = new_left;
                if !removed {
                    return Ok((idx, false));
                }
                Ok((self.rebalance(idx), true))
            }
            Ordering::Greater => {
                let (new_right, removed) = self.delete_rec(node.right, record_id, value, reader)?;
                self.nodes[idx as usize - 1].right = new_right;
                if !removed {
                    return Ok((idx, false));
                }
                Ok((self.rebalance(idx), true))
            }
            Ordering::Equal => {
                if node.key as RecordId == record_id {
                    return Ok((self.remove_node(idx), true));
                }
                // Same value, different record: the duplicate could be on
                // either side post-rotation — try right then left.
                let (new_right, removed) = self.delete_rec(node.right, record_id, value, reader)?;
                if removed {
                    self.nodes[idx as usize - 1].right = new_right;
                    return Ok((self.rebalance(idx), true));
                }
                let (new_left, removed) = self.delete_rec(node.left, record_id, value, reader)?;
                if removed {
                    self.nodes[idx as usize - 1].left = new_left;
                    return Ok((self.rebalance(idx), true));
                }
                Ok((idx, false))
            }
        }
    }
}

pub struct AvlIdx {
    path: PathBuf,
    is_key: bool,
    is_point: bool,
    reader: HeapColumnReader,
}

impl AvlIdx {
    pub fn init(path: PathBuf, reader: HeapColumnReader, is_key: bool, is_point: bool) -> StoreResult<Self> {
        if !path.exists() {
            let empty = Tree {
                root: 0,
                free_head: 0,
                nodes: Vec::new(),
            };
            fs::write(&path, empty.to_bytes())?;
        }
        Ok(AvlIdx {
            path,
            is_key,
            is_point,
            reader,
        })
    }

    fn load(&self) -> StoreResult<Tree> {
        Tree::load(&fs::read(&self.path)?)
    }

    fn save(&self, tree: &Tree) -> StoreResult<()> {
        fs::write(&self.path, tree.to_bytes())?;
        Ok(())
    }
}

impl Index for AvlIdx {
    fn insert(&mut self, record_id: RecordId) -> StoreResult<bool> {
        let value = self.reader.value_of(record_id)?;
        let mut tree = self.load()?;
        let (new_root, inserted) = tree.insert_rec(tree.root, record_id, &value, self.is_key, &self.reader)?;
        if inserted {
            tree.root = new_root;
        }
        self.save(&tree)?;
        Ok(inserted)
    }

    fn search(&self, value: &Value) -> StoreResult<Vec<RecordId>> {
        let tree = self.load()?;
        let mut out = Vec::new();
        tree.search_rec(tree.root, value, self.is_key, &self.reader, &mut out)?;
        Ok(out)
    }

    fn range_search(&self, lo: &Value, hi: &Value) -> StoreResult<Vec<RecordId>> {
        let tree = self.load()?;
        let mut out = Vec::new();
        tree.range_search_rec(tree.root, lo, hi, self.is_point, &self.reader, &mut out)?;
        Ok(out)
    }

    fn delete(&mut self, record_id: RecordId) -> StoreResult<Option<RecordId>> {
        let value = self.reader.value_of(record_id)?;
        let mut tree = self.load()?;
        let (new_root, removed) = tree.delete_rec(tree.root, record_id, &value, &self.reader)?;
        if !removed {
            return Ok(None);
        }
        tree.root = new_root;
        self.save(&tree)?;
        Ok(Some(record_id))
    }
}

/// Verifies every node's left/right subtree heights differ by at most one
/// (§9 universal property 6). Exposed for the integration test suite.
pub fn check_balance_invariant(path: &PathBuf) -> StoreResult<bool> {
    let tree = Tree::load(&fs::read(path)?)?;
    fn walk(tree: &Tree, idx: i32) -> (bool, i32) {
        if idx == 0 {
            return (true, 0);
        }
        let node = tree.nodes[idx as usize - 1];
        let (ok_l, hl) = walk(tree, node.left);
        let (ok_r, hr) = walk(tree, node.right);
        let balanced = (hl - hr).abs() <= 1;
        (ok_l && ok_r && balanced, 1 + hl.max(hr))
    }
    Ok(walk(&tree, tree.root).0)
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
            "productos",
            vec![
                Attribute::new("id", DataType::Int).primary_key(),
                Attribute::new("nombre", DataType::Varchar(10)).indexed(IndexKind::Avl),
            ],
        ));
        let heap = Arc::new(HeapFile::init(dir.path().join("t.bin"), schema.record_size()).unwrap());
        (dir, heap, schema)
    }

    fn insert_row(heap: &HeapFile, schema: &Schema, id: i32, name: &str) -> RecordId {
        let bytes = codec::encode(
            schema,
            &[Value::Int(id), Value::Text(name.to_string())],
            codec::NEXT_LIVE,
        )
        .unwrap();
        heap.insert(&bytes).unwrap()
    }

    #[test]
    fn duplicates_go_right_and_both_searchable() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = AvlIdx::init(dir.path().join("nombre.dat"), reader, false, false).unwrap();
        let r1 = insert_row(&heap, &schema, 1, "A");
        let r2 = insert_row(&heap, &schema, 2, "B");
        let r3 = insert_row(&heap, &schema, 3, "A");
        idx.insert(r1).unwrap();
        idx.insert(r2).unwrap();
        idx.insert(r3).unwrap();
        let mut found = idx.search(&Value::Text("A".to_string())).unwrap();
        found.sort();
        assert_eq!(found, vec![r1, r3]);
    }

    #[test]
    fn balance_invariant_holds_after_many_inserts() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 0);
        let path = dir.path().join("id.dat");
        let mut idx = AvlIdx::init(path.clone(), reader, true, false).unwrap();
        for i in 0..30 {
            let r = insert_row(&heap, &schema, i, "x");
            idx.insert(r).unwrap();
        }
        assert!(check_balance_invariant(&path).unwrap());
    }

    #[test]
    fn delete_then_balance_still_holds() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 0);
        let path = dir.path().join("id.dat");
        let mut idx = AvlIdx::init(path.clone(), reader, true, false).unwrap();
        let ids: Vec<_> = (0..20).map(|i| insert_row(&heap, &schema, i, "x")).collect();
        for &r in &ids {
            idx.insert(r).unwrap();
        }
        for &r in ids.iter().step_by(2) {
            idx.delete(r).unwrap();
        }
        assert!(check_balance_invariant(&path).unwrap());
    }

    #[test]
    fn deleted_id_no_longer_found() {
        let (dir, heap, schema) = setup();
        let reader = HeapColumnReader::new(heap.clone(), schema.clone(), 1);
        let mut idx = AvlIdx::init(dir.path().join("nombre.dat"), reader, false, false).unwrap();
        let r1 = insert_row(&heap, &schema, 1, "A");
        let r2 = insert_row(&heap, &schema, 2, "B");
        idx.insert(r1).unwrap();
        idx.insert(r2).unwrap();
        idx.delete(r2).unwrap();
        assert_eq!(idx.search(&Value::Text("B".to_string())).unwrap(), Vec::<RecordId>::new());
    }
}
