//! BPlusIdx — in-memory B+ tree persisted as a whole-tree blob (§4.3.3).
//!
//! Order 4: a leaf holds at most 3 keys and (off-root) at least 1; an
//! internal node holds at most 4 children and (off-root) at least 2. Nodes
//! live in an arena (`Vec<Node>`) rather than as an owned recursive tree so
//! that leaves can carry a `next` arena index for the leaf chain — plain
//! ownership can't express a sibling link alongside parent/child ownership.
//! Ancestor chains needed for rebalancing are threaded through descent as an
//! explicit `Vec<PathStep>` rather than via parent back-pointers.

use std::fs;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};
use crate::heap::{HeapFile, RecordId};
use crate::index::{HeapColumnReader, Index};
use crate::value::{compare_values, Value};

const ORDER: usize = 4;
const MAX_LEAF_KEYS: usize = ORDER - 1;
const MIN_LEAF_KEYS: usize = ORDER / 2 - 1; // 1, applies to non-root leaves
const MAX_CHILDREN: usize = ORDER;
const MIN_CHILDREN: usize = ORDER.div_ceil(2); // 2, applies to non-root internal nodes

#[derive(Clone, Serialize, Deserialize)]
enum Node {
    Leaf { keys: Vec<RecordId>, next: Option<usize> },
    Internal { keys: Vec<RecordId>, children: Vec<usize> },
}

#[derive(Clone, Serialize, Deserialize)]
struct Tree {
    nodes: Vec<Node>,
    root: usize,
}

#[derive(Serialize, Deserialize)]
struct TreeMeta {
    order: usize,
}

struct PathStep {
    node: usize,
    child_index: usize,
}

impl Tree {
    fn empty() -> Self {
        Tree {
            nodes: vec![Node::Leaf { keys: Vec::new(), next: None }],
            root: 0,
        }
    }

    fn is_leaf(&self, idx: usize) -> bool {
        matches!(self.nodes[idx], Node::Leaf { .. })
    }

    fn key_count(&self, idx: usize) -> usize {
        match &self.nodes[idx] {
            Node::Leaf { keys, .. } => keys.len(),
            Node::Internal { keys, .. } => keys.len(),
        }
    }

    fn leftmost_record_id(&self, mut idx: usize) -> RecordId {
        loop {
            match &self.nodes[idx] {
                Node::Leaf { keys, .. } => return keys[0],
                Node::Internal { children, .. } => idx = children[0],
            }
        }
    }

    fn pick_child(&self, idx: usize, value: &Value, reader: &HeapColumnReader) -> StoreResult<usize> {
        let Node::Internal { keys, .. } = &self.nodes[idx] else {
            unreachable!("pick_child called on a leaf")
        };
        for (i, key) in keys.iter().enumerate() {
            let key_value = reader.value_of(*key)?;
            if compare_values(value, &key_value) == std::cmp::Ordering::Less {
                return Ok(i);
            }
        }
        Ok(keys.len())
    }

    fn descend_path(&self, value: &Value, reader: &HeapColumnReader) -> StoreResult<Vec<PathStep>> {
        let mut path = Vec::new();
        let mut current = self.root;
        loop {
            if self.is_leaf(current) {
                path.push(PathStep { node: current, child_index: 0 });
                return Ok(path);
            }
            let child_index = self.pick_child(current, value, reader)?;
            path.push(PathStep { node: current, child_index });
            let Node::Internal { children, .. } = &self.nodes[current] else { unreachable!() };
            current = children[child_index];
        }
    }

    fn path_to_node(&self, target: usize, from: usize) -> Option<Vec<PathStep>> {
        if from == target {
            return Some(vec![PathStep { node: from, child_index: 0 }]);
        }
        let Node::Internal { children, .. } = &self.nodes[from] else {
            return None;
        };
        for (i, &child) in children.iter().enumerate() {
            if let Some(mut rest) = self.path_to_node(target, child) {
                let mut path = vec![PathStep { node: from, child_index: i }];
                path.append(&mut rest);
                return Some(path);
            }
        }
        None
    }

    fn insert_rec(
        &mut self,
        idx: usize,
        record_id: RecordId,
        value: &Value,
        is_key: bool,
        reader: &HeapColumnReader,
    ) -> StoreResult<(bool, Option<(RecordId, usize)>)> {
        if self.is_leaf(idx) {
            let Node::Leaf { keys, .. } = &self.nodes[idx] else { unreachable!() };
            let mut pos = keys.len();
            for (i, key) in keys.iter().enumerate() {
                let key_value = reader.value_of(*key)?;
                match compare_values(value, &key_value) {
                    std::cmp::Ordering::Equal if is_key => return Ok((false, None)),
                    std::cmp::Ordering::Less | std::cmp::Ordering::Equal => {
                        pos = i;
                        break;
                    }
                    std::cmp::Ordering::Greater => {}
                }
            }
            let Node::Leaf { keys, next } = &mut self.nodes[idx] else { unreachable!() };
            keys.insert(pos, record_id);
            if keys.len() <= MAX_LEAF_KEYS {
                return Ok((true, None));
            }
            // Overflow: split, 2/2, with median promotion (right's first key).
            tracing::trace!(node = idx, "b+ leaf split");
            let mid = keys.len() / 2;
            let right_keys = keys.split_off(mid);
            let right_next = *next;
            let right_node = Node::Leaf { keys: right_keys, next: right_next };
            self.nodes.push(right_node);
            let right_idx = self.nodes.len() - 1;
            let Node::Leaf { next, .. } = &mut self.nodes[idx] else { unreachable!() };
            *next = Some(right_idx);
            let separator = match &self.nodes[right_idx] {
                Node::Leaf { keys, .. } => keys[0],
                _ => unreachable!(),
            };
            Ok((true, Some((separator, right_idx))))
        } else {
            let child_index = self.pick_child(idx, value, reader)?;
            let Node::Internal { children, .. } = &self.nodes[idx] else { unreachable!() };
            let child = children[child_index];
            let (inserted, split) = self.insert_rec(child, record_id, value, is_key, reader)?;
            if !inserted {
                return Ok((false, None));
            }
            let Some((sep_key, new_child_idx)) = split else {
                return Ok((true, None));
            };
            let Node::Internal { keys, children } = &mut self.nodes[idx] else { unreachable!() };
            keys.insert(child_index, sep_key);
            children.insert(child_index + 1, new_child_idx);
            if children.len() <= MAX_CHILDREN {
                return Ok((true, None));
            }
            // Overflow: split, promoting the median separator.
            tracing::trace!(node = idx, "b+ internal split");
            let mid = keys.len() / 2;
            let promoted = keys[mid];
            let right_keys = keys.split_off(mid + 1);
            keys.pop(); // drop the promoted key from the left node
            let right_children = children.split_off(mid + 1);
            let right_node = Node::Internal { keys: right_keys, children: right_children };
            self.nodes.push(right_node);
            let right_idx = self.nodes.len() - 1;
            Ok((true, Some((promoted, right_idx))))
        }
    }

    fn insert(&mut self, record_id: RecordId, value: &Value, is_key: bool, reader: &HeapColumnReader) -> StoreResult<bool> {
        let (inserted, split) = self.insert_rec(self.root, record_id, value, is_key, reader)?;
        if let Some((sep, right_idx)) = split {
            let new_root = Node::Internal {
                keys: vec![sep],
                children: vec![self.root, right_idx],
            };
            self.nodes.push(new_root);
            self.root = self.nodes.len() - 1;
        }
        Ok(inserted)
    }

    fn search(&self, value: &Value, reader: &HeapColumnReader) -> StoreResult<Vec<RecordId>> {
        let path = self.descend_path(value, reader)?;
        let leaf = path.last().unwrap().node;
        let Node::Leaf { keys, .. } = &self.nodes[leaf] else { unreachable!() };
        let mut out = Vec::new();
        for &key in keys {
            let key_value = reader.value_of(key)?;
            if &key_value == value {
                out.push(key);
            }
        }
        Ok(out)
    }

    fn range_search(&self, lo: &Value, hi: &Value, reader: &HeapColumnReader) -> StoreResult<Vec<RecordId>> {
        let path = self.descend_path(lo, reader)?;
        let mut current = Some(path.last().unwrap().node);
        let mut out = Vec::new();
        'outer: while let Some(idx) = current {
            let Node::Leaf { keys, next } = &self.nodes[idx] else { unreachable!() };
            for &key in keys {
                let key_value = reader.value_of(key)?;
                if compare_values(&key_value, hi) == std::cmp::Ordering::Greater {
                    break 'outer;
                }
                if compare_values(&key_value, lo) != std::cmp::Ordering::Less {
                    out.push(key);
                }
            }
            current = *next;
        }
        Ok(out)
    }

    fn update_separators_along_path(&mut self, path: &[PathStep]) {
        for step in path.iter().take(path.len().saturating_sub(1)) {
            if step.child_index > 0 {
                let Node::Internal { children, .. } = &self.nodes[step.node] else { continue };
                let child = children[step.child_index];
                let new_sep = self.leftmost_record_id(child);
                let Node::Internal { keys, .. } = &mut self.nodes[step.node] else { unreachable!() };
                keys[step.child_index - 1] = new_sep;
            }
        }
    }

    fn remove_from_leaf(&mut self, idx: usize, record_id: RecordId) -> bool {
        let Node::Leaf { keys, .. } = &mut self.nodes[idx] else { unreachable!() };
        if let Some(pos) = keys.iter().position(|&k| k == record_id) {
            keys.remove(pos);
            true
        } else {
            false
        }
    }

    fn borrow_or_merge(&mut self, path: &mut Vec<PathStep>) {
        let mut level = path.len() - 1;
        loop {
            let node_idx = path[level].node;
            if level == 0 {
                // Root collapse: an internal root with one child becomes that child.
                if let Node::Internal { children, keys } = &self.nodes[node_idx] {
                    if keys.is_empty() && children.len() == 1 {
                        self.root = children[0];
                    }
                }
                break;
            }
            let min_required = if self.is_leaf(node_idx) { MIN_LEAF_KEYS } else { MIN_CHILDREN - 1 };
            let deficient = if self.is_leaf(node_idx) {
                self.key_count(node_idx) < min_required
            } else {
                match &self.nodes[node_idx] {
                    Node::Internal { children, .. } => children.len() < MIN_CHILDREN,
                    _ => false,
                }
            };
            if !deficient {
                break;
            }

            let parent_idx = path[level - 1].node;
            let child_index = path[level - 1].child_index;
            let Node::Internal { children: parent_children, .. } = &self.nodes[parent_idx] else {
                unreachable!()
            };
            let has_left = child_index > 0;
            let has_right = child_index + 1 < parent_children.len();
            let left_sibling = has_left.then(|| parent_children[child_index - 1]);
            let right_sibling = has_right.then(|| parent_children[child_index + 1]);

            if self.try_borrow(node_idx, parent_idx, child_index, left_sibling, right_sibling) {
                break;
            }
            let did_merge = self.try_merge(node_idx, parent_idx, child_index, left_sibling, right_sibling);
            if did_merge {
                level -= 1;
                continue;
            }
            break;
        }
    }

    /// Attempts to borrow a key/child from a sibling that has spare capacity.
    /// Returns true if a borrow happened (no further propagation needed).
    fn try_borrow(
        &mut self,
        node_idx: usize,
        parent_idx: usize,
        child_index: usize,
        left_sibling: Option<usize>,
        right_sibling: Option<usize>,
    ) -> bool {
        if self.is_leaf(node_idx) {
            if let Some(left) = left_sibling {
                if self.key_count(left) > MIN_LEAF_KEYS.max(1) {
                    let borrowed = {
                        let Node::Leaf { keys, .. } = &mut self.nodes[left] else { unreachable!() };
                        keys.pop().unwrap()
                    };
                    let Node::Leaf { keys, .. } = &mut self.nodes[node_idx] else { unreachable!() };
                    keys.insert(0, borrowed);
                    let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent_idx] else { unreachable!() };
                    pkeys[child_index - 1] = borrowed;
                    return true;
                }
            }
            if let Some(right) = right_sibling {
                if self.key_count(right) > MIN_LEAF_KEYS.max(1) {
                    let borrowed = {
                        let Node::Leaf { keys, .. } = &mut self.nodes[right] else { unreachable!() };
                        keys.remove(0)
                    };
                    let Node::Leaf { keys, .. } = &mut self.nodes[node_idx] else { unreachable!() };
                    keys.push(borrowed);
                    let new_sep = self.leftmost_record_id(right);
                    let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent_idx] else { unreachable!() };
                    pkeys[child_index] = new_sep;
                    return true;
                }
            }
            false
        } else {
            if let Some(left) = left_sibling {
                let left_children = match &self.nodes[left] {
                    Node::Internal { children, .. } => children.len(),
                    _ => 0,
                };
                if left_children > MIN_CHILDREN {
                    let (borrowed_child, borrowed_key) = {
                        let Node::Internal { keys, children } = &mut self.nodes[left] else { unreachable!() };
                        (children.pop().unwrap(), keys.pop().unwrap())
                    };
                    let Node::Internal { keys: pkeys, .. } = &self.nodes[parent_idx] else { unreachable!() };
                    let old_separator = pkeys[child_index - 1];
                    let Node::Internal { keys, children } = &mut self.nodes[node_idx] else { unreachable!() };
                    keys.insert(0, old_separator);
                    children.insert(0, borrowed_child);
                    let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent_idx] else { unreachable!() };
                    pkeys[child_index - 1] = borrowed_key;
                    return true;
                }
            }
            if let Some(right) = right_sibling {
                let right_children = match &self.nodes[right] {
                    Node::Internal { children, .. } => children.len(),
                    _ => 0,
                };
                if right_children > MIN_CHILDREN {
                    let (borrowed_child, borrowed_key) = {
                        let Node::Internal { keys, children } = &mut self.nodes[right] else { unreachable!() };
                        (children.remove(0), keys.remove(0))
                    };
                    let Node::Internal { keys: pkeys, .. } = &self.nodes[parent_idx] else { unreachable!() };
                    let old_separator = pkeys[child_index];
                    let Node::Internal { keys, children } = &mut self.nodes[node_idx] else { unreachable!() };
                    keys.push(old_separator);
                    children.push(borrowed_child);
                    let Node::Internal { keys: pkeys, .. } = &mut self.nodes[parent_idx] else { unreachable!() };
                    pkeys[child_index] = borrowed_key;
                    return true;
                }
            }
            false
        }
    }

    fn try_merge(
        &mut self,
        node_idx: usize,
        parent_idx: usize,
        child_index: usize,
        left_sibling: Option<usize>,
        right_sibling: Option<usize>,
    ) -> bool {
        if let Some(left) = left_sibling {
            self.merge_into_left(left, node_idx, parent_idx, child_index - 1);
            return true;
        }
        if let Some(right) = right_sibling {
            self.merge_into_left(node_idx, right, parent_idx, child_index);
            return true;
        }
        false
    }

    /// Merges `right` into `left` (both children of `parent` at separator
    /// index `sep_index`), removing `right` and the separator from `parent`.
    fn merge_into_left(&mut self, left: usize, right: usize, parent: usize, sep_index: usize) {
        tracing::trace!(left, right, "b+ node merge");
        if self.is_leaf(left) {
            let (right_keys, right_next) = match self.nodes[right].clone() {
                Node::Leaf { keys, next } => (keys, next),
                _ => unreachable!(),
            };
            let Node::Leaf { keys, next } = &mut self.nodes[left] else { unreachable!() };
            keys.extend(right_keys);
            *next = right_next;
        } else {
            let (right_keys, right_children) = match self.nodes[right].clone() {
                Node::Internal { keys, children } => (keys, children),
                _ => unreachable!(),
            };
            let Node::Internal { keys: pkeys, .. } = &self.nodes[parent] else { unreachable!() };
            let pulled_separator = pkeys[sep_index];
            let Node::Internal { keys, children } = &mut self.nodes[left] else { unreachable!() };
            keys.push(pulled_separator);
            keys.extend(right_keys);
            children.extend(right_children);
        }
        let Node::Internal { keys, children } = &mut self.nodes[parent] else { unreachable!() };
        keys.remove(sep_index);
        children.remove(sep_index + 1);
    }

    fn delete(&mut self, record_id: RecordId, value: &Value, reader: &HeapColumnReader) -> StoreResult<Option<RecordId>> {
        let mut path = self.descend_path(value, reader)?;
        let mut leaf = path.last().unwrap().node;
        if !self.remove_from_leaf(leaf, record_id) {
            // Duplicates of the same value can spill into the next leaf
            // after a split; the target leaf chain is always adjacent.
            let Node::Leaf { next, .. } = &self.nodes[leaf] else { unreachable!() };
            let mut candidate = *next;
            let mut found = false;
            while let Some(idx) = candidate {
                let first_value_matches = {
                    let Node::Leaf { keys, .. } = &self.nodes[idx] else { unreachable!() };
                    if keys.is_empty() {
                        false
                    } else {
                        &reader.value_of(keys[0])? == value
                    }
                };
                if !first_value_matches {
                    break;
                }
                if self.remove_from_leaf(idx, record_id) {
                    leaf = idx;
                    found = true;
                    break;
                }
                let Node::Leaf { next, .. } = &self.nodes[idx] else { unreachable!() };
                candidate = *next;
            }
            if !found {
                return Ok(None);
            }
            path = self
                .path_to_node(leaf, self.root)
                .unwrap_or_else(|| vec![PathStep { node: leaf, child_index: 0 }]);
        }
        self.borrow_or_merge(&mut path);
        self.update_separators_along_path(&path);
        Ok(Some(record_id))
    }
}

pub struct BPlusIdx {
    tree_path: PathBuf,
    meta_path: PathBuf,
    is_key: bool,
    reader: HeapColumnReader,
}

impl BPlusIdx {
    pub fn init(tree_path: PathBuf, meta_path: PathBuf, reader: HeapColumnReader, is_key: bool) -> StoreResult<Self> {
        if !tree_path.exists() {
            let tree = Tree::empty();
            fs::write(&tree_path, bincode::serialize(&tree)?)?;
            fs::write(&meta_path, bincode::serialize(&TreeMeta { order: ORDER })?)?;
        }
        Ok(BPlusIdx { tree_path, meta_path, is_key, reader })
    }

    fn load(&self) -> StoreResult<Tree> {
        let bytes = fs::read(&self.tree_path)?;
        Ok(bincode::deserialize(&bytes)?)
    }

    fn save(&self, tree: &Tree) -> StoreResult<()> {
        fs::write(&self.tree_path, bincode::serialize(tree)?)?;
        Ok(())
    }

    /// Rebuilds the tree from scratch via the heap file's live-scan (§12 D3):
    /// the one correct contract, independent of any internal bookkeeping.
    pub fn rebuild(&self, heap: &HeapFile) -> StoreResult<()> {
        let mut tree = Tree::empty();
        for id in heap.live_scan()? {
            let value = self.reader.value_of(id)?;
            tree.insert(id, &value, self.is_key, &self.reader)?;
        }
        self.save(&tree)?;
        Ok(())
    }
}

impl Index for BPlusIdx {
    fn insert(&mut self, record_id: RecordId) -> StoreResult<bool> {
        let value = self.reader.value_of(record_id)?;
        let mut tree = self.load()?;
        let inserted = tree.insert(record_id, &value, self.is_key, &self.reader)?;
        if inserted {
            self.save(&tree)?;
        }
        Ok(inserted)
    }

    fn search(&self, value: &Value) -> StoreResult<Vec<RecordId>> {
        let tree = self.load()?;
        tree.search(value, &self.reader)
    }

    fn range_search(&self, lo: &Value, hi: &Value) -> StoreResult<Vec<RecordId>> {
        let tree = self.load()?;
        tree.range_search(lo, hi, &self.reader)
    }

    fn delete(&mut self, record_id: RecordId) -> StoreResult<Option<RecordId>> {
        let value = self.reader.value_of(record_id)?;
        let mut tree = self.load()?;
        let removed = tree.delete(record_id, &value, &self.reader)?;
        if removed.is_some() {
            self.save(&tree)?;
        }
        Ok(removed)
    }
}

/// Walks the leaf chain from the leftmost leaf, used by the integration
/// suite to check §9 universal property 7 (non-decreasing value order).
pub fn leaf_chain_ids(tree_path: &PathBuf, reader: &HeapColumnReader) -> StoreResult<Vec<RecordId>> {
    let tree = Tree::load_from(tree_path)?;
    let mut idx = tree.root;
    while !tree.is_leaf(idx) {
        let Node::Internal { children, .. } = &tree.nodes[idx] else { unreachable!() };
        idx = children[0];
    }
    let mut out = Vec::new();
    let mut current = Some(idx);
    while let Some(i) = current {
        let Node::Leaf { keys, next } = &tree.nodes[i] else { unreachable!() };
        out.extend(keys.iter().copied());
        current = *next;
    }
    let _ = reader;
    Ok(out)
}

impl Tree {
    fn load_from(path: &PathBuf) -> StoreResult<Tree> {
        let bytes = fs::read(path).map_err(StoreError::from)?;
        bincode::deserialize(&bytes).map_err(StoreError::from)
    }
}
