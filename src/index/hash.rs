//! HashIdx — extendible hashing with overflow chaining (§4.3.1).
//!
//! Two persistent files: a text directory of `prefix bucket_id` lines and a
//! binary bucket file where bucket `b` occupies bytes
//! `b * (FB+1) * 4 .. (b+1) * (FB+1) * 4` — `FB` little-endian record-id
//! slots (`-1` = empty) followed by one little-endian overflow pointer
//! (`-1` = none). Range search is permanently unsupported (§4.3.1, §7).

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{StoreError, StoreResult};
use crate::heap::RecordId;
use crate::index::{HeapColumnReader, Index};
use crate::value::Value;

pub const DEFAULT_BUCKET_CAPACITY: usize = 5; // FB
pub const DEFAULT_DEPTH_CAP: usize = 5; // D

pub struct HashIdx {
    directory_path: PathBuf,
    buckets_path: PathBuf,
    bucket_capacity: usize,
    depth_cap: usize,
    is_key: bool,
    reader: HeapColumnReader,
}

#[derive(Clone)]
struct Bucket {
    ids: Vec<i32>,
    overflow: i32,
}

impl Bucket {
    fn empty(capacity: usize) -> Self {
        Bucket {
            ids: vec![-1; capacity],
            overflow: -1,
        }
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity((self.ids.len() + 1) * 4);
        for id in &self.ids {
            buf.extend_from_slice(&id.to_le_bytes());
        }
        buf.extend_from_slice(&self.overflow.to_le_bytes());
        buf
    }

    fn from_bytes(bytes: &[u8], capacity: usize) -> Self {
        let mut ids = Vec::with_capacity(capacity);
        for i in 0..capacity {
            ids.push(i32::from_le_bytes(bytes[i * 4..i * 4 + 4].try_into().unwrap()));
        }
        let overflow = i32::from_le_bytes(
            bytes[capacity * 4..capacity * 4 + 4].try_into().unwrap(),
        );
        Bucket { ids, overflow }
    }

    fn has_room(&self) -> bool {
        self.ids.iter().any(|&x| x == -1)
    }

    fn push(&mut self, id: RecordId) -> bool {
        if let Some(slot) = self.ids.iter_mut().find(|x| **x == -1) {
            *slot = id as i32;
            true
        } else {
            false
        }
    }

    fn live_ids(&self) -> Vec<RecordId> {
        self.ids.iter().filter(|&&x| x != -1).map(|&x| x as RecordId).collect()
    }
}

impl HashIdx {
    pub fn init(
        directory_path: PathBuf,
        buckets_path: PathBuf,
        reader: HeapColumnReader,
        is_key: bool,
    ) -> StoreResult<Self> {
        Self::init_with_params(
            directory_path,
            buckets_path,
            reader,
            is_key,
            DEFAULT_BUCKET_CAPACITY,
            DEFAULT_DEPTH_CAP,
        )
    }

    pub fn init_with_params(
        directory_path: PathBuf,
        buckets_path: PathBuf,
        reader: HeapColumnReader,
        is_key: bool,
        bucket_capacity: usize,
        depth_cap: usize,
    ) -> StoreResult<Self> {
        if !directory_path.exists() {
            fs::write(&directory_path, "")?;
        }
        if !buckets_path.exists() {
            let empty_root = Bucket::empty(bucket_capacity);
            fs::write(&buckets_path, empty_root.to_bytes())?;
            fs::write(&directory_path, "0 0\n")?;
        }
        Ok(HashIdx {
            directory_path,
            buckets_path,
            bucket_capacity,
            depth_cap,
            is_key,
            reader,
        })
    }

    fn hash_bin(&self, value: &Value) -> String {
        let d = self.depth_cap;
        let modulus = 1u64 << d;
        let key = match value {
            Value::Int(v) => (*v as i64).rem_euclid(modulus as i64) as u64,
            Value::Decimal(v) => {
                let scaled = (*v * 1000.0).floor() as i64;
                scaled.rem_euclid(modulus as i64) as u64
            }
            Value::Text(s) => (s.chars().map(|c| c as u64).sum::<u64>()) % modulus,
            _ => 0,
        };
        format!("{key:0width$b}", width = d)
    }

    fn load_directory(&self) -> StoreResult<BTreeMap<String, u32>> {
        let text = fs::read_to_string(&self.directory_path)?;
        let mut map = BTreeMap::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let mut parts = line.split_whitespace();
            let prefix = parts.next().unwrap_or("").to_string();
            let bucket_id: u32 = parts.next().unwrap_or("0").parse().unwrap_or(0);
            map.insert(prefix, bucket_id);
        }
        Ok(map)
    }

    fn save_directory(&self, dir: &BTreeMap<String, u32>) -> StoreResult<()> {
        let mut text = String::new();
        for (prefix, bucket_id) in dir {
            text.push_str(&format!("{prefix} {bucket_id}\n"));
        }
        fs::write(&self.directory_path, text)?;
        Ok(())
    }

    fn longest_prefix<'a>(dir: &'a BTreeMap<String, u32>, hash: &str) -> Option<&'a str> {
        for len in (0..=hash.len()).rev() {
            if let Some((k, _)) = dir.get_key_value(&hash[..len]) {
                return Some(k.as_str());
            }
        }
        None
    }

    fn read_bucket(&self, bucket_id: u32) -> StoreResult<Bucket> {
        let bytes = fs::read(&self.buckets_path)?;
        let size = (self.bucket_capacity + 1) * 4;
        let offset = bucket_id as usize * size;
        if offset + size > bytes.len() {
            return Err(StoreError::Corruption("hash bucket id out of range".into()));
        }
        Ok(Bucket::from_bytes(&bytes[offset..offset + size], self.bucket_capacity))
    }

    fn write_bucket(&self, bucket_id: u32, bucket: &Bucket) -> StoreResult<()> {
        use std::fs::OpenOptions;
        use std::io::{Seek, SeekFrom, Write};
        let size = (self.bucket_capacity + 1) * 4;
        let mut file = OpenOptions::new().write(true).open(&self.buckets_path)?;
        file.seek(SeekFrom::Start((bucket_id as usize * size) as u64))?;
        file.write_all(&bucket.to_bytes())?;
        Ok(())
    }

    fn append_bucket(&self, bucket: &Bucket) -> StoreResult<u32> {
        let bytes = fs::read(&self.buckets_path)?;
        let size = (self.bucket_capacity + 1) * 4;
        let new_id = (bytes.len() / size) as u32;
        let mut all = bytes;
        all.extend_from_slice(&bucket.to_bytes());
        fs::write(&self.buckets_path, all)?;
        Ok(new_id)
    }

    /// Collects the chain starting at `bucket_id`, following overflow
    /// pointers, as `(bucket_id, Bucket)` pairs in chain order.
    fn read_chain(&self, bucket_id: u32) -> StoreResult<Vec<(u32, Bucket)>> {
        let mut chain = Vec::new();
        let mut current = bucket_id;
        loop {
            let bucket = self.read_bucket(current)?;
            let overflow = bucket.overflow;
            chain.push((current, bucket));
            if overflow == -1 {
                break;
            }
            current = overflow as u32;
        }
        Ok(chain)
    }

    fn chain_live_ids(&self, bucket_id: u32) -> StoreResult<Vec<RecordId>> {
        Ok(self
            .read_chain(bucket_id)?
            .into_iter()
            .flat_map(|(_, b)| b.live_ids())
            .collect())
    }

    fn split(&self, prefix: &str, bucket_id: u32, new_id: RecordId) -> StoreResult<()> {
        tracing::trace!(prefix, bucket_id, "hash bucket split");
        let mut dir = self.load_directory()?;
        let chain = self.read_chain(bucket_id)?;
        let mut all_ids: Vec<RecordId> = chain.iter().flat_map(|(_, b)| b.live_ids()).collect();
        all_ids.push(new_id);

        let child0_prefix = format!("{prefix}0");
        let child1_prefix = format!("{prefix}1");
        let mut bucket0 = Bucket::empty(self.bucket_capacity);
        let mut bucket1 = Bucket::empty(self.bucket_capacity);
        let mut overflow0 = Vec::new();
        let mut overflow1 = Vec::new();

        for id in all_ids {
            let value = self.reader.value_of(id)?;
            let hash = self.hash_bin(&value);
            let goes_to_1 = hash.as_bytes()[prefix.len()] == b'1';
            if goes_to_1 {
                if !bucket1.push(id) {
                    overflow1.push(id);
                }
            } else if !bucket0.push(id) {
                overflow0.push(id);
            }
        }

        let id0 = self.append_bucket(&bucket0)?;
        let id1 = self.append_bucket(&bucket1)?;
        dir.remove(prefix);
        dir.insert(child0_prefix.clone(), id0);
        dir.insert(child1_prefix.clone(), id1);
        self.save_directory(&dir)?;

        for id in overflow0 {
            self.insert_into_prefix(&child0_prefix, id)?;
        }
        for id in overflow1 {
            self.insert_into_prefix(&child1_prefix, id)?;
        }
        Ok(())
    }

    fn insert_into_prefix(&self, prefix: &str, id: RecordId) -> StoreResult<()> {
        let dir = self.load_directory()?;
        let bucket_id = *dir.get(prefix).ok_or_else(|| {
            StoreError::Corruption(format!("hash directory missing prefix '{prefix}'"))
        })?;
        let chain = self.read_chain(bucket_id)?;
        for (chain_id, mut bucket) in chain.clone() {
            if bucket.has_room() {
                bucket.push(id);
                self.write_bucket(chain_id, &bucket)?;
                return Ok(());
            }
        }
        // Whole chain full.
        if prefix.len() < self.depth_cap {
            self.split(prefix, bucket_id, id)
        } else {
            let overflow_bucket = Bucket::empty(self.bucket_capacity);
            let mut overflow_bucket = overflow_bucket;
            overflow_bucket.push(id);
            let new_bucket_id = self.append_bucket(&overflow_bucket)?;
            let (last_id, mut last_bucket) = chain.last().unwrap().clone();
            last_bucket.overflow = new_bucket_id as i32;
            self.write_bucket(last_id, &last_bucket)?;
            Ok(())
        }
    }
}

impl Index for HashIdx {
    fn insert(&mut self, record_id: RecordId) -> StoreResult<bool> {
        let value = self.reader.value_of(record_id)?;
        if self.is_key && !self.search(&value)?.is_empty() {
            return Ok(false);
        }
        let hash = self.hash_bin(&value);
        let dir = self.load_directory()?;
        let prefix = Self::longest_prefix(&dir, &hash)
            .ok_or_else(|| StoreError::Corruption("hash directory has no root entry".into()))?
            .to_string();
        self.insert_into_prefix(&prefix, record_id)?;
        Ok(true)
    }

    fn search(&self, value: &Value) -> StoreResult<Vec<RecordId>> {
        let hash = self.hash_bin(value);
        let dir = self.load_directory()?;
        let Some(prefix) = Self::longest_prefix(&dir, &hash) else {
            return Ok(Vec::new());
        };
        let bucket_id = dir[prefix];
        let mut found = Vec::new();
        for id in self.chain_live_ids(bucket_id)? {
            if &self.reader.value_of(id)? == value {
                found.push(id);
                if self.is_key {
                    break;
                }
            }
        }
        Ok(found)
    }

    fn range_search(&self, _lo: &Value, _hi: &Value) -> StoreResult<Vec<RecordId>> {
        Err(StoreError::UnsupportedOperation(
            "hash index does not support range search".to_string(),
        ))
    }

    fn delete(&mut self, record_id: RecordId) -> StoreResult<Option<RecordId>> {
        // The table manager removes a record from every index before
        // freeing its heap slot, so the record is still live here and
        // `value_of` can recompute the indexed value normally.
        let value = self.reader.value_of(record_id)?;
        let hash = self.hash_bin(&value);
        let dir = self.load_directory()?;
        let Some(prefix) = Self::longest_prefix(&dir, &hash) else {
            return Ok(None);
        };
        let bucket_id = dir[prefix];
        let mut chain = self.read_chain(bucket_id)?;
        let mut found_at: Option<(usize, usize)> = None;
        'outer: for (ci, (_, bucket)) in chain.iter().enumerate() {
            for (si, slot) in bucket.ids.iter().enumerate() {
                if *slot == record_id as i32 {
                    found_at = Some((ci, si));
                    break 'outer;
                }
            }
        }
        let Some((chain_index, slot_index)) = found_at else {
            return Ok(None);
        };
        chain[chain_index].1.ids[slot_index] = -1;

        // Compact: repeatedly pull the head record of the next overflow
        // bucket into the vacated slot (§4.3.1).
        let mut vacated = (chain_index, slot_index);
        loop {
            let next_chain_index = vacated.0 + 1;
            if next_chain_index >= chain.len() {
                break;
            }
            let moved = {
                let next_bucket = &mut chain[next_chain_index].1;
                next_bucket
                    .ids
                    .iter()
                    .position(|&x| x != -1)
                    .map(|pos| {
                        let id = next_bucket.ids[pos];
                        next_bucket.ids[pos] = -1;
                        id
                    })
            };
            match moved {
                Some(id) => {
                    chain[vacated.0].1.ids[vacated.1] = id;
                    vacated = (next_chain_index, chain[next_chain_index]
                        .1
                        .ids
                        .iter()
                        .position(|&x| x == -1)
                        .unwrap_or(0));
                }
                None => break,
            }
        }

        for (bid, bucket) in &chain {
            self.write_bucket(*bid, bucket)?;
        }
        Ok(Some(record_id))
    }
}
