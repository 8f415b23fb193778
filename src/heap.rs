//! The slotted heap file (§4.2).
//!
//! One file per table: a 4-byte little-endian header holding the free-list
//! head (`-1` = empty), followed by a contiguous array of fixed-size slots.
//! Each slot is an opaque byte block of exactly `record_size` bytes whose
//! trailing 4 bytes are always the `next` field: `-2` marks a live slot,
//! any other value is a link in the free-list (`-1` terminates it). The
//! heap file itself is agnostic to the attribute layout inside a slot —
//! that's the record codec's job (§4.1) — it only needs `record_size` and
//! the `next`-field convention.
//!
//! File handles are opened per operation and closed before returning,
//! matching the single-writer, no-caching resource model of §5.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{StoreError, StoreResult};

pub const NEXT_LIVE: i32 = -2;
pub const FREE_LIST_END: i32 = -1;
const HEADER_SIZE: u64 = 4;

/// A 1-based slot index, stable for a record's lifetime (§3).
pub type RecordId = u32;

pub struct HeapFile {
    path: PathBuf,
    record_size: usize,
}

impl HeapFile {
    /// Creates an empty heap file (header = -1) if one does not already
    /// exist at `path`; otherwise opens the existing file as-is.
    pub fn init(path: impl Into<PathBuf>, record_size: usize) -> StoreResult<Self> {
        let path = path.into();
        if !path.exists() {
            let mut file = File::create(&path)?;
            file.write_all(&FREE_LIST_END.to_le_bytes())?;
        }
        Ok(HeapFile { path, record_size })
    }

    /// Opens a heap file that must already exist (§4.5 startup re-hydration).
    pub fn open_existing(path: impl Into<PathBuf>, record_size: usize) -> StoreResult<Self> {
        let path = path.into();
        if !path.exists() {
            return Err(StoreError::Corruption(format!(
                "heap file '{}' does not exist",
                path.display()
            )));
        }
        Ok(HeapFile { path, record_size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn open_rw(&self) -> StoreResult<File> {
        Ok(OpenOptions::new().read(true).write(true).open(&self.path)?)
    }

    fn slot_offset(&self, id: RecordId) -> u64 {
        HEADER_SIZE + (id as u64 - 1) * self.record_size as u64
    }

    fn read_header(file: &mut File) -> StoreResult<i32> {
        file.seek(SeekFrom::Start(0))?;
        let mut buf = [0u8; 4];
        file.read_exact(&mut buf)?;
        Ok(i32::from_le_bytes(buf))
    }

    fn write_header(file: &mut File, value: i32) -> StoreResult<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&value.to_le_bytes())?;
        Ok(())
    }

    fn slot_count(&self, file: &mut File) -> StoreResult<u64> {
        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            return Err(StoreError::Corruption("heap file shorter than its header".into()));
        }
        Ok((len - HEADER_SIZE) / self.record_size as u64)
    }

    fn read_slot_raw(file: &mut File, offset: u64, record_size: usize) -> StoreResult<Vec<u8>> {
        file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; record_size];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    fn write_slot_raw(file: &mut File, offset: u64, block: &[u8]) -> StoreResult<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(block)?;
        Ok(())
    }

    fn next_of(block: &[u8]) -> i32 {
        let n = block.len();
        i32::from_le_bytes(block[n - 4..n].try_into().unwrap())
    }

    fn set_next(block: &mut [u8], next: i32) {
        let n = block.len();
        block[n - 4..n].copy_from_slice(&next.to_le_bytes());
    }

    /// Inserts `block` (length must equal `record_size`; its trailing
    /// `next` field is forced to the live sentinel regardless of what the
    /// caller passed in). Reuses the free-list head if one exists,
    /// otherwise appends a new trailing slot. Returns the new record id.
    pub fn insert(&self, block: &[u8]) -> StoreResult<RecordId> {
        if block.len() != self.record_size {
            return Err(StoreError::Corruption(format!(
                "record block of {} bytes does not match heap record_size {}",
                block.len(),
                self.record_size
            )));
        }
        let mut file = self.open_rw()?;
        let mut block = block.to_vec();
        Self::set_next(&mut block, NEXT_LIVE);

        let header = Self::read_header(&mut file)?;
        if header != FREE_LIST_END {
            let reused_id = header as RecordId;
            let offset = self.slot_offset(reused_id);
            let existing = Self::read_slot_raw(&mut file, offset, self.record_size)?;
            let new_header = Self::next_of(&existing);
            Self::write_header(&mut file, new_header)?;
            Self::write_slot_raw(&mut file, offset, &block)?;
            Ok(reused_id)
        } else {
            let count = self.slot_count(&mut file)?;
            let new_id = (count + 1) as RecordId;
            let offset = self.slot_offset(new_id);
            Self::write_slot_raw(&mut file, offset, &block)?;
            Ok(new_id)
        }
    }

    /// Reads a slot's raw block (attributes + trailing `next`). Returns
    /// `None` if `id` is out of range for the file.
    pub fn read(&self, id: RecordId) -> StoreResult<Option<Vec<u8>>> {
        if id == 0 {
            return Ok(None);
        }
        let mut file = self.open_rw()?;
        let count = self.slot_count(&mut file)?;
        if id as u64 > count {
            return Ok(None);
        }
        let offset = self.slot_offset(id);
        Ok(Some(Self::read_slot_raw(&mut file, offset, self.record_size)?))
    }

    /// Reads a slot only if it is live.
    pub fn read_live(&self, id: RecordId) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.read(id)?.filter(|block| Self::next_of(block) == NEXT_LIVE))
    }

    /// Overwrites a slot's full block in place (no liveness check — callers
    /// that need one should check via `read_live` first).
    pub fn overwrite(&self, id: RecordId, block: &[u8]) -> StoreResult<()> {
        if block.len() != self.record_size {
            return Err(StoreError::Corruption("overwrite block size mismatch".into()));
        }
        let mut file = self.open_rw()?;
        let count = self.slot_count(&mut file)?;
        if id == 0 || id as u64 > count {
            return Err(StoreError::Corruption(format!("record id {id} out of range")));
        }
        let offset = self.slot_offset(id);
        Self::write_slot_raw(&mut file, offset, block)?;
        Ok(())
    }

    /// Deletes a slot: no-op if it is already non-live. On success, the
    /// slot's `next` becomes the current free-list head and the header
    /// becomes this slot's id (§4.2).
    pub fn delete(&self, id: RecordId) -> StoreResult<bool> {
        let mut file = self.open_rw()?;
        let count = self.slot_count(&mut file)?;
        if id == 0 || id as u64 > count {
            return Ok(false);
        }
        let offset = self.slot_offset(id);
        let block = Self::read_slot_raw(&mut file, offset, self.record_size)?;
        if Self::next_of(&block) != NEXT_LIVE {
            return Ok(false);
        }
        let header = Self::read_header(&mut file)?;
        let mut block = block;
        Self::set_next(&mut block, header);
        Self::write_slot_raw(&mut file, offset, &block)?;
        Self::write_header(&mut file, id as i32)?;
        Ok(true)
    }

    /// All ids currently live, in ascending slot order.
    pub fn live_scan(&self) -> StoreResult<Vec<RecordId>> {
        let mut file = self.open_rw()?;
        let count = self.slot_count(&mut file)?;
        let mut ids = Vec::new();
        for i in 1..=count {
            let offset = self.slot_offset(i as RecordId);
            let block = Self::read_slot_raw(&mut file, offset, self.record_size)?;
            if Self::next_of(&block) == NEXT_LIVE {
                ids.push(i as RecordId);
            }
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn block(tag: u8, next: i32) -> Vec<u8> {
        // record_size = 8: 4 bytes payload + 4 bytes next
        let mut b = vec![tag; 4];
        b.extend_from_slice(&next.to_le_bytes());
        b
    }

    #[test]
    fn insert_appends_when_free_list_empty() {
        let dir = tempdir().unwrap();
        let heap = HeapFile::init(dir.path().join("t.bin"), 8).unwrap();
        let id1 = heap.insert(&block(1, NEXT_LIVE)).unwrap();
        let id2 = heap.insert(&block(2, NEXT_LIVE)).unwrap();
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
    }

    #[test]
    fn slot_reuse_is_lifo() {
        let dir = tempdir().unwrap();
        let heap = HeapFile::init(dir.path().join("t.bin"), 8).unwrap();
        let ids: Vec<_> = (0..5).map(|i| heap.insert(&block(i, NEXT_LIVE)).unwrap()).collect();
        // delete 2 then 4 (0-based indices 1 and 3 -> ids 2 and 4)
        heap.delete(ids[1]).unwrap();
        heap.delete(ids[3]).unwrap();
        // LIFO: next insert reuses 4, then 2, then appends a new trailing id.
        let reused1 = heap.insert(&block(9, NEXT_LIVE)).unwrap();
        let reused2 = heap.insert(&block(9, NEXT_LIVE)).unwrap();
        let appended = heap.insert(&block(9, NEXT_LIVE)).unwrap();
        assert_eq!(reused1, ids[3]);
        assert_eq!(reused2, ids[1]);
        assert_eq!(appended, 6);
    }

    #[test]
    fn delete_is_noop_if_already_deleted() {
        let dir = tempdir().unwrap();
        let heap = HeapFile::init(dir.path().join("t.bin"), 8).unwrap();
        let id = heap.insert(&block(1, NEXT_LIVE)).unwrap();
        assert!(heap.delete(id).unwrap());
        assert!(!heap.delete(id).unwrap());
    }

    #[test]
    fn read_out_of_range_is_none() {
        let dir = tempdir().unwrap();
        let heap = HeapFile::init(dir.path().join("t.bin"), 8).unwrap();
        assert!(heap.read(42).unwrap().is_none());
    }

    #[test]
    fn live_scan_excludes_deleted() {
        let dir = tempdir().unwrap();
        let heap = HeapFile::init(dir.path().join("t.bin"), 8).unwrap();
        let ids: Vec<_> = (0..3).map(|i| heap.insert(&block(i, NEXT_LIVE)).unwrap()).collect();
        heap.delete(ids[1]).unwrap();
        let live = heap.live_scan().unwrap();
        assert_eq!(live, vec![ids[0], ids[2]]);
    }
}
