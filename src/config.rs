//! Deployment configuration (§8.3).
//!
//! A plain struct, not a config-file DSL — this engine has too few knobs to
//! justify one.

use std::path::PathBuf;

use crate::index::hash::{DEFAULT_BUCKET_CAPACITY, DEFAULT_DEPTH_CAP};

/// The handful of knobs a deployment actually varies.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Where `<table>.bin` and every sidecar file lives.
    pub base_dir: PathBuf,
    /// Extendible-hash bucket capacity (`FB`), default 5. A spec-named
    /// parameter, not a correctness requirement — safe to override.
    pub hash_bucket_capacity: usize,
    /// Extendible-hash directory depth cap (`D`), default 5.
    pub hash_depth_cap: usize,
    /// Delimiters tried, in order, when `IMPORT FROM CSV` doesn't specify
    /// one explicitly.
    pub default_csv_delimiter_candidates: Vec<u8>,
}

impl StoreConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        StoreConfig {
            base_dir: base_dir.into(),
            hash_bucket_capacity: DEFAULT_BUCKET_CAPACITY,
            hash_depth_cap: DEFAULT_DEPTH_CAP,
            default_csv_delimiter_candidates: vec![b',', b';', b'\t', b'|'],
        }
    }

    pub fn with_hash_bucket_capacity(mut self, capacity: usize) -> Self {
        self.hash_bucket_capacity = capacity;
        self
    }

    pub fn with_hash_depth_cap(mut self, depth: usize) -> Self {
        self.hash_depth_cap = depth;
        self
    }

    pub fn with_csv_delimiter_candidates(mut self, candidates: Vec<u8>) -> Self {
        self.default_csv_delimiter_candidates = candidates;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig::new("./data")
    }
}
