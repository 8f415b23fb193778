//! Catalog & startup re-hydration (§4.5).
//!
//! Each table's schema is persisted as a JSON sidecar `<table>_meta.json` in
//! the store's base directory. On boot, the catalog scans that directory
//! for descriptors and re-attaches each table, re-opening its heap file and
//! reconstructing its index objects from their own sidecars.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::StoreResult;
use crate::schema::Schema;
use crate::table::Table;

const META_SUFFIX: &str = "_meta.json";

pub struct Catalog {
    base_dir: PathBuf,
    tables: HashMap<String, Table>,
}

impl Catalog {
    /// Scans `base_dir` for `<table>_meta.json` descriptors and re-attaches
    /// every table found (§4.5 startup re-hydration). Creates `base_dir` if
    /// it does not yet exist.
    pub fn open(base_dir: impl Into<PathBuf>) -> StoreResult<Catalog> {
        let base_dir = base_dir.into();
        fs::create_dir_all(&base_dir)?;
        let mut tables = HashMap::new();
        for entry in fs::read_dir(&base_dir)? {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if !name.ends_with(META_SUFFIX) {
                continue;
            }
            let schema = Self::load_schema(&entry.path())?;
            let table_name = schema.table_name.clone();
            let table = Table::open_existing(base_dir.clone(), schema)?;
            tracing::info!(table = %table_name, "table re-hydrated from catalog at startup");
            tables.insert(table_name, table);
        }
        Ok(Catalog { base_dir, tables })
    }

    fn meta_path(base_dir: &Path, table_name: &str) -> PathBuf {
        base_dir.join(format!("{table_name}{META_SUFFIX}"))
    }

    fn load_schema(path: &Path) -> StoreResult<Schema> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    fn save_schema(&self, schema: &Schema) -> StoreResult<()> {
        let path = Self::meta_path(&self.base_dir, &schema.table_name);
        fs::write(path, serde_json::to_vec_pretty(schema)?)?;
        Ok(())
    }

    /// Creates a table and persists its schema sidecar. Re-issuing this for
    /// an already-cataloged name is an idempotent no-op that returns the
    /// existing table rather than re-initializing its files (§12 D2).
    pub fn create_table(&mut self, schema: Schema) -> StoreResult<&mut Table> {
        let table_name = schema.table_name.clone();
        if self.tables.contains_key(&table_name) {
            return Ok(self.tables.get_mut(&table_name).unwrap());
        }
        self.save_schema(&schema)?;
        let table = Table::create(self.base_dir.clone(), schema)?;
        self.tables.insert(table_name.clone(), table);
        tracing::info!(table = %table_name, "table created");
        Ok(self.tables.get_mut(&table_name).unwrap())
    }

    pub fn table(&self, name: &str) -> Option<&Table> {
        self.tables.get(name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut Table> {
        self.tables.get_mut(name)
    }

    pub fn table_names(&self) -> impl Iterator<Item = &String> {
        self.tables.keys()
    }
}
