//! # reldb-core — single-node relational storage engine
//!
//! A small relational storage engine: a slotted heap file, four secondary
//! index engines sharing one trait, a table manager that lowers predicate
//! triples into index probes, and a hand-rolled SQL front end for a
//! restricted statement grammar.
//!
//! ## Quick start
//!
//! ```rust
//! use reldb_core::catalog::Catalog;
//! use reldb_core::config::StoreConfig;
//! use reldb_core::sql::execute_batch;
//! use tempfile::tempdir;
//!
//! # fn main() -> reldb_core::error::StoreResult<()> {
//! let dir = tempdir().unwrap();
//! let config = StoreConfig::new(dir.path());
//! let mut catalog = Catalog::open(dir.path())?;
//!
//! execute_batch(
//!     &mut catalog,
//!     &config,
//!     "CREATE TABLE Productos (id INT PRIMARY KEY, nombre VARCHAR[50] INDEX avl);
//!      INSERT INTO Productos VALUES (1, 'Teclado');",
//! );
//! # Ok(())
//! # }
//! ```
//!
//! ## Module structure
//! - [`heap`] — the slotted on-disk record store
//! - [`codec`] — fixed-width record encode/decode
//! - [`index`] — the `Index` trait and its four engines (hash, AVL, B+ tree, R*-tree)
//! - [`table`] — per-table heap + index coordination, predicate evaluation
//! - [`catalog`] — schema persistence and startup re-hydration
//! - [`sql`] — lexer, statement parser, WHERE lowering, CSV import, batch execution
//! - [`schema`] / [`value`] — column definitions and runtime values
//! - [`config`] — deployment knobs
//! - [`error`] — the unified [`error::StoreError`]
//! - [`logging`] — tracing subscriber setup behind the `logging` feature

pub mod catalog;
pub mod codec;
pub mod config;
pub mod error;
pub mod heap;
pub mod index;
pub mod logging;
pub mod schema;
pub mod sql;
pub mod table;
pub mod value;

pub use catalog::Catalog;
pub use config::StoreConfig;
pub use error::{StoreError, StoreResult};
pub use schema::{Attribute, DataType, IndexKind, Schema};
pub use table::Table;
pub use value::{Point, Value};
