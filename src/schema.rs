//! Schema and attribute definitions.
//!
//! A [`Schema`] is the per-table descriptor persisted by the catalog
//! (§4.5) and consulted by the record codec, the heap file, and every
//! index to compute slot layout and per-column comparisons.

use serde::{Deserialize, Serialize};

use crate::error::{StoreError, StoreResult};

/// The index engine a column may be backed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexKind {
    Hash,
    Avl,
    Btree,
    /// Alias for `Btree` accepted by the SQL front end's `INDEX isam` spelling.
    Isam,
    Rtree,
}

impl IndexKind {
    /// Normalizes the ISAM alias down to its real backing engine.
    pub fn canonical(self) -> IndexKind {
        match self {
            IndexKind::Isam => IndexKind::Btree,
            other => other,
        }
    }
}

/// A column's declared storage type. Sizes are the encoded on-disk width
/// used by the record codec (§4.1).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum DataType {
    Int,
    Decimal,
    Bool,
    Date,
    Char(usize),
    Varchar(usize),
    Point,
}

impl DataType {
    /// Encoded width in bytes, excluding the record's trailing `next` field.
    pub fn byte_size(&self) -> usize {
        match self {
            DataType::Int => 4,
            DataType::Decimal => 8,
            DataType::Bool => 1,
            DataType::Date => 4,
            DataType::Char(n) | DataType::Varchar(n) => *n,
            DataType::Point => 16,
        }
    }

    /// Whether an R-tree index may be attached to a column of this type.
    pub fn is_spatial(&self) -> bool {
        matches!(self, DataType::Point)
    }
}

/// One column of a [`Schema`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attribute {
    pub name: String,
    pub data_type: DataType,
    pub is_key: bool,
    pub index_kind: Option<IndexKind>,
}

impl Attribute {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Attribute {
            name: name.into(),
            data_type,
            is_key: false,
            index_kind: None,
        }
    }

    pub fn primary_key(mut self) -> Self {
        self.is_key = true;
        self
    }

    pub fn indexed(mut self, kind: IndexKind) -> Self {
        self.index_kind = Some(kind.canonical());
        self
    }
}

/// An ordered list of attributes plus the name of the (at most one) primary
/// key attribute. Persisted verbatim as the catalog sidecar (§4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub table_name: String,
    pub attributes: Vec<Attribute>,
}

impl Schema {
    pub fn new(table_name: impl Into<String>, attributes: Vec<Attribute>) -> Self {
        Schema {
            table_name: table_name.into(),
            attributes,
        }
    }

    /// Index of an attribute by name, or a `SchemaMismatch` if unknown.
    pub fn attr_index(&self, name: &str) -> StoreResult<usize> {
        self.attributes
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
            .ok_or_else(|| StoreError::SchemaMismatch(format!("unknown attribute '{name}'")))
    }

    pub fn attribute(&self, name: &str) -> StoreResult<&Attribute> {
        self.attr_index(name).map(|i| &self.attributes[i])
    }

    pub fn primary_key(&self) -> Option<&Attribute> {
        self.attributes.iter().find(|a| a.is_key)
    }

    /// Sum of every attribute's encoded width plus the 4-byte trailing
    /// `next` field (§3 invariant 1).
    pub fn record_size(&self) -> usize {
        self.attributes.iter().map(|a| a.data_type.byte_size()).sum::<usize>() + 4
    }

    pub fn indexed_attributes(&self) -> impl Iterator<Item = &Attribute> {
        self.attributes.iter().filter(|a| a.index_kind.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn productos_schema() -> Schema {
        Schema::new(
            "productos",
            vec![
                Attribute::new("id", DataType::Int).primary_key(),
                Attribute::new("nombre", DataType::Varchar(50)).indexed(IndexKind::Avl),
                Attribute::new("precio", DataType::Decimal).indexed(IndexKind::Btree),
            ],
        )
    }

    #[test]
    fn record_size_sums_attributes_plus_next() {
        let schema = productos_schema();
        assert_eq!(schema.record_size(), 4 + 50 + 8 + 4);
    }

    #[test]
    fn attr_index_is_case_insensitive() {
        let schema = productos_schema();
        assert_eq!(schema.attr_index("NOMBRE").unwrap(), 1);
    }

    #[test]
    fn unknown_attribute_is_schema_mismatch() {
        let schema = productos_schema();
        assert!(matches!(
            schema.attr_index("bogus"),
            Err(StoreError::SchemaMismatch(_))
        ));
    }

    #[test]
    fn isam_aliases_to_btree() {
        let attr = Attribute::new("precio", DataType::Decimal).indexed(IndexKind::Isam);
        assert_eq!(attr.index_kind, Some(IndexKind::Btree));
    }

    #[test]
    fn primary_key_lookup() {
        let schema = productos_schema();
        assert_eq!(schema.primary_key().unwrap().name, "id");
    }
}
