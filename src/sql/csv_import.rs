//! `IMPORT FROM CSV` (§7 coercion policy, §10 column mapping).

use std::fs::File;
use std::path::Path;

use crate::config::StoreConfig;
use crate::error::StoreResult;
use crate::schema::Schema;
use crate::table::Table;
use crate::value::Value;

/// One failed row, reported by its 1-based row number and the reason.
pub type ImportFailure = (usize, String);

pub struct ImportReport {
    pub imported: usize,
    pub failed: Vec<ImportFailure>,
}

/// Matches `csv_header` to a schema attribute: case-insensitive exact match,
/// then substring containment in either direction, then a comparison with
/// non-alphanumeric characters stripped from both sides (§10).
fn match_column<'a>(csv_header: &str, schema: &'a Schema) -> Option<&'a str> {
    let header_lower = csv_header.to_ascii_lowercase();
    if let Some(attr) = schema.attributes.iter().find(|a| a.name.eq_ignore_ascii_case(csv_header)) {
        return Some(&attr.name);
    }
    if let Some(attr) = schema
        .attributes
        .iter()
        .find(|a| header_lower.contains(&a.name.to_ascii_lowercase()) || a.name.to_ascii_lowercase().contains(&header_lower))
    {
        return Some(&attr.name);
    }
    let normalize = |s: &str| s.chars().filter(|c| c.is_alphanumeric()).collect::<String>().to_ascii_lowercase();
    let header_norm = normalize(csv_header);
    schema.attributes.iter().find(|a| normalize(&a.name) == header_norm).map(|a| a.name.as_str())
}

/// Sniffs the delimiter by trying each candidate against the file's first
/// line and picking the one that splits it into the most fields.
fn detect_delimiter(first_line: &str, candidates: &[u8]) -> u8 {
    candidates
        .iter()
        .copied()
        .max_by_key(|&d| first_line.matches(d as char).count())
        .unwrap_or(b',')
}

/// Imports `path` into `table`, mapping CSV headers to schema columns per
/// §10 and applying the §7 coercion-failure policy: a non-PK column that
/// fails to coerce gets its type default; a PK column that fails to coerce
/// skips (and reports) the whole row.
pub fn import_csv(
    table: &mut Table,
    path: &Path,
    config: &StoreConfig,
    delimiter: Option<u8>,
    no_header: bool,
) -> StoreResult<ImportReport> {
    let schema = table.schema.clone();
    let raw = std::fs::read_to_string(path)?;
    let delimiter = delimiter.unwrap_or_else(|| {
        let first_line = raw.lines().next().unwrap_or("");
        detect_delimiter(first_line, &config.default_csv_delimiter_candidates)
    });

    let headers: Vec<String> = if no_header {
        schema.attributes.iter().map(|a| a.name.clone()).collect()
    } else {
        let mut reader = csv::ReaderBuilder::new().delimiter(delimiter).has_headers(true).from_reader(File::open(path)?);
        reader.headers()?.iter().map(|h| h.to_string()).collect()
    };
    let column_for_index: Vec<Option<String>> = headers.iter().map(|h| match_column(h, &schema).map(|s| s.to_string())).collect();

    let mut builder = csv::ReaderBuilder::new();
    builder.delimiter(delimiter).has_headers(!no_header);
    let mut reader = builder.from_reader(File::open(path)?);

    let pk_name = schema.primary_key().map(|a| a.name.clone());
    let mut imported = 0usize;
    let mut failed = Vec::new();

    for (row_number, record) in reader.records().enumerate() {
        let row_number = row_number + 1;
        let record = match record {
            Ok(r) => r,
            Err(e) => {
                failed.push((row_number, e.to_string()));
                continue;
            }
        };

        let mut values = vec![None; schema.attributes.len()];
        for (field_index, field) in record.iter().enumerate() {
            let Some(Some(column)) = column_for_index.get(field_index) else { continue };
            let attr_index = match schema.attr_index(column) {
                Ok(i) => i,
                Err(_) => continue,
            };
            let attr = &schema.attributes[attr_index];
            values[attr_index] = Some(match Value::coerce(field, &attr.data_type) {
                Ok(v) => v,
                Err(e) => {
                    if pk_name.as_deref() == Some(attr.name.as_str()) {
                        failed.push((row_number, format!("primary key column '{}': {e}", attr.name)));
                        continue;
                    }
                    Value::type_default(&attr.data_type)
                }
            });
        }

        if failed.last().map(|(n, _)| *n) == Some(row_number) {
            continue;
        }

        let row: Vec<Value> = schema
            .attributes
            .iter()
            .enumerate()
            .map(|(i, a)| values[i].clone().unwrap_or_else(|| Value::type_default(&a.data_type)))
            .collect();

        match table.insert(&row) {
            Ok(_) => imported += 1,
            Err(e) => failed.push((row_number, e.to_string())),
        }
    }

    Ok(ImportReport { imported, failed })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{Attribute, DataType, IndexKind};
    use tempfile::tempdir;

    fn productos_schema() -> Schema {
        Schema::new(
            "productos",
            vec![
                Attribute::new("id", DataType::Int).primary_key().indexed(IndexKind::Hash),
                Attribute::new("nombre", DataType::Varchar(50)),
                Attribute::new("precio", DataType::Decimal),
            ],
        )
    }

    #[test]
    fn imports_rows_and_maps_headers_case_insensitively() {
        let dir = tempdir().unwrap();
        let mut table = Table::create(dir.path().to_path_buf(), productos_schema()).unwrap();
        let csv_path = dir.path().join("rows.csv");
        std::fs::write(&csv_path, "ID,Nombre,Precio\n1,A,10.0\n2,B,20.0\n").unwrap();

        let config = StoreConfig::default();
        let report = import_csv(&mut table, &csv_path, &config, None, false).unwrap();
        assert_eq!(report.imported, 2);
        assert!(report.failed.is_empty());
    }

    #[test]
    fn pk_coercion_failure_skips_and_reports_row() {
        let dir = tempdir().unwrap();
        let mut table = Table::create(dir.path().to_path_buf(), productos_schema()).unwrap();
        let csv_path = dir.path().join("rows.csv");
        std::fs::write(&csv_path, "id,nombre,precio\nnot-an-int,A,10.0\n2,B,20.0\n").unwrap();

        let config = StoreConfig::default();
        let report = import_csv(&mut table, &csv_path, &config, None, false).unwrap();
        assert_eq!(report.imported, 1);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, 1);
    }

    #[test]
    fn non_pk_coercion_failure_substitutes_type_default() {
        let dir = tempdir().unwrap();
        let mut table = Table::create(dir.path().to_path_buf(), productos_schema()).unwrap();
        let csv_path = dir.path().join("rows.csv");
        std::fs::write(&csv_path, "id,nombre,precio\n1,A,not-a-number\n").unwrap();

        let config = StoreConfig::default();
        let report = import_csv(&mut table, &csv_path, &config, None, false).unwrap();
        assert_eq!(report.imported, 1);
        let row = table.get(1).unwrap().unwrap();
        assert_eq!(row[2], Value::Decimal(0.0));
    }

    #[test]
    fn detects_semicolon_delimiter() {
        let dir = tempdir().unwrap();
        let mut table = Table::create(dir.path().to_path_buf(), productos_schema()).unwrap();
        let csv_path = dir.path().join("rows.csv");
        std::fs::write(&csv_path, "id;nombre;precio\n1;A;10.0\n").unwrap();

        let config = StoreConfig::default();
        let report = import_csv(&mut table, &csv_path, &config, None, false).unwrap();
        assert_eq!(report.imported, 1);
    }
}
