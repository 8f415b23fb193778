//! Statement execution and the per-batch response envelope (§10).

use std::path::PathBuf;

use crate::catalog::Catalog;
use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::heap::RecordId;
use crate::sql::csv_import::import_csv;
use crate::sql::lexer::split_statements;
use crate::sql::parser::{parse_statement, schema_from_create, RawValue, SelectColumns, Statement};
use crate::sql::predicate::lower_where_clause;
use crate::value::Value;

/// One statement's result, tagged by operation kind (§10, GLOSSARY
/// "Statement outcome").
#[derive(Debug, Clone)]
pub enum StatementOutcome {
    Created { table: String },
    Inserted { table: String, ids: Vec<RecordId> },
    Selected { table: String, ids: Vec<RecordId>, requested_attributes: Option<Vec<String>> },
    Deleted { table: String, ids: Vec<RecordId> },
    Imported { csv_file: String, imported: usize, failed: Vec<(usize, String)> },
    Failed { message: String },
}

fn raw_value_to_text(raw: &RawValue) -> String {
    match raw {
        RawValue::Str(s) => s.clone(),
        RawValue::Num(n) => n.clone(),
    }
}

fn coerce_row(schema: &crate::schema::Schema, raw_row: &[RawValue], columns: &Option<Vec<String>>) -> StoreResult<Vec<Value>> {
    let target_order: Vec<&str> = match columns {
        Some(cols) => cols.iter().map(|s| s.as_str()).collect(),
        None => schema.attributes.iter().map(|a| a.name.as_str()).collect(),
    };
    if target_order.len() != raw_row.len() {
        return Err(StoreError::SchemaMismatch(format!(
            "expected {} values, got {}",
            target_order.len(),
            raw_row.len()
        )));
    }
    let mut row = vec![None; schema.attributes.len()];
    for (col_name, raw) in target_order.iter().zip(raw_row.iter()) {
        let attr_index = schema.attr_index(col_name)?;
        let attr = &schema.attributes[attr_index];
        let text = raw_value_to_text(raw);
        row[attr_index] = Some(Value::coerce(&text, &attr.data_type)?);
    }
    row.into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| StoreError::SchemaMismatch(format!("missing value for column '{}'", schema.attributes[i].name))))
        .collect()
}

fn run_statement(catalog: &mut Catalog, config: &StoreConfig, statement: Statement) -> StoreResult<StatementOutcome> {
    match statement {
        Statement::CreateTable { name, columns } => {
            let schema = schema_from_create(name.clone(), columns);
            catalog.create_table(schema)?;
            Ok(StatementOutcome::Created { table: name })
        }
        Statement::Insert { table, columns, rows } => {
            let handle = catalog.table_mut(&table).ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
            let schema = handle.schema.clone();
            let mut ids = Vec::with_capacity(rows.len());
            for raw_row in &rows {
                let row = coerce_row(&schema, raw_row, &columns)?;
                ids.push(handle.insert(&row)?);
            }
            Ok(StatementOutcome::Inserted { table, ids })
        }
        Statement::Select { table, columns, where_clause } => {
            let handle = catalog.table(&table).ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
            let predicates = match &where_clause {
                Some(clause) => lower_where_clause(&handle.schema, clause)?,
                None => crate::table::Predicates::default(),
            };
            tracing::debug!(
                table = %table,
                equals = predicates.equals.len(),
                ranges = predicates.ranges.len(),
                spatials = predicates.spatials.len(),
                "predicate triple after lowering"
            );
            let ids = handle.select(&predicates)?;
            let requested_attributes = match columns {
                SelectColumns::All => None,
                SelectColumns::Named(cols) => Some(cols),
            };
            Ok(StatementOutcome::Selected { table, ids, requested_attributes })
        }
        Statement::Delete { table, where_clause } => {
            let handle = catalog.table_mut(&table).ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
            let Some(clause) = where_clause else {
                return Err(StoreError::UnsupportedOperation(
                    "DELETE without WHERE is refused".to_string(),
                ));
            };
            let predicates = lower_where_clause(&handle.schema, &clause)?;
            let ids = handle.delete_where(&predicates)?;
            Ok(StatementOutcome::Deleted { table, ids })
        }
        Statement::ImportCsv { path, table, delimiter, encoding: _, no_header } => {
            let handle = catalog.table_mut(&table).ok_or_else(|| StoreError::TableNotFound(table.clone()))?;
            let report = import_csv(handle, &PathBuf::from(&path), config, delimiter, no_header)?;
            Ok(StatementOutcome::Imported { csv_file: path, imported: report.imported, failed: report.failed })
        }
    }
}

/// Splits `sql` into statements, parses and executes each independently,
/// and returns one [`StatementOutcome`] per statement — a parse or
/// execution failure in one statement becomes a `Failed` entry rather than
/// aborting the rest of the batch (§7, §10).
pub fn execute_batch(catalog: &mut Catalog, config: &StoreConfig, sql: &str) -> Vec<StatementOutcome> {
    let stripped = crate::sql::lexer::strip_comments(sql);
    split_statements(&stripped)
        .iter()
        .map(|stmt| {
            let parsed = parse_statement(stmt);
            if let Ok(parsed) = &parsed {
                tracing::debug!(kind = statement_kind(parsed), table = statement_table(parsed), "statement received");
            }
            match parsed.and_then(|parsed| run_statement(catalog, config, parsed)) {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::warn!(error = %e, "statement in batch failed");
                    StatementOutcome::Failed { message: e.to_string() }
                }
            }
        })
        .collect()
}

fn statement_kind(statement: &Statement) -> &'static str {
    match statement {
        Statement::CreateTable { .. } => "CREATE TABLE",
        Statement::Insert { .. } => "INSERT",
        Statement::Select { .. } => "SELECT",
        Statement::Delete { .. } => "DELETE",
        Statement::ImportCsv { .. } => "IMPORT",
    }
}

fn statement_table(statement: &Statement) -> &str {
    match statement {
        Statement::CreateTable { name, .. } => name,
        Statement::Insert { table, .. } => table,
        Statement::Select { table, .. } => table,
        Statement::Delete { table, .. } => table,
        Statement::ImportCsv { table, .. } => table,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn batch_creates_inserts_and_selects() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        let config = StoreConfig::new(dir.path());

        let outcomes = execute_batch(
            &mut catalog,
            &config,
            "CREATE TABLE Productos (id INT PRIMARY KEY, nombre VARCHAR INDEX hash, precio DECIMAL INDEX btree);
             INSERT INTO Productos VALUES (1, 'A', 10.0), (2, 'B', 20.0);
             SELECT * FROM Productos WHERE precio BETWEEN 15.0 AND 25.0;",
        );
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], StatementOutcome::Created { .. }));
        match &outcomes[1] {
            StatementOutcome::Inserted { ids, .. } => assert_eq!(ids.len(), 2),
            _ => panic!("expected Inserted"),
        }
        match &outcomes[2] {
            StatementOutcome::Selected { ids, .. } => assert_eq!(ids, &vec![2]),
            _ => panic!("expected Selected"),
        }
    }

    #[test]
    fn one_bad_statement_does_not_abort_the_batch() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        let config = StoreConfig::new(dir.path());

        let outcomes = execute_batch(&mut catalog, &config, "SELECT * FROM NoSuchTable; SELECT 1 FROM NoSuchTable;");
        assert_eq!(outcomes.len(), 2);
        assert!(matches!(outcomes[0], StatementOutcome::Failed { .. }));
        assert!(matches!(outcomes[1], StatementOutcome::Failed { .. }));
    }

    #[test]
    fn delete_without_where_is_refused() {
        let dir = tempdir().unwrap();
        let mut catalog = Catalog::open(dir.path()).unwrap();
        let config = StoreConfig::new(dir.path());
        execute_batch(&mut catalog, &config, "CREATE TABLE T (id INT PRIMARY KEY);");

        let outcomes = execute_batch(&mut catalog, &config, "DELETE FROM T;");
        match &outcomes[0] {
            StatementOutcome::Failed { message } => assert!(message.contains("WHERE")),
            _ => panic!("expected Failed"),
        }
    }
}
