//! Hand-rolled SQL front end (§6, §10): lexer, statement parser,
//! WHERE-clause lowering, CSV import, and batch execution.

pub mod csv_import;
pub mod engine;
pub mod lexer;
pub mod parser;
pub mod predicate;

pub use csv_import::{import_csv, ImportReport};
pub use engine::{execute_batch, StatementOutcome};
pub use parser::{parse_statement, schema_from_create, ColumnDef, SelectColumns, Statement};
pub use predicate::lower_where_clause;
