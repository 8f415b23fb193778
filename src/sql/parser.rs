//! Statement parser for the SQL subset of §6.
//!
//! Parses one already comment-stripped, single statement (no trailing `;`)
//! into a [`Statement`]. WHERE clauses are kept as raw text — lowering
//! happens in [`crate::sql::predicate`], which needs paren/quote-balanced
//! scanning to pull `RADIUS(...)`/`KNN(...)` calls apart from the rest.

use crate::error::{StoreError, StoreResult};
use crate::schema::{Attribute, DataType, IndexKind, Schema};
use crate::sql::lexer::{tokenize, Token};

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub is_key: bool,
    pub index_kind: Option<IndexKind>,
}

#[derive(Debug, Clone)]
pub enum SelectColumns {
    All,
    Named(Vec<String>),
}

#[derive(Debug, Clone)]
pub enum Statement {
    CreateTable { name: String, columns: Vec<ColumnDef> },
    Insert { table: String, columns: Option<Vec<String>>, rows: Vec<Vec<RawValue>> },
    Select { table: String, columns: SelectColumns, where_clause: Option<String> },
    Delete { table: String, where_clause: Option<String> },
    ImportCsv { path: String, table: String, delimiter: Option<u8>, encoding: Option<String>, no_header: bool },
}

/// A literal straight off the parser, not yet coerced to its column's type.
#[derive(Debug, Clone)]
pub enum RawValue {
    Str(String),
    Num(String),
}

/// Finds the first top-level (outside quotes) case-insensitive occurrence
/// of `keyword` surrounded by word boundaries, splitting `s` around it.
fn split_at_keyword_ci(s: &str, keyword: &str) -> Option<(String, String)> {
    let chars: Vec<char> = s.chars().collect();
    let kw_upper = keyword.to_ascii_uppercase();
    let kw_len = kw_upper.chars().count();
    let mut in_string: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = in_string {
            if c == q {
                in_string = None;
            }
            i += 1;
            continue;
        }
        if c == '\'' || c == '"' {
            in_string = Some(c);
            i += 1;
            continue;
        }
        if i + kw_len <= chars.len() {
            let candidate: String = chars[i..i + kw_len].iter().collect();
            let boundary_before = i == 0 || !chars[i - 1].is_alphanumeric() && chars[i - 1] != '_';
            let boundary_after = i + kw_len == chars.len() || (!chars[i + kw_len].is_alphanumeric() && chars[i + kw_len] != '_');
            if candidate.eq_ignore_ascii_case(&kw_upper) && boundary_before && boundary_after {
                let before: String = chars[..i].iter().collect();
                let after: String = chars[i + kw_len..].iter().collect();
                return Some((before, after));
            }
        }
        i += 1;
    }
    None
}

fn leading_keyword(stmt: &str) -> String {
    stmt.trim().split_whitespace().next().unwrap_or("").to_ascii_uppercase()
}

pub fn parse_statement(stmt: &str) -> StoreResult<Statement> {
    let stmt = stmt.trim();
    match leading_keyword(stmt).as_str() {
        "CREATE" => parse_create_table(stmt),
        "INSERT" => parse_insert(stmt),
        "SELECT" => parse_select(stmt),
        "DELETE" => parse_delete(stmt),
        "IMPORT" => parse_import_csv(stmt),
        other => Err(StoreError::ParseError(format!("unrecognized statement keyword '{other}'"))),
    }
}

fn parse_create_table(stmt: &str) -> StoreResult<Statement> {
    let tokens = tokenize(stmt);
    let mut pos = 0;
    expect_word(&tokens, &mut pos, "CREATE")?;
    expect_word(&tokens, &mut pos, "TABLE")?;
    let name = expect_ident(&tokens, &mut pos)?;
    expect_punct(&tokens, &mut pos, '(')?;

    let mut columns = Vec::new();
    loop {
        let col_name = expect_ident(&tokens, &mut pos)?;
        let data_type = parse_data_type(&tokens, &mut pos)?;
        let mut is_key = false;
        let mut index_kind = None;
        loop {
            if peek_word_ci(&tokens, pos, "PRIMARY") {
                pos += 1;
                expect_word(&tokens, &mut pos, "KEY")?;
                is_key = true;
            } else if peek_word_ci(&tokens, pos, "KEY") {
                pos += 1;
                is_key = true;
            } else if peek_word_ci(&tokens, pos, "INDEX") {
                pos += 1;
                let kind_word = expect_ident(&tokens, &mut pos)?;
                index_kind = Some(parse_index_kind(&kind_word)?);
            } else {
                break;
            }
        }
        columns.push(ColumnDef { name: col_name, data_type, is_key, index_kind });
        if peek_punct(&tokens, pos, ',') {
            pos += 1;
            continue;
        }
        break;
    }
    expect_punct(&tokens, &mut pos, ')')?;
    Ok(Statement::CreateTable { name, columns })
}

fn parse_data_type(tokens: &[Token], pos: &mut usize) -> StoreResult<DataType> {
    let word = expect_ident(tokens, pos)?;
    let upper = word.to_ascii_uppercase();
    match upper.as_str() {
        "INT" => Ok(DataType::Int),
        "DECIMAL" | "DOUBLE" => Ok(DataType::Decimal),
        "BOOL" | "BOOLEAN" => Ok(DataType::Bool),
        "DATE" => Ok(DataType::Date),
        "POINT" => Ok(DataType::Point),
        "CHAR" | "VARCHAR" => {
            let n = parse_bracketed_size(tokens, pos)?;
            if upper == "CHAR" {
                Ok(DataType::Char(n))
            } else {
                Ok(DataType::Varchar(n))
            }
        }
        other => Err(StoreError::ParseError(format!("unknown column type '{other}'"))),
    }
}

/// `CHAR[n]`/`VARCHAR[n]` carry their size as `[`, a number, `]` right after
/// the type word; a bare `CHAR`/`VARCHAR` with no brackets defaults to 255.
fn parse_bracketed_size(tokens: &[Token], pos: &mut usize) -> StoreResult<usize> {
    if !peek_punct(tokens, *pos, '[') {
        return Ok(255);
    }
    *pos += 1;
    let n = match tokens.get(*pos) {
        Some(Token::Num(n)) => n.parse::<usize>().map_err(|_| StoreError::ParseError(format!("invalid size '{n}'")))?,
        other => return Err(StoreError::ParseError(format!("expected a size, found {other:?}"))),
    };
    *pos += 1;
    expect_punct(tokens, pos, ']')?;
    Ok(n)
}

fn parse_index_kind(word: &str) -> StoreResult<IndexKind> {
    match word.to_ascii_lowercase().as_str() {
        "hash" => Ok(IndexKind::Hash),
        "avl" => Ok(IndexKind::Avl),
        "btree" => Ok(IndexKind::Btree),
        "isam" => Ok(IndexKind::Isam),
        "rtree" => Ok(IndexKind::Rtree),
        other => Err(StoreError::ParseError(format!("unknown index kind '{other}'"))),
    }
}

fn parse_insert(stmt: &str) -> StoreResult<Statement> {
    let (head, values_part) = split_at_keyword_ci(stmt, "VALUES")
        .ok_or_else(|| StoreError::ParseError("INSERT missing VALUES".to_string()))?;
    let head_tokens = tokenize(&head);
    let mut pos = 0;
    expect_word(&head_tokens, &mut pos, "INSERT")?;
    expect_word(&head_tokens, &mut pos, "INTO")?;
    let table = expect_ident(&head_tokens, &mut pos)?;
    let columns = if peek_punct(&head_tokens, pos, '(') {
        pos += 1;
        let mut cols = Vec::new();
        loop {
            cols.push(expect_ident(&head_tokens, &mut pos)?);
            if peek_punct(&head_tokens, pos, ',') {
                pos += 1;
                continue;
            }
            break;
        }
        expect_punct(&head_tokens, &mut pos, ')')?;
        Some(cols)
    } else {
        None
    };

    let value_tokens = tokenize(&values_part);
    let mut vpos = 0;
    let mut rows = Vec::new();
    loop {
        expect_punct(&value_tokens, &mut vpos, '(')?;
        let mut row = Vec::new();
        loop {
            match value_tokens.get(vpos) {
                Some(Token::Str(s)) => {
                    row.push(RawValue::Str(s.clone()));
                    vpos += 1;
                }
                Some(Token::Num(n)) => {
                    row.push(RawValue::Num(n.clone()));
                    vpos += 1;
                }
                Some(Token::Word(w)) => {
                    row.push(RawValue::Str(w.clone()));
                    vpos += 1;
                }
                other => {
                    return Err(StoreError::ParseError(format!("expected a value, found {other:?}")));
                }
            }
            if peek_punct(&value_tokens, vpos, ',') {
                vpos += 1;
                continue;
            }
            break;
        }
        expect_punct(&value_tokens, &mut vpos, ')')?;
        rows.push(row);
        if peek_punct(&value_tokens, vpos, ',') {
            vpos += 1;
            continue;
        }
        break;
    }
    Ok(Statement::Insert { table, columns, rows })
}

fn parse_select(stmt: &str) -> StoreResult<Statement> {
    let (before_where, where_clause) = match split_at_keyword_ci(stmt, "WHERE") {
        Some((b, w)) => (b, Some(w.trim().to_string())),
        None => (stmt.to_string(), None),
    };
    let (select_part, from_part) = split_at_keyword_ci(&before_where, "FROM")
        .ok_or_else(|| StoreError::ParseError("SELECT missing FROM".to_string()))?;

    let select_tokens = tokenize(&select_part);
    let mut pos = 0;
    expect_word(&select_tokens, &mut pos, "SELECT")?;
    let columns = if peek_punct(&select_tokens, pos, '*') {
        SelectColumns::All
    } else {
        let mut cols = Vec::new();
        loop {
            cols.push(expect_ident(&select_tokens, &mut pos)?);
            if peek_punct(&select_tokens, pos, ',') {
                pos += 1;
                continue;
            }
            break;
        }
        SelectColumns::Named(cols)
    };

    let from_tokens = tokenize(&from_part);
    let mut fpos = 0;
    let table = expect_ident(&from_tokens, &mut fpos)?;

    Ok(Statement::Select { table, columns, where_clause })
}

fn parse_delete(stmt: &str) -> StoreResult<Statement> {
    let (before_where, where_clause) = match split_at_keyword_ci(stmt, "WHERE") {
        Some((b, w)) => (b, Some(w.trim().to_string())),
        None => (stmt.to_string(), None),
    };
    let (_, from_part) = split_at_keyword_ci(&before_where, "FROM")
        .ok_or_else(|| StoreError::ParseError("DELETE missing FROM".to_string()))?;
    let from_tokens = tokenize(&from_part);
    let mut pos = 0;
    let table = expect_ident(&from_tokens, &mut pos)?;
    Ok(Statement::Delete { table, where_clause })
}

fn parse_import_csv(stmt: &str) -> StoreResult<Statement> {
    let (head, path_and_rest) = split_at_keyword_ci(stmt, "FROM")
        .ok_or_else(|| StoreError::ParseError("IMPORT missing FROM".to_string()))?;
    let head_tokens = tokenize(&head);
    let mut pos = 0;
    expect_word(&head_tokens, &mut pos, "IMPORT")?;

    let path_tokens = tokenize(&path_and_rest);
    let mut ppos = 0;
    expect_word(&path_tokens, &mut ppos, "CSV")?;
    let path = match path_tokens.get(ppos) {
        Some(Token::Str(s)) => {
            ppos += 1;
            s.clone()
        }
        other => return Err(StoreError::ParseError(format!("expected CSV path, found {other:?}"))),
    };
    expect_word(&path_tokens, &mut ppos, "INTO")?;
    let table = expect_ident(&path_tokens, &mut ppos)?;

    let mut delimiter = None;
    let mut encoding = None;
    let mut no_header = false;
    if peek_word_ci(&path_tokens, ppos, "WITH") {
        ppos += 1;
        loop {
            if peek_word_ci(&path_tokens, ppos, "DELIMITER") {
                ppos += 1;
                match path_tokens.get(ppos) {
                    Some(Token::Str(s)) if !s.is_empty() => {
                        delimiter = Some(s.as_bytes()[0]);
                        ppos += 1;
                    }
                    other => return Err(StoreError::ParseError(format!("expected delimiter string, found {other:?}"))),
                }
            } else if peek_word_ci(&path_tokens, ppos, "ENCODING") {
                ppos += 1;
                match path_tokens.get(ppos) {
                    Some(Token::Str(s)) => {
                        encoding = Some(s.clone());
                        ppos += 1;
                    }
                    other => return Err(StoreError::ParseError(format!("expected encoding string, found {other:?}"))),
                }
            } else if peek_word_ci(&path_tokens, ppos, "NO_HEADER") {
                ppos += 1;
                no_header = true;
            } else {
                break;
            }
        }
    }

    Ok(Statement::ImportCsv { path, table, delimiter, encoding, no_header })
}

fn expect_word(tokens: &[Token], pos: &mut usize, word: &str) -> StoreResult<()> {
    match tokens.get(*pos) {
        Some(t) if t.is_word_ci(word) => {
            *pos += 1;
            Ok(())
        }
        other => Err(StoreError::ParseError(format!("expected '{word}', found {other:?}"))),
    }
}

fn expect_ident(tokens: &[Token], pos: &mut usize) -> StoreResult<String> {
    match tokens.get(*pos) {
        Some(Token::Word(w)) => {
            *pos += 1;
            Ok(w.clone())
        }
        other => Err(StoreError::ParseError(format!("expected identifier, found {other:?}"))),
    }
}

fn expect_punct(tokens: &[Token], pos: &mut usize, c: char) -> StoreResult<()> {
    match tokens.get(*pos) {
        Some(Token::Punct(p)) if *p == c => {
            *pos += 1;
            Ok(())
        }
        other => Err(StoreError::ParseError(format!("expected '{c}', found {other:?}"))),
    }
}

fn peek_punct(tokens: &[Token], pos: usize, c: char) -> bool {
    matches!(tokens.get(pos), Some(Token::Punct(p)) if *p == c)
}

fn peek_word_ci(tokens: &[Token], pos: usize, word: &str) -> bool {
    matches!(tokens.get(pos), Some(t) if t.is_word_ci(word))
}

/// Builds a [`Schema`] from a parsed `CREATE TABLE` statement.
pub fn schema_from_create(name: String, columns: Vec<ColumnDef>) -> Schema {
    let attributes = columns
        .into_iter()
        .map(|c| {
            let mut attr = Attribute::new(c.name, c.data_type);
            if c.is_key {
                attr = attr.primary_key();
            }
            if let Some(kind) = c.index_kind {
                attr = attr.indexed(kind);
            }
            attr
        })
        .collect();
    Schema::new(name, attributes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_create_table_with_index_clauses() {
        let stmt = parse_statement(
            "CREATE TABLE Productos (id INT PRIMARY KEY, nombre VARCHAR[50] INDEX avl, precio DECIMAL INDEX btree)",
        )
        .unwrap();
        match stmt {
            Statement::CreateTable { name, columns } => {
                assert_eq!(name, "Productos");
                assert_eq!(columns.len(), 3);
                assert!(columns[0].is_key);
                assert_eq!(columns[1].index_kind, Some(IndexKind::Avl));
                assert!(matches!(columns[1].data_type, DataType::Varchar(50)));
            }
            _ => panic!("expected CreateTable"),
        }
    }

    #[test]
    fn parses_insert_multi_row() {
        let stmt = parse_statement("INSERT INTO Productos VALUES (1,'A',10.0), (2,'B',20.0)").unwrap();
        match stmt {
            Statement::Insert { rows, .. } => assert_eq!(rows.len(), 2),
            _ => panic!("expected Insert"),
        }
    }

    #[test]
    fn parses_select_with_where() {
        let stmt = parse_statement("SELECT * FROM Productos WHERE nombre = 'A'").unwrap();
        match stmt {
            Statement::Select { table, where_clause, .. } => {
                assert_eq!(table, "Productos");
                assert!(where_clause.unwrap().contains("nombre"));
            }
            _ => panic!("expected Select"),
        }
    }

    #[test]
    fn parses_delete_requires_where_text_present() {
        let stmt = parse_statement("DELETE FROM Productos WHERE id = 2").unwrap();
        match stmt {
            Statement::Delete { where_clause, .. } => assert!(where_clause.is_some()),
            _ => panic!("expected Delete"),
        }
    }

    #[test]
    fn parses_import_csv_with_options() {
        let stmt = parse_statement("IMPORT FROM CSV 'x.csv' INTO Productos WITH DELIMITER ';' NO_HEADER").unwrap();
        match stmt {
            Statement::ImportCsv { path, delimiter, no_header, .. } => {
                assert_eq!(path, "x.csv");
                assert_eq!(delimiter, Some(b';'));
                assert!(no_header);
            }
            _ => panic!("expected ImportCsv"),
        }
    }
}
