use serde::Serialize;
use sqlparser::{
    dialect::SQLiteDialect,
    tokenizer::{Token, Tokenizer},
};
use tracing::debug;

use crate::{
    executor::sequential_scan::TableScanner,
    storage::page_store::PageFetcher,
    types::{
        PageId, RowId,
        error::{DatabaseError, RecoveryWarning, Result},
        record::TextEncoding,
        row::Row,
        value::{DataType, Value},
    },
};

pub const SCHEMA_TABLE: &str = "sqlite_schema";

/// Where a column's value comes from when a row is materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnSlot {
    /// `INTEGER PRIMARY KEY`: stored as NULL, the value is the rowid.
    RowidAlias,
    /// Index into the record's value list.
    Record(usize),
    /// `GENERATED ALWAYS AS (...) VIRTUAL`: never stored.
    Virtual,
}

/// Represents a column definition in a table schema
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnSchema {
    pub name: String,
    pub declared_type: Option<String>,
    pub affinity: DataType,
    pub position: usize,
    pub slot: ColumnSlot,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub root_page: PageId,
    pub sql: String,
    pub columns: Vec<ColumnSchema>,
    pub without_rowid: bool,
}

struct ColumnDraft {
    name: String,
    declared_type: Option<String>,
    primary_key: bool,
    descending: bool,
    generated: Option<bool>, // Some(stored)
}

const COLUMN_CONSTRAINTS: &[&str] = &[
    "CONSTRAINT", "PRIMARY", "NOT", "NULL", "UNIQUE", "CHECK", "DEFAULT", "COLLATE", "REFERENCES",
    "GENERATED", "AS",
];
const TABLE_CONSTRAINTS: &[&str] = &["CONSTRAINT", "PRIMARY", "UNIQUE", "CHECK", "FOREIGN"];

fn keyword(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) if w.quote_style.is_none() => Some(w.value.to_ascii_uppercase()),
        _ => None,
    }
}

fn identifier(token: &Token) -> Option<String> {
    match token {
        Token::Word(w) => Some(w.value.clone()),
        Token::SingleQuotedString(s) => Some(s.clone()),
        _ => None,
    }
}

impl TableSchema {
    /// Pseudo-schema of the catalog table rooted at page 1.
    pub fn sqlite_schema() -> Self {
        let columns = ["type", "name", "tbl_name", "rootpage", "sql"]
            .iter()
            .enumerate()
            .map(|(position, name)| ColumnSchema {
                name: name.to_string(),
                declared_type: Some(if *name == "rootpage" { "INT" } else { "TEXT" }.to_string()),
                affinity: if *name == "rootpage" { DataType::Integer } else { DataType::Text },
                position,
                slot: ColumnSlot::Record(position),
            })
            .collect();
        Self {
            name: SCHEMA_TABLE.to_string(),
            root_page: 1,
            sql: String::new(),
            columns,
            without_rowid: false,
        }
    }

    /// Builds the column layout from a `CREATE TABLE` statement as stored
    /// in `sqlite_schema.sql`.
    pub fn from_sql(name: &str, root_page: PageId, sql: &str) -> Result<Self> {
        let dialect = SQLiteDialect {};
        let tokens: Vec<Token> = Tokenizer::new(&dialect, sql)
            .tokenize()
            .map_err(|e| DatabaseError::SqlParseError {
                details: format!("{name}: {e}"),
            })?
            .into_iter()
            .filter(|t| !matches!(t, Token::Whitespace(_)))
            .collect();

        let open = tokens
            .iter()
            .position(|t| *t == Token::LParen)
            .ok_or_else(|| DatabaseError::SqlParseError {
                details: format!("{name}: no column list"),
            })?;

        let mut segments: Vec<Vec<Token>> = vec![Vec::new()];
        let mut depth = 0usize;
        let mut close = None;
        for (i, token) in tokens.iter().enumerate().skip(open + 1) {
            match token {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => {
                    close = Some(i);
                    break;
                }
                Token::RParen => depth -= 1,
                Token::Comma if depth == 0 => {
                    segments.push(Vec::new());
                    continue;
                }
                _ => {}
            }
            if let Some(segment) = segments.last_mut() {
                segment.push(token.clone());
            }
        }
        let close = close.ok_or_else(|| DatabaseError::SqlParseError {
            details: format!("{name}: unbalanced parentheses"),
        })?;

        let tail: Vec<String> = tokens[close + 1..].iter().filter_map(keyword).collect();
        let without_rowid = tail.windows(2).any(|w| w[0] == "WITHOUT" && w[1] == "ROWID");

        let mut drafts = Vec::new();
        let mut table_primary_key: Vec<String> = Vec::new();
        for segment in segments.into_iter().filter(|s| !s.is_empty()) {
            let lead = keyword(&segment[0]);
            if lead.as_deref().is_some_and(|k| TABLE_CONSTRAINTS.contains(&k)) {
                let words: Vec<Option<String>> = segment.iter().map(keyword).collect();
                let is_pk = words
                    .windows(2)
                    .any(|w| w[0].as_deref() == Some("PRIMARY") && w[1].as_deref() == Some("KEY"));
                if is_pk {
                    table_primary_key = primary_key_columns(&segment);
                }
                continue;
            }
            drafts.push(parse_column(&segment).ok_or_else(|| DatabaseError::SqlParseError {
                details: format!("{name}: cannot read column definition"),
            })?);
        }
        if drafts.is_empty() {
            return Err(DatabaseError::SqlParseError {
                details: format!("{name}: no columns"),
            });
        }

        let is_integer = |d: &ColumnDraft| {
            d.declared_type
                .as_deref()
                .is_some_and(|t| t.eq_ignore_ascii_case("INTEGER"))
        };
        let alias = if without_rowid {
            None
        } else if let [only] = table_primary_key.as_slice() {
            drafts
                .iter()
                .position(|d| d.name.eq_ignore_ascii_case(only) && is_integer(d))
        } else {
            let keyed: Vec<usize> = drafts
                .iter()
                .enumerate()
                .filter(|(_, d)| d.primary_key)
                .map(|(i, _)| i)
                .collect();
            match keyed.as_slice() {
                [i] if is_integer(&drafts[*i]) && !drafts[*i].descending => Some(*i),
                _ => None,
            }
        };

        let mut next_slot = 0;
        let columns = drafts
            .into_iter()
            .enumerate()
            .map(|(position, draft)| {
                let slot = if draft.generated == Some(false) {
                    ColumnSlot::Virtual
                } else {
                    let record = next_slot;
                    next_slot += 1;
                    if alias == Some(position) {
                        ColumnSlot::RowidAlias
                    } else {
                        ColumnSlot::Record(record)
                    }
                };
                ColumnSchema {
                    affinity: DataType::from_declared(draft.declared_type.as_deref()),
                    name: draft.name,
                    declared_type: draft.declared_type,
                    position,
                    slot,
                }
            })
            .collect();

        Ok(Self {
            name: name.to_string(),
            root_page,
            sql: sql.to_string(),
            columns,
            without_rowid,
        })
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    /// Maps raw record values onto the declared columns. Columns added by
    /// a later `ALTER TABLE ADD COLUMN` are missing from older records and
    /// read as NULL. Integers read from a REAL column come back as reals.
    pub fn materialize(&self, row_id: RowId, record: Vec<Value>) -> Row {
        let mut record: Vec<Option<Value>> = record.into_iter().map(Some).collect();
        let values = self
            .columns
            .iter()
            .map(|column| match column.slot {
                ColumnSlot::RowidAlias => Value::Integer(row_id),
                ColumnSlot::Record(i) => match record.get_mut(i).and_then(Option::take) {
                    // REAL columns store integral values as integers on disk
                    Some(Value::Integer(n)) if column.affinity == DataType::Real => Value::Real(n as f64),
                    value => value.unwrap_or(Value::Null),
                },
                ColumnSlot::Virtual => Value::Null,
            })
            .collect();
        Row::new(self.name.clone(), row_id, values)
    }
}

fn primary_key_columns(segment: &[Token]) -> Vec<String> {
    let Some(open) = segment.iter().position(|t| *t == Token::LParen) else {
        return Vec::new();
    };
    let mut columns = Vec::new();
    let mut expect_name = true;
    for token in &segment[open + 1..] {
        match token {
            Token::RParen => break,
            Token::Comma => expect_name = true,
            t if expect_name => {
                if let Some(name) = identifier(t) {
                    columns.push(name);
                }
                expect_name = false;
            }
            _ => {}
        }
    }
    columns
}

fn parse_column(segment: &[Token]) -> Option<ColumnDraft> {
    let name = identifier(segment.first()?)?;
    let mut draft = ColumnDraft {
        name,
        declared_type: None,
        primary_key: false,
        descending: false,
        generated: None,
    };

    let mut rest = segment[1..].iter().peekable();
    let mut type_words = Vec::new();
    let mut depth = 0usize;
    while let Some(token) = rest.peek() {
        if depth == 0 && keyword(token).is_some_and(|k| COLUMN_CONSTRAINTS.contains(&k.as_str())) {
            break;
        }
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            Token::Word(w) if depth == 0 => type_words.push(w.value.clone()),
            _ => {}
        }
        rest.next();
    }
    if !type_words.is_empty() {
        draft.declared_type = Some(type_words.join(" "));
    }

    let mut depth = 0usize;
    let mut previous: Option<String> = None;
    for token in rest {
        match token {
            Token::LParen => depth += 1,
            Token::RParen => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                let word = keyword(token);
                match word.as_deref() {
                    Some("KEY") if previous.as_deref() == Some("PRIMARY") => draft.primary_key = true,
                    Some("DESC") if draft.primary_key => draft.descending = true,
                    Some("GENERATED") | Some("AS") => draft.generated = draft.generated.or(Some(false)),
                    Some("STORED") if draft.generated.is_some() => draft.generated = Some(true),
                    _ => {}
                }
                previous = word;
            }
            _ => {}
        }
    }
    Some(draft)
}

/// Tables of one database version, read from `sqlite_schema`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaCatalog {
    tables: Vec<TableSchema>,
}

impl SchemaCatalog {
    pub fn load<F: PageFetcher>(fetcher: &mut F, encoding: TextEncoding) -> (Self, Vec<RecoveryWarning>) {
        let schema = TableSchema::sqlite_schema();
        let mut warnings = Vec::new();
        let mut rows = Vec::new();
        for result in TableScanner::new(fetcher, &schema, encoding).into_rows() {
            match result {
                Ok(row) => rows.push(row),
                Err(e) => warnings.push(RecoveryWarning::from_error(&e, Some(SCHEMA_TABLE), 1, None)),
            }
        }
        let (catalog, mut skipped) = Self::from_rows(rows);
        warnings.append(&mut skipped);
        (catalog, warnings)
    }

    pub fn from_rows(rows: impl IntoIterator<Item = Row>) -> (Self, Vec<RecoveryWarning>) {
        let mut tables: Vec<TableSchema> = Vec::new();
        let mut warnings = Vec::new();

        for row in rows {
            let kind = row.get_value(0).and_then(Value::as_str);
            let name = row.get_value(1).and_then(Value::as_str);
            let root = row.get_value(3).and_then(Value::as_i64);
            let sql = row.get_value(4).and_then(Value::as_str);
            let (Some("table"), Some(name), Some(root), Some(sql)) = (kind, name, root, sql) else {
                continue;
            };
            if name.starts_with("sqlite_") {
                continue;
            }
            if root <= 0 {
                debug!(table = name, "skipping virtual table");
                continue;
            }
            let Ok(root) = PageId::try_from(root) else {
                warnings.push(RecoveryWarning::TableSkipped {
                    table: name.to_string(),
                    reason: format!("root page {root} out of range"),
                });
                continue;
            };
            match TableSchema::from_sql(name, root, sql) {
                Ok(table) if table.without_rowid => {
                    debug!(table = name, "skipping WITHOUT ROWID table");
                    warnings.push(RecoveryWarning::TableSkipped {
                        table: name.to_string(),
                        reason: "WITHOUT ROWID tables have no rowid key".to_string(),
                    });
                }
                Ok(table) => {
                    if !tables.iter().any(|t| t.name.eq_ignore_ascii_case(name)) {
                        tables.push(table);
                    }
                }
                Err(e) => warnings.push(RecoveryWarning::TableSkipped {
                    table: name.to_string(),
                    reason: e.to_string(),
                }),
            }
        }
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        (Self { tables }, warnings)
    }

    pub fn table(&self, name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|t| t.name.eq_ignore_ascii_case(name))
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    /// Adds tables known only to `other`, e.g. tables dropped in the live
    /// database that still exist in the main file.
    pub fn merge(&mut self, other: &SchemaCatalog) {
        for table in &other.tables {
            if self.table(&table.name).is_none() {
                self.tables.push(table.clone());
            }
        }
        self.tables.sort_by(|a, b| a.name.cmp(&b.name));
    }
}
