use pulih::{
    storage::schema::{ColumnSlot, SchemaCatalog, TableSchema},
    types::{
        error::{DatabaseError, RecoveryWarning},
        row::Row,
        value::{DataType, Value},
    },
};

fn slots(table: &TableSchema) -> Vec<ColumnSlot> {
    table.columns.iter().map(|c| c.slot).collect()
}

fn schema_row(name: &str, root: i64, sql: &str) -> Row {
    Row::new(
        "sqlite_schema",
        1,
        vec![
            Value::Text("table".to_string()),
            Value::Text(name.to_string()),
            Value::Text(name.to_string()),
            Value::Integer(root),
            Value::Text(sql.to_string()),
        ],
    )
}

#[test]
fn test_integer_primary_key_is_rowid_alias() {
    let table = TableSchema::from_sql(
        "messages",
        4,
        "CREATE TABLE messages(rowid_alias INTEGER PRIMARY KEY ASC, id STRING UNIQUE, body TEXT, sent_at INTEGER)",
    )
    .unwrap();
    assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["rowid_alias", "id", "body", "sent_at"]);
    assert_eq!(
        slots(&table),
        vec![ColumnSlot::RowidAlias, ColumnSlot::Record(1), ColumnSlot::Record(2), ColumnSlot::Record(3)]
    );
    assert_eq!(table.column("ID").unwrap().affinity, DataType::Numeric);
    assert_eq!(table.column("body").unwrap().declared_type.as_deref(), Some("TEXT"));
}

#[test]
fn test_table_level_primary_key() {
    let table = TableSchema::from_sql("t", 2, "CREATE TABLE t(a TEXT, k INTEGER, PRIMARY KEY(k))").unwrap();
    assert_eq!(slots(&table), vec![ColumnSlot::Record(0), ColumnSlot::RowidAlias]);

    let composite =
        TableSchema::from_sql("t", 2, "CREATE TABLE t(a INTEGER, b INTEGER, PRIMARY KEY(a, b))").unwrap();
    assert_eq!(slots(&composite), vec![ColumnSlot::Record(0), ColumnSlot::Record(1)]);
}

#[test]
fn test_non_alias_primary_keys() {
    let desc = TableSchema::from_sql("t", 2, "CREATE TABLE t(id INTEGER PRIMARY KEY DESC, v)").unwrap();
    assert_eq!(desc.column("id").unwrap().slot, ColumnSlot::Record(0));

    let int = TableSchema::from_sql("t", 2, "CREATE TABLE t(id INT PRIMARY KEY, v)").unwrap();
    assert_eq!(int.column("id").unwrap().slot, ColumnSlot::Record(0));
    assert_eq!(int.column("v").unwrap().declared_type, None);
}

#[test]
fn test_generated_columns() {
    let table = TableSchema::from_sql(
        "t",
        2,
        "CREATE TABLE t(id INTEGER PRIMARY KEY, json TEXT, \
         kind TEXT GENERATED ALWAYS AS (json_extract(json, '$.kind')) VIRTUAL, \
         size INTEGER AS (length(json)) STORED, \
         note TEXT)",
    )
    .unwrap();
    assert_eq!(
        slots(&table),
        vec![
            ColumnSlot::RowidAlias,
            ColumnSlot::Record(1),
            ColumnSlot::Virtual,
            ColumnSlot::Record(2),
            ColumnSlot::Record(3),
        ]
    );
}

#[test]
fn test_quoted_identifiers_and_constraints() {
    let table = TableSchema::from_sql(
        "conversations",
        3,
        "CREATE TABLE \"conversations\" (\"id\" STRING PRIMARY KEY ASC, `e164` VARCHAR(20) NOT NULL DEFAULT '', \
         type STRING, CONSTRAINT uniq UNIQUE (e164), FOREIGN KEY (id) REFERENCES other(id))",
    )
    .unwrap();
    assert_eq!(table.column_names().collect::<Vec<_>>(), vec!["id", "e164", "type"]);
    assert_eq!(table.column("e164").unwrap().declared_type.as_deref(), Some("VARCHAR"));
    assert!(slots(&table).iter().all(|s| matches!(s, ColumnSlot::Record(_))));
}

#[test]
fn test_without_rowid_detected() {
    let table =
        TableSchema::from_sql("kv", 5, "CREATE TABLE kv(k TEXT PRIMARY KEY, v BLOB) WITHOUT ROWID").unwrap();
    assert!(table.without_rowid);
}

#[test]
fn test_unparseable_sql() {
    assert!(matches!(
        TableSchema::from_sql("t", 2, "CREATE TABLE t"),
        Err(DatabaseError::SqlParseError { .. })
    ));
    assert!(matches!(
        TableSchema::from_sql("t", 2, "CREATE TABLE t(a TEXT"),
        Err(DatabaseError::SqlParseError { .. })
    ));
}

#[test]
fn test_materialize_fills_alias_and_missing_columns() {
    let table = TableSchema::from_sql(
        "t",
        2,
        "CREATE TABLE t(id INTEGER PRIMARY KEY, a TEXT, b TEXT AS (upper(a)), c INTEGER)",
    )
    .unwrap();
    // older record written before `c` was added
    let row = table.materialize(17, vec![Value::Null, Value::Text("x".to_string())]);
    assert_eq!(row.table, "t");
    assert_eq!(row.row_id, 17);
    assert_eq!(
        row.values,
        vec![Value::Integer(17), Value::Text("x".to_string()), Value::Null, Value::Null]
    );
}

#[test]
fn test_materialize_applies_real_affinity() {
    let table = TableSchema::from_sql("t", 2, "CREATE TABLE t(id INTEGER PRIMARY KEY, r REAL, d DOUBLE, n INTEGER)").unwrap();
    let row = table.materialize(
        3,
        vec![Value::Null, Value::Integer(1), Value::Real(2.5), Value::Integer(4)],
    );
    assert_eq!(
        row.values,
        vec![Value::Integer(3), Value::Real(1.0), Value::Real(2.5), Value::Integer(4)]
    );
}

#[test]
fn test_catalog_skips_internal_virtual_and_without_rowid() {
    let rows = vec![
        schema_row("messages", 4, "CREATE TABLE messages(id STRING, body TEXT)"),
        schema_row("sqlite_sequence", 3, "CREATE TABLE sqlite_sequence(name,seq)"),
        schema_row("messages_fts", 0, "CREATE VIRTUAL TABLE messages_fts USING fts5(body)"),
        schema_row("kv", 6, "CREATE TABLE kv(k TEXT PRIMARY KEY) WITHOUT ROWID"),
        schema_row("broken", 7, "CREATE TABLE broken"),
        Row::new(
            "sqlite_schema",
            9,
            vec![
                Value::Text("index".to_string()),
                Value::Text("idx".to_string()),
                Value::Text("messages".to_string()),
                Value::Integer(8),
                Value::Text("CREATE INDEX idx ON messages(id)".to_string()),
            ],
        ),
    ];
    let (catalog, warnings) = SchemaCatalog::from_rows(rows);
    assert_eq!(catalog.tables().len(), 1);
    assert_eq!(catalog.table("MESSAGES").unwrap().root_page, 4);
    assert!(catalog.table("kv").is_none());

    let skipped: Vec<&str> = warnings
        .iter()
        .filter_map(|w| match w {
            RecoveryWarning::TableSkipped { table, .. } => Some(table.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(skipped, vec!["kv", "broken"]);
}

#[test]
fn test_catalog_merge_keeps_dropped_tables() {
    let (mut live, _) = SchemaCatalog::from_rows(vec![schema_row("a", 2, "CREATE TABLE a(x)")]);
    let (main, _) = SchemaCatalog::from_rows(vec![
        schema_row("a", 2, "CREATE TABLE a(x)"),
        schema_row("b", 3, "CREATE TABLE b(y)"),
    ]);
    live.merge(&main);
    let names: Vec<&str> = live.tables().iter().map(|t| t.name.as_str()).collect();
    assert_eq!(names, vec!["a", "b"]);
}
