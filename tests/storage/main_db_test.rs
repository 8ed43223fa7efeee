use std::fs;

use pulih::{
    storage::{
        header::DatabaseHeader,
        main_db::MainDatabase,
        page_store::PageSource,
    },
    types::{error::DatabaseError, page::PageOrigin, record::TextEncoding, value::Value},
    utils::mock::{FixtureBuilder, TEST_SALT, TempDatabase},
};

const SQL: &str = "CREATE TABLE notes(id INTEGER PRIMARY KEY, body TEXT)";

fn write_fixture(db: &TempDatabase) -> FixtureBuilder {
    let mut fixture = FixtureBuilder::standard().unwrap();
    fixture.create_table("notes", SQL, &[(1, vec![Value::Null, Value::Text("first".to_string())])]);
    fixture.write_main(&db.path).unwrap();
    fixture
}

#[test]
fn test_open_reads_salt_and_page_count() {
    let db = TempDatabase::with_prefix("main_open").unwrap();
    let fixture = write_fixture(&db);

    let main = MainDatabase::open(&db.path, 4096).unwrap();
    assert_eq!(main.salt(), &TEST_SALT);
    assert_eq!(main.page_count(), fixture.page_count() as usize);
    assert_eq!(main.page_size(), 4096);
}

#[test]
fn test_units_iterate_every_page_and_restart() {
    let db = TempDatabase::with_prefix("main_units").unwrap();
    write_fixture(&db);
    let mut main = MainDatabase::open(&db.path, 4096).unwrap();

    let ids: Vec<u32> = main.units().map(|p| p.unwrap().page_id).collect();
    assert_eq!(ids, vec![1, 2]);
    let again: Vec<_> = main.units().collect();
    assert_eq!(again.len(), 2);
    assert!(again.iter().all(|p| p.as_ref().unwrap().origin == PageOrigin::MainDb));
}

#[test]
fn test_page_one_header() {
    let db = TempDatabase::with_prefix("main_header").unwrap();
    let fixture = write_fixture(&db);
    let mut main = MainDatabase::open(&db.path, 4096).unwrap();

    let page = fixture.codec().decrypt(&main.read_page(1).unwrap()).unwrap();
    let header = DatabaseHeader::from_page(&page).unwrap();
    assert_eq!(header.salt, TEST_SALT);
    assert_eq!(header.page_size, 4096);
    assert_eq!(header.reserved_space, 80);
    assert_eq!(header.encoding().unwrap(), TextEncoding::Utf8);
}

#[test]
fn test_truncated_file() {
    let db = TempDatabase::with_prefix("main_truncated").unwrap();
    write_fixture(&db);
    let bytes = fs::read(&db.path).unwrap();
    fs::write(&db.path, &bytes[..bytes.len() - 100]).unwrap();

    let err = MainDatabase::open(&db.path, 4096).unwrap_err();
    assert!(matches!(err, DatabaseError::TruncatedFile { page_size: 4096, .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_empty_file_is_truncated() {
    let db = TempDatabase::with_prefix("main_empty").unwrap();
    fs::write(&db.path, b"").unwrap();
    assert!(matches!(
        MainDatabase::open(&db.path, 4096),
        Err(DatabaseError::TruncatedFile { size: 0, .. })
    ));
}

#[test]
fn test_missing_file_is_io_error() {
    let db = TempDatabase::with_prefix("main_missing").unwrap();
    assert!(matches!(MainDatabase::open(&db.path, 4096), Err(DatabaseError::Io(_))));
}

#[test]
fn test_page_out_of_range() {
    let db = TempDatabase::with_prefix("main_range").unwrap();
    write_fixture(&db);
    let mut main = MainDatabase::open(&db.path, 4096).unwrap();
    assert!(matches!(main.read_page(0), Err(DatabaseError::PageOutOfRange { .. })));
    assert!(matches!(main.read_page(3), Err(DatabaseError::PageOutOfRange { page_id: 3, page_count: 2 })));
}
