use std::fs;

use pulih::{
    storage::wal::{FrameState, WalFile},
    types::{error::DatabaseError, page::PageOrigin, value::Value},
    utils::mock::{FixtureBuilder, TEST_SALT, TempDatabase, WalBuilder, test_key, test_settings},
};

const SQL: &str = "CREATE TABLE notes(id INTEGER PRIMARY KEY, body TEXT)";

fn row(id: i64, body: &str) -> (i64, Vec<Value>) {
    (id, vec![Value::Null, Value::Text(body.to_string())])
}

fn setup(prefix: &str) -> (TempDatabase, FixtureBuilder) {
    let db = TempDatabase::with_prefix(prefix).unwrap();
    let mut fixture = FixtureBuilder::standard().unwrap();
    fixture.create_table("notes", SQL, &[row(1, "one")]);
    fixture.write_main(&db.path).unwrap();
    (db, fixture)
}

fn leaf(fixture: &mut FixtureBuilder, page_id: u32, body: &str) -> Vec<u8> {
    fixture.leaf_frames(page_id, &[row(1, body)]).unwrap().remove(0).1
}

fn states(wal: &WalFile) -> Vec<FrameState> {
    wal.frames().iter().map(|f| f.state).collect()
}

#[test]
fn test_empty_wal_is_valid() {
    let (db, _) = setup("wal_empty");
    fs::write(db.wal_path(), b"").unwrap();
    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert!(wal.header().is_none());
    assert!(wal.frames().is_empty());
    assert_eq!(wal.max_page_id(), 0);
}

#[test]
fn test_committed_and_uncommitted_frames() {
    let (db, mut fixture) = setup("wal_states");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "two"), 2);
    builder.push(2, leaf(&mut fixture, 2, "three"), 0);
    builder.write(&db.wal_path()).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert!(wal.header_checksum_ok());
    assert_eq!(states(&wal), vec![FrameState::Committed, FrameState::Uncommitted]);
    assert_eq!(wal.latest_committed(2), Some(1));
    assert_eq!(wal.latest_committed(5), None);
}

#[test]
fn test_big_endian_checksums() {
    let (db, mut fixture) = setup("wal_be");
    let mut builder = WalBuilder::new(4096).big_endian();
    builder.push(2, leaf(&mut fixture, 2, "two"), 2);
    builder.write(&db.wal_path()).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert!(wal.header().unwrap().big_endian_checksums());
    assert_eq!(states(&wal), vec![FrameState::Committed]);
}

#[test]
fn test_corrupted_frame_breaks_chain() {
    let (db, mut fixture) = setup("wal_corrupt");
    let mut builder = WalBuilder::new(4096);
    for body in ["a", "b", "c"] {
        builder.push(2, leaf(&mut fixture, 2, body), 2);
    }
    let mut bytes = builder.to_bytes();
    bytes[builder.page_offset(2) as usize + 100] ^= 0xff;
    fs::write(db.wal_path(), bytes).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert_eq!(
        states(&wal),
        vec![FrameState::Committed, FrameState::Stale, FrameState::Stale]
    );
    assert_eq!(wal.latest_committed(2), Some(1));
}

#[test]
fn test_old_generation_frames_are_stale() {
    let (db, mut fixture) = setup("wal_generation");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "current"), 2);
    builder.push_with_salts(2, leaf(&mut fixture, 2, "older"), 2, (1, 2));
    builder.write(&db.wal_path()).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert_eq!(states(&wal), vec![FrameState::Committed, FrameState::Stale]);
    // generations do not mix
    assert_eq!(wal.frame_as_of(2, 2), Some(2));
    assert_eq!(wal.txn_end(2), 2);
}

#[test]
fn test_frame_generations_count_resets() {
    let (db, mut fixture) = setup("wal_generation_count");
    let mut builder = WalBuilder::new(4096);
    let (salt1, salt2) = builder.salts();
    builder.push(2, leaf(&mut fixture, 2, "current"), 2);
    builder.push_with_salts(2, leaf(&mut fixture, 2, "one reset"), 2, (salt1 - 1, 7));
    builder.push_with_salts(2, leaf(&mut fixture, 2, "three resets"), 2, (salt1 - 3, 9));
    builder.push_with_salts(2, leaf(&mut fixture, 2, "foreign"), 2, (salt1, salt2 ^ 1));
    builder.write(&db.wal_path()).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    let generations: Vec<u32> = wal.frames().iter().map(|f| f.generation).collect();
    assert_eq!(generations, vec![0, 1, 3, u32::MAX]);
}

#[test]
fn test_transaction_bounds() {
    let (db, mut fixture) = setup("wal_txn");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "a"), 0);
    builder.push(3, leaf(&mut fixture, 3, "b"), 3);
    builder.push(2, leaf(&mut fixture, 2, "c"), 3);
    builder.push(3, leaf(&mut fixture, 3, "d"), 0);
    builder.write(&db.wal_path()).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert_eq!(
        states(&wal),
        vec![
            FrameState::Committed,
            FrameState::Committed,
            FrameState::Committed,
            FrameState::Uncommitted
        ]
    );
    assert_eq!((1..=4).map(|s| wal.txn_end(s)).collect::<Vec<_>>(), vec![2, 2, 3, 4]);
    assert_eq!(wal.frame_as_of(2, 2), Some(1));
    assert_eq!(wal.frame_as_of(2, 3), Some(3));
    assert_eq!(wal.frame_as_of(3, 2), Some(2));
    assert_eq!(wal.latest_committed(3), Some(2));
    assert_eq!(wal.max_page_id(), 3);
}

#[test]
fn test_header_checksum_mismatch() {
    let (db, mut fixture) = setup("wal_header_sum");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "a"), 2);
    let mut bytes = builder.to_bytes();
    bytes[27] ^= 0x01;
    fs::write(db.wal_path(), bytes).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert!(!wal.header_checksum_ok());
    assert_eq!(states(&wal), vec![FrameState::Stale]);
}

#[test]
fn test_salt_mismatch_rejected() {
    let (db, _) = setup("wal_salt");
    let foreign = FixtureBuilder::new(&test_key(), test_settings(), *b"another-db-salt!").unwrap();
    let mut builder = WalBuilder::new(4096);
    builder.push(1, foreign.page(1).unwrap(), 2);
    builder.write(&db.wal_path()).unwrap();

    assert!(matches!(
        WalFile::open(db.wal_path(), 4096, &TEST_SALT),
        Err(DatabaseError::InvalidWalHeader { .. })
    ));
}

#[test]
fn test_page_size_mismatch_rejected() {
    let (db, mut fixture) = setup("wal_page_size");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "a"), 2);
    builder.write(&db.wal_path()).unwrap();

    assert!(matches!(
        WalFile::open(db.wal_path(), 8192, &TEST_SALT),
        Err(DatabaseError::InvalidWalHeader { .. })
    ));
}

#[test]
fn test_bad_magic_rejected() {
    let (db, _) = setup("wal_magic");
    fs::write(db.wal_path(), [0x42u8; 32]).unwrap();
    assert!(matches!(
        WalFile::open(db.wal_path(), 4096, &TEST_SALT),
        Err(DatabaseError::InvalidWalHeader { .. })
    ));
}

#[test]
fn test_partial_trailing_frame_ignored() {
    let (db, mut fixture) = setup("wal_partial");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "a"), 2);
    let mut bytes = builder.to_bytes();
    bytes.extend_from_slice(&[0u8; 100]);
    fs::write(db.wal_path(), bytes).unwrap();

    let wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    assert_eq!(wal.frames().len(), 1);
}

#[test]
fn test_read_frame_returns_page_bytes() {
    let (db, mut fixture) = setup("wal_read_frame");
    let page = leaf(&mut fixture, 2, "fresh");
    let mut builder = WalBuilder::new(4096);
    builder.push(2, leaf(&mut fixture, 2, "first"), 0);
    builder.push(2, page.clone(), 2);
    builder.write(&db.wal_path()).unwrap();

    let mut wal = WalFile::open(db.wal_path(), 4096, &TEST_SALT).unwrap();
    let raw = wal.read_frame(2).unwrap();
    assert_eq!(raw.page_id, 2);
    assert_eq!(raw.bytes, page);
    assert_eq!(raw.origin.frame_seq(), Some(2));
    assert_eq!(wal.read_frame(1).unwrap().origin, PageOrigin::Wal { frame_seq: 1, commit: false });
    assert!(wal.read_frame(3).is_err());

    let decrypted = fixture.codec().decrypt(&raw).unwrap();
    assert_eq!(decrypted.origin.frame_seq(), Some(2));
}
