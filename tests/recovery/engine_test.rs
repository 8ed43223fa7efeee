use std::{
    fs,
    sync::{Arc, atomic::AtomicBool},
};

use pulih::{
    crypto::kdf::KeyMaterial,
    recovery::{
        engine::RecoveryEngine,
        row_set::{Provenance, RowStatus},
        session::{Phase, Session},
    },
    storage::{main_db::MainDatabase, wal::WalFile},
    types::{
        error::{DatabaseError, RecoveryWarning},
        value::Value,
    },
    utils::mock::{WalBuilder, test_key, test_settings},
};

use crate::signal::{ALICE, SignalFixture, base_messages, message, text};

const BODY: usize = 8;

fn body(outcome: &pulih::recovery::engine::RecoveryOutcome, row_id: i64) -> Value {
    outcome.rows.get("messages", row_id).unwrap().values[BODY].clone()
}

fn edited_row_two() -> (i64, Vec<Value>) {
    (2, message("m2", ALICE, "outgoing", "edited body 2", 1_700_000_001_000, "{}"))
}

#[test]
fn test_main_database_only() {
    let fixture = SignalFixture::new("engine_main", &base_messages());
    let outcome = fixture.run(false);

    assert_eq!(outcome.phase, Phase::FullyReconciled);
    assert!(!outcome.cancelled);
    assert_eq!(outcome.rows.table_rows("messages").count(), 3);
    assert!(outcome.rows.rows().all(|r| r.status == RowStatus::Live && r.provenance == Provenance::MainDb));
    assert!(outcome.recovered_deleted().is_empty());
    assert_eq!(outcome.stats.baseline_rows, 4 + 2 + 3);
    assert!(outcome.warnings.is_empty());
    // rowid alias column carries the rowid
    assert_eq!(outcome.rows.get("messages", 3).unwrap().values[0], Value::Integer(3));
}

#[test]
fn test_update_then_delete_across_wal_frames() {
    let mut fixture = SignalFixture::new("engine_scenario", &base_messages());
    let leaf = fixture.messages_root;
    let size = fixture.builder.page_count();
    let [m1, _, m3] = base_messages().try_into().unwrap();

    let mut wal = WalBuilder::new(4096);
    let frame1 = fixture.builder.leaf_frames(leaf, &[m1.clone(), edited_row_two(), m3]).unwrap();
    let frame2 = fixture.builder.leaf_frames(leaf, &[m1, edited_row_two()]).unwrap();
    wal.push(leaf, frame1[0].1.clone(), size);
    wal.push(leaf, frame2[0].1.clone(), size);
    wal.write(&fixture.db.wal_path()).unwrap();

    let outcome = fixture.run(true);
    assert_eq!(outcome.phase, Phase::FullyReconciled);
    assert_eq!(outcome.stats.committed_frames, 2);
    assert_eq!(outcome.stats.frames_replayed, 2);
    assert_eq!(outcome.rows.table_rows("messages").count(), 3);

    let row1 = outcome.rows.get("messages", 1).unwrap();
    assert_eq!(row1.status, RowStatus::Live);
    assert_eq!(row1.provenance, Provenance::Wal { frame_seq: 2 });
    assert!(row1.history.is_empty());

    let row2 = outcome.rows.get("messages", 2).unwrap();
    assert_eq!(row2.status, RowStatus::Live);
    assert_eq!(body(&outcome, 2), text("edited body 2"));
    assert_eq!(row2.history.len(), 1);
    assert_eq!(row2.history[0].provenance, Provenance::MainDb);
    assert_eq!(row2.history[0].values[BODY], text("original body 2"));

    let row3 = outcome.rows.get("messages", 3).unwrap();
    assert_eq!(row3.status, RowStatus::RecoveredDeleted);
    assert_eq!(row3.provenance, Provenance::Wal { frame_seq: 1 });
    assert_eq!(body(&outcome, 3), text("to be deleted"));

    let deleted: Vec<i64> = outcome.recovered_deleted().iter().map(|r| r.row_id).collect();
    assert_eq!(deleted, vec![3]);
}

#[test]
fn test_prior_generation_frame_does_not_override_current_one() {
    let mut fixture = SignalFixture::new("engine_generations", &base_messages());
    let leaf = fixture.messages_root;
    let size = fixture.builder.page_count();
    let [m1, _, m3] = base_messages().try_into().unwrap();
    let stale_two = (2, message("m2", ALICE, "outgoing", "stale older body", 1_700_000_001_000, "{}"));

    let mut wal = WalBuilder::new(4096);
    let (salt1, _) = wal.salts();
    let current = fixture.builder.leaf_frames(leaf, &[m1.clone(), edited_row_two(), m3.clone()]).unwrap();
    let leftover = fixture.builder.leaf_frames(leaf, &[m1, stale_two, m3]).unwrap();
    wal.push(leaf, current[0].1.clone(), size);
    wal.push_with_salts(leaf, leftover[0].1.clone(), size, (salt1 - 1, 0x1111_2222));
    wal.write(&fixture.db.wal_path()).unwrap();

    let outcome = fixture.run(true);
    assert_eq!(outcome.stats.committed_frames, 1);
    assert_eq!(outcome.stats.stale_frames, 1);
    assert_eq!(outcome.stats.frames_replayed, 2);

    let row2 = outcome.rows.get("messages", 2).unwrap();
    assert_eq!(row2.status, RowStatus::Live);
    assert_eq!(row2.provenance, Provenance::Wal { frame_seq: 1 });
    assert_eq!(body(&outcome, 2), text("edited body 2"));
    let history: Vec<(Provenance, Value)> = row2
        .history
        .iter()
        .map(|v| (v.provenance, v.values[BODY].clone()))
        .collect();
    assert_eq!(
        history,
        vec![
            (Provenance::PriorWal { generation: 1, frame_seq: 2 }, text("stale older body")),
            (Provenance::MainDb, text("original body 2")),
        ]
    );

    // unchanged rows keep the current frame
    assert_eq!(outcome.rows.get("messages", 1).unwrap().provenance, Provenance::Wal { frame_seq: 1 });
    assert!(outcome.recovered_deleted().is_empty());
}

#[test]
fn test_committed_delete_of_main_row() {
    let mut fixture = SignalFixture::new("engine_dropped", &base_messages());
    let leaf = fixture.messages_root;
    let size = fixture.builder.page_count();
    let [m1, m2, _] = base_messages().try_into().unwrap();

    let mut wal = WalBuilder::new(4096);
    let frames = fixture.builder.leaf_frames(leaf, &[m1, m2]).unwrap();
    wal.push(leaf, frames[0].1.clone(), size);
    wal.write(&fixture.db.wal_path()).unwrap();

    let outcome = fixture.run(true);
    let row3 = outcome.rows.get("messages", 3).unwrap();
    assert_eq!(row3.status, RowStatus::DroppedFromBaseline);
    assert_eq!(row3.provenance, Provenance::MainDb);
    assert!(row3.status.is_recovered());
    assert!(outcome.recovered_deleted().is_empty());
}

#[test]
fn test_corrupted_middle_frame_is_skipped() {
    let mut fixture = SignalFixture::new("engine_corrupt", &base_messages());
    let leaf = fixture.messages_root;
    let size = fixture.builder.page_count();
    let [m1, m2, m3] = base_messages().try_into().unwrap();
    let m4 = (4, message("m4", ALICE, "incoming", "four", 1_700_000_003_000, "{}"));
    let m5 = (5, message("m5", ALICE, "incoming", "five", 1_700_000_004_000, "{}"));

    let mut wal = WalBuilder::new(4096);
    let f1 = fixture.builder.leaf_frames(leaf, &[m1.clone(), m2.clone(), m3.clone(), m4]).unwrap();
    let f2 = fixture.builder.leaf_frames(leaf, &[m1.clone(), m2.clone()]).unwrap();
    let f3 = fixture.builder.leaf_frames(leaf, &[m1, m2, m3, m5]).unwrap();
    wal.push(leaf, f1[0].1.clone(), size);
    wal.push(leaf, f2[0].1.clone(), size);
    wal.push(leaf, f3[0].1.clone(), size);
    let mut bytes = wal.to_bytes();
    bytes[wal.page_offset(2) as usize + 64] ^= 0x10;
    fs::write(fixture.db.wal_path(), bytes).unwrap();

    let outcome = fixture.run(true);
    assert_eq!(outcome.stats.committed_frames, 1);
    assert_eq!(outcome.stats.stale_frames, 2);
    assert_eq!(outcome.stats.frames_skipped, 1);
    assert_eq!(outcome.stats.frames_replayed, 2);
    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        RecoveryWarning::Integrity { page_id, frame_seq: Some(2) } if *page_id == leaf
    )));

    // live view is frame 1
    assert_eq!(outcome.rows.get("messages", 4).unwrap().status, RowStatus::Live);
    let row5 = outcome.rows.get("messages", 5).unwrap();
    assert_eq!(row5.status, RowStatus::RecoveredDeleted);
    assert_eq!(row5.provenance, Provenance::Wal { frame_seq: 3 });
    assert_eq!(outcome.rows.get("messages", 3).unwrap().status, RowStatus::Live);
}

#[test]
fn test_overflow_payload_in_wal_frame() {
    let mut fixture = SignalFixture::new("engine_overflow", &base_messages());
    let leaf = fixture.messages_root;
    let long_body = "long message ".repeat(900);
    let big = (6, message("m6", ALICE, "outgoing", &long_body, 1_700_000_005_000, "{}"));

    let frames = fixture.builder.leaf_frames(leaf, &[big]).unwrap();
    assert!(frames.len() > 2);
    let size = fixture.builder.page_count();
    let mut wal = WalBuilder::new(4096);
    let last = frames.len() - 1;
    for (i, (page_id, page)) in frames.into_iter().enumerate() {
        wal.push(page_id, page, if i == last { size } else { 0 });
    }
    wal.write(&fixture.db.wal_path()).unwrap();

    let outcome = fixture.run(true);
    let row6 = outcome.rows.get("messages", 6).unwrap();
    assert_eq!(row6.values[BODY], text(&long_body));
    assert_eq!(row6.status, RowStatus::Live);
    // rows 1-3 vanished from the live leaf
    assert_eq!(outcome.rows.get("messages", 1).unwrap().status, RowStatus::DroppedFromBaseline);
    assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
}

#[test]
fn test_uncommitted_split_is_attributed_through_interior_frame() {
    let mut fixture = SignalFixture::new("engine_split", &base_messages());
    let root = fixture.messages_root;
    let [m1, m2, m3] = base_messages().try_into().unwrap();
    let m4 = (4, message("m4", ALICE, "incoming", "four", 1_700_000_003_000, "{}"));
    let m5 = (5, message("m5", ALICE, "incoming", "five", 1_700_000_004_000, "{}"));

    let left = fixture.builder.allocate();
    let right = fixture.builder.allocate();
    let mut wal = WalBuilder::new(4096);
    let left_frames = fixture.builder.leaf_frames(left, &[m1, m2, m3]).unwrap();
    let right_frames = fixture.builder.leaf_frames(right, &[m4, m5]).unwrap();
    wal.push(left, left_frames[0].1.clone(), 0);
    wal.push(right, right_frames[0].1.clone(), 0);
    wal.push(root, fixture.builder.interior_frame(root, &[(left, 3)], right).unwrap(), 0);
    wal.write(&fixture.db.wal_path()).unwrap();

    let outcome = fixture.run(true);
    assert_eq!(outcome.stats.uncommitted_frames, 3);
    assert!(
        !outcome.warnings.iter().any(|w| matches!(w, RecoveryWarning::UnattributedFrame { .. })),
        "{:?}",
        outcome.warnings
    );
    for row_id in [4, 5] {
        let row = outcome.rows.get("messages", row_id).unwrap();
        assert_eq!(row.status, RowStatus::RecoveredDeleted);
    }
    assert_eq!(outcome.rows.get("messages", 1).unwrap().status, RowStatus::Live);
}

#[test]
fn test_unowned_leaf_frame_is_reported() {
    let mut fixture = SignalFixture::new("engine_unowned", &base_messages());
    let orphan = fixture.builder.allocate();
    let m7 = (7, message("m7", ALICE, "incoming", "seven", 1_700_000_006_000, "{}"));
    let frames = fixture.builder.leaf_frames(orphan, &[m7]).unwrap();
    let mut wal = WalBuilder::new(4096);
    wal.push(orphan, frames[0].1.clone(), fixture.builder.page_count());
    wal.write(&fixture.db.wal_path()).unwrap();

    let outcome = fixture.run(true);
    assert!(outcome.warnings.iter().any(|w| matches!(
        w,
        RecoveryWarning::UnattributedFrame { frame_seq: 1, page_id } if *page_id == orphan
    )));
    assert!(outcome.rows.get("messages", 7).is_none());
}

#[test]
fn test_wrong_key_is_fatal() {
    let fixture = SignalFixture::new("engine_wrong_key", &base_messages());
    let settings = test_settings();
    let main = MainDatabase::open(&fixture.db.path, settings.page_size).unwrap();
    let key = KeyMaterial::passphrase("not the passphrase").unwrap();
    let session = Session::new(&settings, &key, main.salt()).unwrap();

    let err = RecoveryEngine::new(session, main, None).run().unwrap_err();
    assert!(matches!(err, DatabaseError::KeyDerivation { .. }));
    assert!(err.is_fatal());
}

#[test]
fn test_cancelled_run_returns_partial_outcome() {
    let fixture = SignalFixture::new("engine_cancel", &base_messages());
    let settings = test_settings();
    let main = MainDatabase::open(&fixture.db.path, settings.page_size).unwrap();
    let cancel = Arc::new(AtomicBool::new(true));
    let session = Session::new(&settings, &test_key(), main.salt())
        .unwrap()
        .with_cancel_flag(cancel);

    let outcome = RecoveryEngine::new(session, main, None).run().unwrap();
    assert!(outcome.cancelled);
    assert_eq!(outcome.phase, Phase::Baseline);
    assert!(outcome.rows.is_empty());
}

#[test]
fn test_worker_pool_gives_same_result() {
    let mut fixture = SignalFixture::new("engine_workers", &base_messages());
    let leaf = fixture.messages_root;
    let size = fixture.builder.page_count();
    let mut wal = WalBuilder::new(4096);
    for i in 0..6 {
        let row = (10 + i, message(&format!("w{i}"), ALICE, "incoming", "w", 1_700_000_010_000 + i, "{}"));
        let frames = fixture.builder.leaf_frames(leaf, &[row]).unwrap();
        wal.push(leaf, frames[0].1.clone(), size);
    }
    wal.write(&fixture.db.wal_path()).unwrap();

    let settings = test_settings();
    let main = MainDatabase::open(&fixture.db.path, settings.page_size).unwrap();
    let wal = WalFile::open(fixture.db.wal_path(), settings.page_size, main.salt()).unwrap();
    let session = Session::new(&settings, &test_key(), main.salt()).unwrap();
    let parallel = RecoveryEngine::new(session, main, Some(wal)).with_workers(3).run().unwrap();
    let sequential = fixture.run(true);

    assert_eq!(parallel.stats.wal_row_versions, 6);
    let keys = |o: &pulih::recovery::engine::RecoveryOutcome| {
        o.rows.rows().map(|r| (r.row_id, r.status, r.provenance)).collect::<Vec<_>>()
    };
    assert_eq!(keys(&parallel), keys(&sequential));
    // only the last frame is live
    assert_eq!(parallel.rows.get("messages", 15).unwrap().status, RowStatus::Live);
    assert_eq!(parallel.rows.get("messages", 10).unwrap().status, RowStatus::RecoveredDeleted);
}

#[test]
fn test_bad_wal_header_checksum_commits_nothing() {
    let mut fixture = SignalFixture::new("engine_header_sum", &base_messages());
    let leaf = fixture.messages_root;
    let size = fixture.builder.page_count();
    let [m1, m2, _] = base_messages().try_into().unwrap();
    let frames = fixture.builder.leaf_frames(leaf, &[m1, m2]).unwrap();
    let mut wal = WalBuilder::new(4096);
    wal.push(leaf, frames[0].1.clone(), size);
    let mut bytes = wal.to_bytes();
    bytes[27] ^= 0x01;
    fs::write(fixture.db.wal_path(), bytes).unwrap();

    let outcome = fixture.run(true);
    assert_eq!(outcome.stats.stale_frames, 1);
    assert!(outcome.warnings.contains(&RecoveryWarning::WalHeaderChecksum {
        path: fixture.db.wal_path()
    }));
    // the frame is replayed but the live view is the main file
    assert_eq!(outcome.stats.frames_replayed, 1);
    assert_eq!(outcome.rows.get("messages", 3).unwrap().status, RowStatus::Live);
}
