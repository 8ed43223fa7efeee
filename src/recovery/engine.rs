use std::collections::{HashMap, HashSet};

use rayon::{ThreadPool, ThreadPoolBuilder, prelude::*};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    crypto::codec::PageCodec,
    executor::sequential_scan::TableScanner,
    recovery::{
        row_set::{Provenance, RecoveredRow, RecoveredRowSet},
        session::{Phase, Session},
    },
    storage::{
        bplus_tree::{BtreeNode, LeafCell, assemble_payload, parse_table_page},
        header::DatabaseHeader,
        main_db::MainDatabase,
        page_store::{Horizon, PageFetcher, PageResolver},
        schema::{SCHEMA_TABLE, SchemaCatalog},
        wal::{FrameState, WalFile},
    },
    types::{
        FrameSeq, PageId,
        error::{DatabaseError, RecoveryWarning, Result},
        page::RawPage,
        record::{TextEncoding, decode_record},
        row::Row,
    },
};

pub const DEFAULT_BATCH_SIZE: usize = 64;

#[derive(Debug, Default, Clone, Serialize)]
pub struct ReplayStats {
    pub main_pages: usize,
    pub baseline_rows: usize,
    pub live_rows: usize,
    pub wal_frames: usize,
    pub committed_frames: usize,
    pub uncommitted_frames: usize,
    pub stale_frames: usize,
    pub frames_replayed: usize,
    pub frames_skipped: usize,
    pub wal_row_versions: usize,
}

#[derive(Debug)]
pub struct RecoveryOutcome {
    pub rows: RecoveredRowSet,
    pub catalog: SchemaCatalog,
    pub warnings: Vec<RecoveryWarning>,
    pub stats: ReplayStats,
    pub phase: Phase,
    pub cancelled: bool,
}

impl RecoveryOutcome {
    pub fn recovered_deleted(&self) -> Vec<&RecoveredRow> {
        self.rows.recovered_deleted().collect()
    }
}

enum DecodedFrame {
    Leaf(Vec<Result<LeafCell>>),
    Interior(Vec<PageId>),
    Other,
}

fn decode_frame(codec: &PageCodec, raw: Result<RawPage>) -> Result<DecodedFrame> {
    let page = codec.decrypt(&raw?)?;
    match parse_table_page(&page) {
        Ok(BtreeNode::Leaf(cells)) => Ok(DecodedFrame::Leaf(cells)),
        Ok(BtreeNode::Interior(children)) => Ok(DecodedFrame::Interior(children)),
        // index, overflow and freelist pages
        Ok(BtreeNode::Index(_)) | Err(DatabaseError::InvalidPageType(_)) => Ok(DecodedFrame::Other),
        Err(e) => Err(e),
    }
}

fn decode_batch(pool: Option<&ThreadPool>, codec: &PageCodec, raws: Vec<Result<RawPage>>) -> Vec<Result<DecodedFrame>> {
    let work = || {
        raws.into_par_iter()
            .map(|raw| decode_frame(codec, raw))
            .collect::<Vec<_>>()
    };
    match pool {
        Some(pool) => pool.install(work),
        None => work(),
    }
}

/// Reconciles the main database with every WAL frame.
///
/// Phases: **Baseline** reads the main file; the live snapshot (main file
/// plus committed frames) is then scanned for the set of live keys;
/// **WalReplay** decodes frames concurrently in batches and applies their
/// rows strictly in frame order. Local failures become warnings.
pub struct RecoveryEngine {
    session: Session,
    main: MainDatabase,
    wal: Option<WalFile>,
    batch_size: usize,
    workers: Option<usize>,
}

impl RecoveryEngine {
    pub fn new(session: Session, main: MainDatabase, wal: Option<WalFile>) -> Self {
        Self {
            session,
            main,
            wal,
            batch_size: DEFAULT_BATCH_SIZE,
            workers: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = Some(workers.max(1));
        self
    }

    pub fn run(self) -> Result<RecoveryOutcome> {
        let Self {
            mut session,
            mut main,
            mut wal,
            batch_size,
            workers,
        } = self;
        let codec = session.codec();
        let pool = workers
            .map(|n| ThreadPoolBuilder::new().num_threads(n).build())
            .transpose()
            .map_err(|e| DatabaseError::UnsupportedInput {
                details: format!("worker pool: {e}"),
            })?;

        let mut stats = ReplayStats {
            main_pages: main.page_count(),
            ..ReplayStats::default()
        };
        let mut rows = RecoveredRowSet::new();
        let mut ownership: HashMap<PageId, String> = HashMap::from([(1, SCHEMA_TABLE.to_string())]);

        // Baseline
        session.enter(Phase::Baseline);
        let encoding = authenticate(&mut main, &codec, &mut session)?;
        let mut baseline_keys = HashSet::new();
        let main_catalog = {
            let mut resolver = PageResolver::new(&mut main, None, &codec, Horizon::MainOnly);
            let (catalog, warnings) = SchemaCatalog::load(&mut resolver, encoding);
            session.record_all(warnings);
            let completed = scan_catalog(&mut resolver, &catalog, encoding, &mut session, &mut ownership, |row| {
                baseline_keys.insert(row.key());
                stats.baseline_rows += 1;
                rows.upsert(row, Provenance::MainDb);
            });
            if !completed {
                return Ok(finish(session, rows, catalog, stats, true));
            }
            catalog
        };
        info!(tables = main_catalog.tables().len(), rows = stats.baseline_rows, "baseline loaded");

        let Some(wal_file) = wal.as_mut() else {
            rows.classify(&baseline_keys);
            session.enter(Phase::FullyReconciled);
            return Ok(finish(session, rows, main_catalog, stats, false));
        };

        if !wal_file.header_checksum_ok() {
            session.record(RecoveryWarning::WalHeaderChecksum {
                path: wal_file.path().to_path_buf(),
            });
        }

        // Live snapshot
        let mut live_keys = HashSet::new();
        let catalog = {
            let mut resolver = PageResolver::new(&mut main, Some(&mut *wal_file), &codec, Horizon::Live);
            let (mut live_catalog, warnings) = SchemaCatalog::load(&mut resolver, encoding);
            session.record_all(warnings);
            if live_catalog.is_empty() {
                warn!("live schema unreadable, using the main file's schema");
                live_catalog = main_catalog.clone();
            }
            let completed = scan_catalog(&mut resolver, &live_catalog, encoding, &mut session, &mut ownership, |row| {
                live_keys.insert(row.key());
                stats.live_rows += 1;
            });
            live_catalog.merge(&main_catalog);
            if !completed {
                return Ok(finish(session, rows, live_catalog, stats, true));
            }
            live_catalog
        };

        // WalReplay
        session.enter(Phase::WalReplay);
        stats.wal_frames = wal_file.frames().len();
        for frame in wal_file.frames() {
            match frame.state {
                FrameState::Committed => stats.committed_frames += 1,
                FrameState::Uncommitted => stats.uncommitted_frames += 1,
                FrameState::Stale => stats.stale_frames += 1,
            }
        }
        let sequences: Vec<FrameSeq> = wal_file.frames().iter().map(|f| f.seq).collect();

        // Older tree shapes: children of an owned interior frame share its owner.
        let mut interiors: Vec<(PageId, Vec<PageId>)> = Vec::new();
        for batch in sequences.chunks(batch_size) {
            let raws = batch.iter().map(|seq| wal_file.read_frame(*seq)).collect();
            for (seq, decoded) in batch.iter().zip(decode_batch(pool.as_ref(), &codec, raws)) {
                if let (Ok(DecodedFrame::Interior(children)), Some(frame)) = (decoded, wal_file.frame(*seq)) {
                    interiors.push((frame.page_id, children));
                }
            }
        }
        extend_ownership(&mut ownership, &interiors);
        drop(interiors);

        let mut cancelled = false;
        'replay: for batch in sequences.chunks(batch_size) {
            let raws = batch.iter().map(|seq| wal_file.read_frame(*seq)).collect();
            let decoded = decode_batch(pool.as_ref(), &codec, raws);

            for (&seq, decoded) in batch.iter().zip(decoded) {
                if session.is_cancelled() {
                    cancelled = true;
                    break 'replay;
                }
                let (page_id, provenance) = wal_file
                    .frame(seq)
                    .map_or((0, Provenance::Wal { frame_seq: seq }), |f| (f.page_id, Provenance::of_frame(f)));
                let cells = match decoded {
                    Ok(DecodedFrame::Leaf(cells)) => cells,
                    Ok(_) => continue,
                    Err(e) => {
                        stats.frames_skipped += 1;
                        session.record(RecoveryWarning::from_error(&e, None, page_id, Some(seq)));
                        continue;
                    }
                };

                let Some(owner) = ownership.get(&page_id) else {
                    stats.frames_skipped += 1;
                    session.record(RecoveryWarning::UnattributedFrame { frame_seq: seq, page_id });
                    continue;
                };
                if owner == SCHEMA_TABLE {
                    continue;
                }
                let Some(table) = catalog.table(owner) else {
                    continue;
                };

                let horizon = Horizon::AsOf(wal_file.txn_end(seq));
                let mut resolver = PageResolver::new(&mut main, Some(&mut *wal_file), &codec, horizon);
                for cell in cells {
                    let decoded = cell.and_then(|cell| {
                        let payload = assemble_payload(&mut resolver, &cell)?;
                        let record = decode_record(&payload, encoding, cell.page_id)?;
                        Ok(table.materialize(cell.row_id, record))
                    });
                    match decoded {
                        Ok(row) => {
                            stats.wal_row_versions += 1;
                            rows.upsert(row, provenance);
                        }
                        Err(e) => session.record(RecoveryWarning::from_error(
                            &e,
                            Some(&table.name),
                            page_id,
                            Some(seq),
                        )),
                    }
                }
                stats.frames_replayed += 1;
            }
        }

        rows.classify(&live_keys);
        if !cancelled {
            session.enter(Phase::FullyReconciled);
        }
        info!(
            rows = rows.len(),
            recovered_deleted = rows.recovered_deleted().count(),
            frames_replayed = stats.frames_replayed,
            frames_skipped = stats.frames_skipped,
            "WAL reconciled"
        );
        Ok(finish(session, rows, catalog, stats, cancelled))
    }
}

/// Page 1 must authenticate; a failure there means the key is wrong.
fn authenticate(main: &mut MainDatabase, codec: &PageCodec, session: &mut Session) -> Result<TextEncoding> {
    let raw = main.read_page(1)?;
    let page = codec.decrypt(&raw).map_err(|e| match e {
        DatabaseError::Integrity { .. } => DatabaseError::KeyDerivation {
            reason: "key does not authenticate page 1 of the database".to_string(),
        },
        other => other,
    })?;
    let header = DatabaseHeader::from_page(&page)?;
    let reserved = codec.settings().reserved_size();
    if header.reserved_space as usize != reserved {
        warn!(
            header = header.reserved_space,
            expected = reserved,
            "reserved-bytes field disagrees with cipher settings"
        );
    }
    Ok(header.encoding().unwrap_or_else(|e| {
        session.record(RecoveryWarning::PageSkipped {
            page_id: 1,
            frame_seq: None,
            reason: e.to_string(),
        });
        TextEncoding::Utf8
    }))
}

/// Scans every table in `catalog`, recording which b-tree pages belong to
/// which table. Returns `false` if the session was cancelled.
fn scan_catalog<F: PageFetcher>(
    fetcher: &mut F,
    catalog: &SchemaCatalog,
    encoding: TextEncoding,
    session: &mut Session,
    ownership: &mut HashMap<PageId, String>,
    mut on_row: impl FnMut(Row),
) -> bool {
    for table in catalog.tables() {
        let mut rows = TableScanner::new(&mut *fetcher, table, encoding).into_rows();
        while let Some(result) = rows.next() {
            if session.is_cancelled() {
                return false;
            }
            match result {
                Ok(row) => on_row(row),
                Err(e) => {
                    let page_id = rows.scanner().current_page();
                    session.record(RecoveryWarning::from_error(&e, Some(&table.name), page_id, None));
                }
            }
        }
        for page_id in rows.scanner().table_pages() {
            ownership.entry(*page_id).or_insert_with(|| table.name.clone());
        }
        debug!(table = %table.name, pages = rows.scanner().table_pages().len(), "scanned");
    }
    true
}

fn extend_ownership(ownership: &mut HashMap<PageId, String>, interiors: &[(PageId, Vec<PageId>)]) {
    loop {
        let mut changed = false;
        for (page_id, children) in interiors {
            let Some(owner) = ownership.get(page_id).cloned() else {
                continue;
            };
            for child in children {
                if !ownership.contains_key(child) {
                    ownership.insert(*child, owner.clone());
                    changed = true;
                }
            }
        }
        if !changed {
            break;
        }
    }
}

fn finish(
    mut session: Session,
    rows: RecoveredRowSet,
    catalog: SchemaCatalog,
    stats: ReplayStats,
    cancelled: bool,
) -> RecoveryOutcome {
    if cancelled {
        warn!(phase = ?session.phase(), "recovery cancelled, returning partial results");
    }
    RecoveryOutcome {
        phase: session.phase(),
        warnings: session.take_warnings(),
        rows,
        catalog,
        stats,
        cancelled,
    }
}

