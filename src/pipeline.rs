use std::sync::{Arc, atomic::AtomicBool};

use serde::Serialize;
use tracing::{info, warn};

use crate::{
    config::AnalysisConfig,
    mapper::{MappedArtifacts, SchemaMapper},
    recovery::{
        engine::{RecoveryEngine, ReplayStats},
        session::{Phase, Session},
    },
    storage::{main_db::MainDatabase, wal::WalFile},
    types::error::{RecoveryWarning, Result},
};

/// What one run produced, ready to serialize.
#[derive(Debug, Serialize)]
pub struct AnalysisReport {
    pub database: String,
    pub wal: Option<String>,
    pub phase: Phase,
    pub cancelled: bool,
    pub recovered_deleted: usize,
    pub stats: ReplayStats,
    pub artifacts: MappedArtifacts,
    /// Engine warnings; mapper warnings live in `artifacts.warnings`.
    pub warnings: Vec<RecoveryWarning>,
}

pub fn analyze(config: &AnalysisConfig) -> Result<AnalysisReport> {
    analyze_with_cancel(config, Arc::new(AtomicBool::new(false)))
}

/// Runs key derivation, recovery and mapping. Only fatal errors (wrong
/// key, unreadable or truncated main file) are returned as `Err`.
pub fn analyze_with_cancel(config: &AnalysisConfig, cancel: Arc<AtomicBool>) -> Result<AnalysisReport> {
    config.cipher.validate()?;
    let key = config.key.resolve()?;
    let main = MainDatabase::open(&config.database, config.cipher.page_size)?;
    let mut session = Session::new(&config.cipher, &key, main.salt())?.with_cancel_flag(cancel);
    drop(key);

    let candidates = config.wal_candidates();
    let wal = match candidates.as_slice() {
        [] => None,
        [path] => match WalFile::open(path, config.cipher.page_size, main.salt()) {
            Ok(wal) => Some(wal),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "WAL rejected, continuing with the main file only");
                session.record(RecoveryWarning::WalRejected {
                    path: path.clone(),
                    reason: e.to_string(),
                });
                None
            }
        },
        paths => {
            session.record(RecoveryWarning::UnsupportedMultiWal {
                paths: paths.to_vec(),
            });
            None
        }
    };
    let wal_path = wal.as_ref().map(|w| w.path().display().to_string());

    let mut engine = RecoveryEngine::new(session, main, wal);
    if let Some(workers) = config.workers {
        engine = engine.with_workers(workers);
    }
    let outcome = engine.run()?;

    let artifacts = SchemaMapper::new(config.layout.clone()).map(&outcome.rows, &outcome.catalog);
    let recovered_deleted = outcome.rows.recovered_deleted().count();
    info!(
        messages = artifacts.messages.len(),
        recovered_deleted,
        warnings = outcome.warnings.len() + artifacts.warnings.len(),
        "analysis finished"
    );

    Ok(AnalysisReport {
        database: config.database.display().to_string(),
        wal: wal_path,
        phase: outcome.phase,
        cancelled: outcome.cancelled,
        recovered_deleted,
        stats: outcome.stats,
        artifacts,
        warnings: outcome.warnings,
    })
}
