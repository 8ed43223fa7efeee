use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::types::{FrameSeq, PageId, RowId};

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Key derivation failed: {reason}")]
    KeyDerivation { reason: String },

    #[error("Integrity check failed for page {page_id}")]
    Integrity { page_id: PageId },

    #[error("Truncated file: {size} bytes is not a positive multiple of page size {page_size}")]
    TruncatedFile { size: u64, page_size: usize },

    #[error("Invalid WAL header: {reason}")]
    InvalidWalHeader { reason: String },

    #[error("Corrupt record on page {page_id}: {reason}")]
    CorruptRecord { page_id: PageId, reason: String },

    #[error("Corrupted page: page_id={page_id}, reason={reason}")]
    CorruptedPage { page_id: PageId, reason: String },

    #[error("Invalid page size: {expected} bytes, got {actual} bytes")]
    InvalidPageSize { expected: usize, actual: usize },

    #[error("Page {page_id} is outside the database ({page_count} pages)")]
    PageOutOfRange { page_id: PageId, page_count: usize },

    #[error("Invalid page type: {0}")]
    InvalidPageType(u8),

    #[error("SQL parsing error: {details}")]
    SqlParseError { details: String },

    #[error("Unsupported input: {details}")]
    UnsupportedInput { details: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl DatabaseError {
    /// Errors that abort the whole analysis when raised against the main
    /// database. Everything else is a local failure: the unit is skipped and
    /// a [`RecoveryWarning`] is recorded instead.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            DatabaseError::KeyDerivation { .. }
                | DatabaseError::TruncatedFile { .. }
                | DatabaseError::Io(_)
        )
    }

    pub fn corrupt_record(page_id: PageId, reason: impl Into<String>) -> Self {
        DatabaseError::CorruptRecord {
            page_id,
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, DatabaseError>;

/// A unit of input that was skipped. Collected on the session and handed to
/// the caller with the final result.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RecoveryWarning {
    Integrity {
        page_id: PageId,
        frame_seq: Option<FrameSeq>,
    },
    CorruptRecord {
        table: Option<String>,
        page_id: PageId,
        frame_seq: Option<FrameSeq>,
        reason: String,
    },
    PageSkipped {
        page_id: PageId,
        frame_seq: Option<FrameSeq>,
        reason: String,
    },
    WalRejected {
        path: PathBuf,
        reason: String,
    },
    WalHeaderChecksum {
        path: PathBuf,
    },
    UnsupportedMultiWal {
        paths: Vec<PathBuf>,
    },
    UnattributedFrame {
        frame_seq: FrameSeq,
        page_id: PageId,
    },
    TableSkipped {
        table: String,
        reason: String,
    },
    MissingTable {
        table: String,
    },
    SchemaMismatch {
        table: String,
        row_id: Option<RowId>,
        column: String,
        reason: String,
    },
}

impl RecoveryWarning {
    /// Classifies a local failure raised while reading one page or frame.
    pub fn from_error(
        err: &DatabaseError,
        table: Option<&str>,
        page_id: PageId,
        frame_seq: Option<FrameSeq>,
    ) -> Self {
        match err {
            DatabaseError::Integrity { page_id } => RecoveryWarning::Integrity {
                page_id: *page_id,
                frame_seq,
            },
            DatabaseError::CorruptRecord { page_id, reason } => RecoveryWarning::CorruptRecord {
                table: table.map(str::to_string),
                page_id: *page_id,
                frame_seq,
                reason: reason.clone(),
            },
            other => RecoveryWarning::PageSkipped {
                page_id,
                frame_seq,
                reason: other.to_string(),
            },
        }
    }
}
