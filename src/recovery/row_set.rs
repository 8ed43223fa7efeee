use std::{
    cmp::{Ordering, Reverse},
    collections::{BTreeMap, HashSet},
};

use serde::Serialize;

use crate::{
    storage::wal::WalFrame,
    types::{FrameSeq, RowId, row::Row, value::Value},
};

/// Which source produced a row version.
///
/// Orders by age: frames left over from earlier WAL generations were
/// checkpointed into the main file before the WAL was reset, so they come
/// first (oldest generation first), then the main file, then frames of the
/// current generation by sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum Provenance {
    PriorWal { generation: u32, frame_seq: FrameSeq },
    MainDb,
    Wal { frame_seq: FrameSeq },
}

impl Provenance {
    pub fn of_frame(frame: &WalFrame) -> Self {
        match frame.generation {
            0 => Provenance::Wal { frame_seq: frame.seq },
            generation => Provenance::PriorWal {
                generation,
                frame_seq: frame.seq,
            },
        }
    }

    fn age_key(&self) -> (u8, Reverse<u32>, FrameSeq) {
        match *self {
            Provenance::PriorWal { generation, frame_seq } => (0, Reverse(generation), frame_seq),
            Provenance::MainDb => (1, Reverse(0), 0),
            Provenance::Wal { frame_seq } => (2, Reverse(0), frame_seq),
        }
    }
}

impl Ord for Provenance {
    fn cmp(&self, other: &Self) -> Ordering {
        self.age_key().cmp(&other.age_key())
    }
}

impl PartialOrd for Provenance {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowStatus {
    /// Present in the live database.
    Live,
    /// Last written by a WAL frame and absent from the live database.
    RecoveredDeleted,
    /// Only in the main file; a committed WAL transaction removed it.
    DroppedFromBaseline,
}

impl RowStatus {
    pub fn is_recovered(&self) -> bool {
        !matches!(self, RowStatus::Live)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowVersion {
    pub provenance: Provenance,
    pub values: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecoveredRow {
    pub table: String,
    pub row_id: RowId,
    pub values: Vec<Value>,
    pub provenance: Provenance,
    pub status: RowStatus,
    /// Earlier versions with different values, oldest first.
    pub history: Vec<RowVersion>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Replaced,
    /// Same values seen again from a newer source.
    Refreshed,
    /// An older version with new values, kept in history only.
    Archived,
    /// The stored version is at least as new, or the values are known.
    Ignored,
}

#[derive(Debug, Default, Clone)]
pub struct RecoveredRowSet {
    rows: BTreeMap<(String, RowId), RecoveredRow>,
}

impl RecoveredRowSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Newest version by provenance order wins. Older versions arriving
    /// late are kept in history.
    pub fn upsert(&mut self, row: Row, provenance: Provenance) -> UpsertOutcome {
        let key = (row.table, row.row_id);
        match self.rows.get_mut(&key) {
            None => {
                self.rows.insert(
                    key.clone(),
                    RecoveredRow {
                        table: key.0,
                        row_id: key.1,
                        values: row.values,
                        provenance,
                        status: RowStatus::Live,
                        history: Vec::new(),
                    },
                );
                UpsertOutcome::Inserted
            }
            Some(existing) if existing.provenance == provenance => UpsertOutcome::Ignored,
            Some(existing) if existing.provenance > provenance => {
                if existing.values == row.values || existing.history.iter().any(|v| v.values == row.values) {
                    return UpsertOutcome::Ignored;
                }
                let at = existing.history.partition_point(|v| v.provenance < provenance);
                existing.history.insert(
                    at,
                    RowVersion {
                        provenance,
                        values: row.values,
                    },
                );
                UpsertOutcome::Archived
            }
            Some(existing) if existing.values == row.values => {
                existing.provenance = provenance;
                UpsertOutcome::Refreshed
            }
            Some(existing) => {
                let previous = std::mem::replace(&mut existing.values, row.values);
                existing.history.push(RowVersion {
                    provenance: existing.provenance,
                    values: previous,
                });
                existing.provenance = provenance;
                UpsertOutcome::Replaced
            }
        }
    }

    pub fn get(&self, table: &str, row_id: RowId) -> Option<&RecoveredRow> {
        self.rows.get(&(table.to_string(), row_id))
    }

    /// Sets every row's status against the keys of the live database.
    pub fn classify(&mut self, live: &HashSet<(String, RowId)>) {
        for (key, row) in self.rows.iter_mut() {
            row.status = if live.contains(key) {
                RowStatus::Live
            } else {
                match row.provenance {
                    Provenance::MainDb => RowStatus::DroppedFromBaseline,
                    _ => RowStatus::RecoveredDeleted,
                }
            };
        }
    }

    pub fn recovered_deleted(&self) -> impl Iterator<Item = &RecoveredRow> {
        self.rows
            .values()
            .filter(|row| row.status == RowStatus::RecoveredDeleted)
    }

    pub fn rows(&self) -> impl Iterator<Item = &RecoveredRow> {
        self.rows.values()
    }

    pub fn table_rows<'a>(&'a self, table: &'a str) -> impl Iterator<Item = &'a RecoveredRow> + 'a {
        self.rows
            .range((table.to_string(), RowId::MIN)..=(table.to_string(), RowId::MAX))
            .map(|(_, row)| row)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
