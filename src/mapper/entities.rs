use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    recovery::row_set::{Provenance, RecoveredRow, RowStatus},
    types::RowId,
};

/// Identifies the row an entity was projected from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRef {
    pub table: String,
    pub row_id: RowId,
    pub provenance: Provenance,
    pub status: RowStatus,
}

impl EntityRef {
    pub fn of(row: &RecoveredRow) -> Self {
        Self {
            table: row.table.clone(),
            row_id: row.row_id,
            provenance: row.provenance,
            status: row.status,
        }
    }

    pub fn is_recovered(&self) -> bool {
        self.status.is_recovered()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Incoming,
    Outgoing,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccountOwner {
    pub phone: String,
    pub profile_name: Option<String>,
}

impl AccountOwner {
    pub fn display_name(&self) -> String {
        match &self.profile_name {
            Some(name) => format!("{name} (Account Owner)"),
            None => format!("{} (Account Owner)", self.phone),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Contact {
    pub source: EntityRef,
    pub id: String,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub profile_name: Option<String>,
    pub phone: Option<String>,
    pub service_id: Option<String>,
}

impl Contact {
    pub fn is_group(&self) -> bool {
        self.kind.as_deref() == Some("group")
    }

    pub fn display_name(&self) -> String {
        if self.is_group() {
            return format!("Group: {}", self.name.as_deref().unwrap_or(&self.id));
        }
        self.profile_name
            .as_deref()
            .or(self.name.as_deref())
            .or(self.phone.as_deref())
            .unwrap_or(&self.id)
            .to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Attachment {
    /// `None` when listed only inside the message's JSON.
    pub source: Option<EntityRef>,
    pub message_id: String,
    pub content_type: Option<String>,
    pub file_name: Option<String>,
    pub path: Option<String>,
    pub size: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    pub source: EntityRef,
    pub recovered: bool,
    pub id: String,
    pub conversation_id: String,
    pub kind: Option<String>,
    pub direction: Direction,
    pub sender: Option<String>,
    pub recipient: Option<String>,
    pub body: Option<String>,
    pub erased: bool,
    pub quote: Option<String>,
    pub sticker_path: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    pub received_at: Option<DateTime<Utc>>,
    pub read_by: Vec<String>,
    pub attachments: Vec<Attachment>,
    /// Bodies of earlier versions of this row, oldest first.
    pub previous_bodies: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CallLog {
    pub source: EntityRef,
    pub recovered: bool,
    pub call_id: Option<String>,
    pub conversation_id: Option<String>,
    pub mode: Option<String>,
    pub direction: Direction,
    pub caller: Option<String>,
    pub callee: Option<String>,
    /// Answered / Declined / Initiated / Joined, or the raw status column.
    pub response: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub accepted_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

pub fn timestamp_millis(ms: i64) -> Option<DateTime<Utc>> {
    if ms <= 0 {
        return None;
    }
    DateTime::<Utc>::from_timestamp_millis(ms)
}
