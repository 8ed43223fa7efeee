use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Text,
    Integer,
    Any,
}

impl ValueKind {
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            ValueKind::Text => matches!(value, Value::Text(_)),
            ValueKind::Integer => matches!(value, Value::Integer(_)),
            ValueKind::Any => true,
        }
    }
}

/// One logical field: the column names to try, in order, and what the
/// column must hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub names: Vec<String>,
    pub kind: ValueKind,
    #[serde(default)]
    pub required: bool,
}

impl ColumnSpec {
    pub fn required(names: &[&str], kind: ValueKind) -> Self {
        Self {
            names: names.iter().map(|n| n.to_string()).collect(),
            kind,
            required: true,
        }
    }

    pub fn optional(names: &[&str], kind: ValueKind) -> Self {
        Self {
            required: false,
            ..Self::required(names, kind)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableLayout {
    pub table: String,
    /// A missing optional table is normal for older client versions.
    #[serde(default)]
    pub optional: bool,
    pub fields: BTreeMap<String, ColumnSpec>,
}

impl TableLayout {
    fn new(table: &str, optional: bool, fields: Vec<(&str, ColumnSpec)>) -> Self {
        Self {
            table: table.to_string(),
            optional,
            fields: fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect(),
        }
    }
}

pub mod field {
    pub const ID: &str = "id";
    pub const KIND: &str = "kind";
    pub const NAME: &str = "name";
    pub const PROFILE_NAME: &str = "profile_name";
    pub const PHONE: &str = "phone";
    pub const SERVICE_ID: &str = "service_id";
    pub const CONVERSATION_ID: &str = "conversation_id";
    pub const BODY: &str = "body";
    pub const JSON: &str = "json";
    pub const SENT_AT: &str = "sent_at";
    pub const RECEIVED_AT: &str = "received_at";
    pub const HAS_ATTACHMENTS: &str = "has_attachments";
    pub const SEEN_STATUS: &str = "seen_status";
    pub const IS_ERASED: &str = "is_erased";
    pub const SOURCE_SERVICE_ID: &str = "source_service_id";
    pub const MESSAGE_ID: &str = "message_id";
    pub const CONTENT_TYPE: &str = "content_type";
    pub const FILE_NAME: &str = "file_name";
    pub const PATH: &str = "path";
    pub const SIZE: &str = "size";
    pub const CALL_ID: &str = "call_id";
    pub const PEER_ID: &str = "peer_id";
    pub const MODE: &str = "mode";
    pub const DIRECTION: &str = "direction";
    pub const STATUS: &str = "status";
    pub const TIMESTAMP: &str = "timestamp";
}

/// Table and column names the mapper reads. The default is Signal
/// Desktop's schema; any of it can be overridden from JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaLayout {
    pub conversations: TableLayout,
    pub messages: TableLayout,
    pub attachments: TableLayout,
    pub calls: TableLayout,
    pub items: TableLayout,
    /// `items.id` of the row whose JSON `value` is the owner's number.
    pub account_item_id: String,
    /// `messages.type` values for legacy call records.
    pub call_message_kind: String,
    /// `messages.type` values mapped as messages. Other kinds are client
    /// events (key changes, timer updates) and are skipped. Empty maps
    /// every kind.
    pub message_kinds: Vec<String>,
}

impl Default for SchemaLayout {
    fn default() -> Self {
        use ValueKind::{Integer, Text};
        use field::*;

        Self {
            conversations: TableLayout::new(
                "conversations",
                false,
                vec![
                    (ID, ColumnSpec::required(&["id"], Text)),
                    (KIND, ColumnSpec::optional(&["type"], Text)),
                    (NAME, ColumnSpec::optional(&["name"], Text)),
                    (PROFILE_NAME, ColumnSpec::optional(&["profileFullName", "profileName"], Text)),
                    (PHONE, ColumnSpec::optional(&["e164"], Text)),
                    (SERVICE_ID, ColumnSpec::optional(&["serviceId", "uuid"], Text)),
                ],
            ),
            messages: TableLayout::new(
                "messages",
                false,
                vec![
                    (ID, ColumnSpec::required(&["id"], Text)),
                    (CONVERSATION_ID, ColumnSpec::required(&["conversationId"], Text)),
                    (KIND, ColumnSpec::optional(&["type"], Text)),
                    (BODY, ColumnSpec::optional(&["body"], Text)),
                    (JSON, ColumnSpec::optional(&["json"], Text)),
                    (SENT_AT, ColumnSpec::optional(&["sent_at"], Integer)),
                    (RECEIVED_AT, ColumnSpec::optional(&["received_at"], Integer)),
                    (HAS_ATTACHMENTS, ColumnSpec::optional(&["hasAttachments"], Integer)),
                    (SEEN_STATUS, ColumnSpec::optional(&["seenStatus"], Integer)),
                    (IS_ERASED, ColumnSpec::optional(&["isErased"], Integer)),
                    (SOURCE_SERVICE_ID, ColumnSpec::optional(&["sourceServiceId", "sourceUuid"], Text)),
                ],
            ),
            attachments: TableLayout::new(
                "message_attachments",
                true,
                vec![
                    (MESSAGE_ID, ColumnSpec::required(&["messageId"], Text)),
                    (CONTENT_TYPE, ColumnSpec::optional(&["contentType"], Text)),
                    (FILE_NAME, ColumnSpec::optional(&["fileName"], Text)),
                    (PATH, ColumnSpec::optional(&["path"], Text)),
                    (SIZE, ColumnSpec::optional(&["size"], Integer)),
                ],
            ),
            calls: TableLayout::new(
                "callsHistory",
                true,
                vec![
                    (CALL_ID, ColumnSpec::required(&["callId"], Text)),
                    (PEER_ID, ColumnSpec::optional(&["peerId"], Text)),
                    (MODE, ColumnSpec::optional(&["mode"], Text)),
                    (KIND, ColumnSpec::optional(&["type"], Text)),
                    (DIRECTION, ColumnSpec::optional(&["direction"], Text)),
                    (STATUS, ColumnSpec::optional(&["status"], Text)),
                    (TIMESTAMP, ColumnSpec::optional(&["timestamp"], Integer)),
                ],
            ),
            items: TableLayout::new(
                "items",
                true,
                vec![
                    (ID, ColumnSpec::required(&["id"], Text)),
                    (JSON, ColumnSpec::required(&["json"], Text)),
                ],
            ),
            account_item_id: "accountE164".to_string(),
            call_message_kind: "call-history".to_string(),
            message_kinds: vec!["incoming".to_string(), "outgoing".to_string()],
        }
    }
}
