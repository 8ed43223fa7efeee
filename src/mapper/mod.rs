pub mod entities;
pub mod layout;

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;
use serde_json::Value as Json;
use tracing::debug;

use crate::{
    mapper::{
        entities::{AccountOwner, Attachment, CallLog, Contact, Direction, EntityRef, Message, timestamp_millis},
        layout::{ColumnSpec, SchemaLayout, TableLayout, field},
    },
    recovery::row_set::{RecoveredRow, RecoveredRowSet},
    storage::schema::SchemaCatalog,
    types::{error::RecoveryWarning, value::Value},
};

#[derive(Debug, Default, Clone, Serialize)]
pub struct MappedArtifacts {
    pub owner: Option<AccountOwner>,
    pub contacts: Vec<Contact>,
    pub messages: Vec<Message>,
    pub calls: Vec<CallLog>,
    pub warnings: Vec<RecoveryWarning>,
}

static NULL: Value = Value::Null;

/// A table layout resolved against the schema actually present.
struct BoundTable<'l> {
    table: String,
    fields: Vec<(&'l str, &'l ColumnSpec, usize)>,
}

impl<'l> BoundTable<'l> {
    fn bind(layout: &'l TableLayout, catalog: &SchemaCatalog, warnings: &mut Vec<RecoveryWarning>) -> Option<Self> {
        let Some(schema) = catalog.table(&layout.table) else {
            if layout.optional {
                debug!(table = %layout.table, "optional table absent");
            } else {
                warnings.push(RecoveryWarning::MissingTable {
                    table: layout.table.clone(),
                });
            }
            return None;
        };

        let mut fields = Vec::with_capacity(layout.fields.len());
        for (name, spec) in &layout.fields {
            match spec.names.iter().find_map(|n| schema.column(n)) {
                Some(column) => fields.push((name.as_str(), spec, column.position)),
                None if spec.required => {
                    warnings.push(RecoveryWarning::SchemaMismatch {
                        table: schema.name.clone(),
                        row_id: None,
                        column: spec.names.join("|"),
                        reason: "required column missing".to_string(),
                    });
                    return None;
                }
                None => debug!(table = %schema.name, field = %name, "optional column absent"),
            }
        }
        Some(Self {
            table: schema.name.clone(),
            fields,
        })
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.fields.iter().find(|(f, _, _)| *f == name).map(|(_, _, p)| *p)
    }

    /// Checks one row against the layout. A bad required column rejects
    /// the row; a bad optional column is dropped with a warning.
    fn read<'r>(&self, row: &'r RecoveredRow, warnings: &mut Vec<RecoveryWarning>) -> Option<Fields<'l, 'r>> {
        let mut values = BTreeMap::new();
        for (name, spec, position) in &self.fields {
            let value = row.values.get(*position).unwrap_or(&NULL);
            let problem = if value.is_null() {
                spec.required.then(|| "required column is NULL".to_string())
            } else if !spec.kind.accepts(value) {
                Some(format!("expected {:?}, found {}", spec.kind, value.data_type()))
            } else {
                values.insert(*name, value);
                None
            };
            if let Some(reason) = problem {
                warnings.push(RecoveryWarning::SchemaMismatch {
                    table: self.table.clone(),
                    row_id: Some(row.row_id),
                    column: spec.names.join("|"),
                    reason,
                });
                if spec.required {
                    return None;
                }
            }
        }
        Some(Fields { values })
    }
}

struct Fields<'l, 'r> {
    values: BTreeMap<&'l str, &'r Value>,
}

impl Fields<'_, '_> {
    fn text(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_str())
    }

    fn owned(&self, name: &str) -> Option<String> {
        self.text(name).map(str::to_string)
    }

    fn int(&self, name: &str) -> Option<i64> {
        self.values.get(name).and_then(|v| v.as_i64())
    }
}

fn json_i64(value: Option<&Json>) -> Option<i64> {
    let value = value?;
    value.as_i64().or_else(|| value.as_f64().map(|f| f as i64))
}

fn json_str(value: Option<&Json>) -> Option<String> {
    value.and_then(Json::as_str).map(str::to_string)
}

/// Contacts indexed by conversation id, phone number and service id.
struct Directory<'c> {
    contacts: &'c [Contact],
    index: HashMap<&'c str, usize>,
}

impl<'c> Directory<'c> {
    fn new(contacts: &'c [Contact]) -> Self {
        let mut index = HashMap::new();
        for (i, contact) in contacts.iter().enumerate() {
            for key in [Some(contact.id.as_str()), contact.phone.as_deref(), contact.service_id.as_deref()]
                .into_iter()
                .flatten()
            {
                index.entry(key).or_insert(i);
            }
        }
        Self { contacts, index }
    }

    fn get(&self, key: &str) -> Option<&'c Contact> {
        self.index.get(key).map(|i| &self.contacts[*i])
    }

    fn name(&self, key: &str) -> String {
        self.get(key).map_or_else(|| key.to_string(), Contact::display_name)
    }
}

/// Projects recovered rows onto Signal Desktop entities. Pure: reads the
/// row set, never fails, and reports unusable rows as warnings.
pub struct SchemaMapper {
    layout: SchemaLayout,
}

impl SchemaMapper {
    pub fn new(layout: SchemaLayout) -> Self {
        Self { layout }
    }

    pub fn map(&self, rows: &RecoveredRowSet, catalog: &SchemaCatalog) -> MappedArtifacts {
        let mut warnings = Vec::new();

        let contacts = self.contacts(rows, catalog, &mut warnings);
        let directory = Directory::new(&contacts);
        let owner = self.account_owner(rows, catalog, &directory, &mut warnings);
        let mut attachments = self.attachments(rows, catalog, &mut warnings);
        let (messages, mut calls) =
            self.messages(rows, catalog, &directory, owner.as_ref(), &mut attachments, &mut warnings);
        calls.extend(self.call_history(rows, catalog, &directory, owner.as_ref(), &mut warnings));

        debug!(
            contacts = contacts.len(),
            messages = messages.len(),
            calls = calls.len(),
            warnings = warnings.len(),
            "mapped entities"
        );
        MappedArtifacts {
            owner,
            contacts,
            messages,
            calls,
            warnings,
        }
    }

    fn contacts(&self, rows: &RecoveredRowSet, catalog: &SchemaCatalog, warnings: &mut Vec<RecoveryWarning>) -> Vec<Contact> {
        let Some(bound) = BoundTable::bind(&self.layout.conversations, catalog, warnings) else {
            return Vec::new();
        };
        rows.table_rows(&bound.table)
            .filter_map(|row| {
                let f = bound.read(row, warnings)?;
                Some(Contact {
                    source: EntityRef::of(row),
                    id: f.owned(field::ID)?,
                    kind: f.owned(field::KIND),
                    name: f.owned(field::NAME),
                    profile_name: f.owned(field::PROFILE_NAME),
                    phone: f.owned(field::PHONE),
                    service_id: f.owned(field::SERVICE_ID),
                })
            })
            .collect()
    }

    fn account_owner(
        &self,
        rows: &RecoveredRowSet,
        catalog: &SchemaCatalog,
        directory: &Directory<'_>,
        warnings: &mut Vec<RecoveryWarning>,
    ) -> Option<AccountOwner> {
        let bound = BoundTable::bind(&self.layout.items, catalog, warnings)?;
        let phone = rows.table_rows(&bound.table).find_map(|row| {
            let f = bound.read(row, warnings)?;
            if f.text(field::ID)? != self.layout.account_item_id {
                return None;
            }
            let json: Json = serde_json::from_str(f.text(field::JSON)?).ok()?;
            json_str(json.get("value"))
        })?;
        let profile_name = directory.get(&phone).and_then(|c| c.profile_name.clone());
        Some(AccountOwner { phone, profile_name })
    }

    fn attachments(
        &self,
        rows: &RecoveredRowSet,
        catalog: &SchemaCatalog,
        warnings: &mut Vec<RecoveryWarning>,
    ) -> HashMap<String, Vec<Attachment>> {
        let mut by_message: HashMap<String, Vec<Attachment>> = HashMap::new();
        let Some(bound) = BoundTable::bind(&self.layout.attachments, catalog, warnings) else {
            return by_message;
        };
        for row in rows.table_rows(&bound.table) {
            let Some(f) = bound.read(row, warnings) else {
                continue;
            };
            let Some(message_id) = f.owned(field::MESSAGE_ID) else {
                continue;
            };
            by_message.entry(message_id.clone()).or_default().push(Attachment {
                source: Some(EntityRef::of(row)),
                message_id,
                content_type: f.owned(field::CONTENT_TYPE),
                file_name: f.owned(field::FILE_NAME),
                path: f.owned(field::PATH),
                size: f.int(field::SIZE),
            });
        }
        by_message
    }

    fn parse_json(table: &str, row: &RecoveredRow, text: Option<&str>, warnings: &mut Vec<RecoveryWarning>) -> Json {
        let Some(text) = text else {
            return Json::Null;
        };
        serde_json::from_str(text).unwrap_or_else(|e| {
            warnings.push(RecoveryWarning::SchemaMismatch {
                table: table.to_string(),
                row_id: Some(row.row_id),
                column: field::JSON.to_string(),
                reason: format!("invalid JSON: {e}"),
            });
            Json::Null
        })
    }

    fn accepts_kind(&self, kind: &str) -> bool {
        self.layout.message_kinds.is_empty() || self.layout.message_kinds.iter().any(|k| k == kind)
    }

    fn messages(
        &self,
        rows: &RecoveredRowSet,
        catalog: &SchemaCatalog,
        directory: &Directory<'_>,
        owner: Option<&AccountOwner>,
        attachments: &mut HashMap<String, Vec<Attachment>>,
        warnings: &mut Vec<RecoveryWarning>,
    ) -> (Vec<Message>, Vec<CallLog>) {
        let mut messages = Vec::new();
        let mut calls = Vec::new();
        let Some(bound) = BoundTable::bind(&self.layout.messages, catalog, warnings) else {
            return (messages, calls);
        };
        let owner_name = owner.map(AccountOwner::display_name);
        let body_position = bound.position(field::BODY);

        for row in rows.table_rows(&bound.table) {
            let Some(f) = bound.read(row, warnings) else {
                continue;
            };
            let (Some(id), Some(conversation_id)) = (f.owned(field::ID), f.owned(field::CONVERSATION_ID)) else {
                continue;
            };
            let json = Self::parse_json(&bound.table, row, f.text(field::JSON), warnings);
            let kind = f.owned(field::KIND);
            let conversation = directory.get(&conversation_id);

            if kind.as_deref() == Some(self.layout.call_message_kind.as_str()) {
                calls.push(legacy_call(row, &conversation_id, &json, directory, owner));
                continue;
            }
            if let Some(other) = kind.as_deref().filter(|k| !self.accepts_kind(k)) {
                debug!(table = %bound.table, id = %id, kind = other, "skipping non-message row");
                continue;
            }

            let direction = match kind.as_deref() {
                Some("incoming") => Direction::Incoming,
                Some("outgoing") => Direction::Outgoing,
                _ => Direction::Unknown,
            };
            let peer = conversation.map(Contact::display_name);
            let is_group = conversation.is_some_and(Contact::is_group);
            let (sender, recipient) = match direction {
                Direction::Incoming if is_group => {
                    let source = f
                        .owned(field::SOURCE_SERVICE_ID)
                        .or_else(|| json_str(json.get("sourceServiceId")))
                        .or_else(|| json_str(json.get("sourceUuid")));
                    (source.map(|s| directory.name(&s)), peer)
                }
                Direction::Incoming => (peer, owner_name.clone()),
                Direction::Outgoing => (owner_name.clone(), peer),
                Direction::Unknown => (None, peer),
            };

            let mut read_by = Vec::new();
            if direction == Direction::Incoming && f.int(field::SEEN_STATUS) == Some(2) {
                read_by.extend(owner_name.clone());
            }
            if let Some(states) = json.get("sendStateByConversationId").and_then(Json::as_object) {
                for (recipient_id, state) in states {
                    if state.get("status").and_then(Json::as_str) == Some("Read") {
                        read_by.push(directory.name(recipient_id));
                    }
                }
            }

            let mut message_attachments = attachments.remove(&id).unwrap_or_default();
            if message_attachments.is_empty() {
                if let Some(listed) = json.get("attachments").and_then(Json::as_array) {
                    message_attachments = listed
                        .iter()
                        .map(|a| Attachment {
                            source: None,
                            message_id: id.clone(),
                            content_type: json_str(a.get("contentType")),
                            file_name: json_str(a.get("fileName")),
                            path: json_str(a.get("path")),
                            size: json_i64(a.get("size")),
                        })
                        .collect();
                }
            }

            let body = f.owned(field::BODY);
            let previous_bodies = row
                .history
                .iter()
                .filter_map(|version| body_position.and_then(|p| version.values.get(p)))
                .filter_map(|v| v.as_str().map(str::to_string))
                .filter(|old| body.as_deref() != Some(old.as_str()))
                .collect();

            messages.push(Message {
                source: EntityRef::of(row),
                recovered: row.status.is_recovered(),
                id,
                conversation_id,
                kind,
                direction,
                sender,
                recipient,
                body,
                erased: f.int(field::IS_ERASED).is_some_and(|v| v != 0),
                quote: json_str(json.get("quote").and_then(|q| q.get("text"))),
                sticker_path: json_str(json.pointer("/sticker/data/path")),
                timestamp: json_i64(json.get("timestamp"))
                    .or(f.int(field::SENT_AT))
                    .and_then(timestamp_millis),
                received_at: f.int(field::RECEIVED_AT).and_then(timestamp_millis),
                read_by,
                attachments: message_attachments,
                previous_bodies,
            });
        }
        (messages, calls)
    }

    fn call_history(
        &self,
        rows: &RecoveredRowSet,
        catalog: &SchemaCatalog,
        directory: &Directory<'_>,
        owner: Option<&AccountOwner>,
        warnings: &mut Vec<RecoveryWarning>,
    ) -> Vec<CallLog> {
        let Some(bound) = BoundTable::bind(&self.layout.calls, catalog, warnings) else {
            return Vec::new();
        };
        let owner_name = owner.map(AccountOwner::display_name);
        rows.table_rows(&bound.table)
            .filter_map(|row| {
                let f = bound.read(row, warnings)?;
                let peer_id = f.owned(field::PEER_ID);
                let peer = peer_id.as_deref().map(|p| directory.name(p));
                let direction = match f.text(field::DIRECTION) {
                    Some(d) if d.eq_ignore_ascii_case("incoming") => Direction::Incoming,
                    Some(d) if d.eq_ignore_ascii_case("outgoing") => Direction::Outgoing,
                    _ => Direction::Unknown,
                };
                let (caller, callee) = match direction {
                    Direction::Incoming => (peer, owner_name.clone()),
                    Direction::Outgoing => (owner_name.clone(), peer),
                    Direction::Unknown => (peer, None),
                };
                Some(CallLog {
                    source: EntityRef::of(row),
                    recovered: row.status.is_recovered(),
                    call_id: f.owned(field::CALL_ID),
                    conversation_id: peer_id,
                    mode: f.owned(field::MODE),
                    direction,
                    caller,
                    callee,
                    response: f.owned(field::STATUS),
                    started_at: f.int(field::TIMESTAMP).and_then(timestamp_millis),
                    accepted_at: None,
                    ended_at: None,
                })
            })
            .collect()
    }
}

/// Older clients store calls as `messages` rows with a
/// `callHistoryDetails` object in the JSON column.
fn legacy_call(
    row: &RecoveredRow,
    conversation_id: &str,
    json: &Json,
    directory: &Directory<'_>,
    owner: Option<&AccountOwner>,
) -> CallLog {
    let details = json.get("callHistoryDetails").unwrap_or(&Json::Null);
    let mode = json_str(details.get("callMode"));
    let owner_name = owner.map(AccountOwner::display_name);
    let conversation = directory.name(conversation_id);

    let mut call = CallLog {
        source: EntityRef::of(row),
        recovered: row.status.is_recovered(),
        call_id: json_str(details.get("callId")),
        conversation_id: Some(conversation_id.to_string()),
        mode: mode.clone(),
        direction: Direction::Unknown,
        caller: None,
        callee: None,
        response: None,
        started_at: json_i64(details.get("startedTime")).and_then(timestamp_millis),
        accepted_at: json_i64(details.get("acceptedTime")).and_then(timestamp_millis),
        ended_at: json_i64(details.get("endedTime")).and_then(timestamp_millis),
    };

    if mode.as_deref() == Some("Group") {
        let creator = json_str(details.get("creatorUuid")).map(|c| directory.name(&c));
        let initiated = owner
            .and_then(|o| o.profile_name.as_deref())
            .zip(creator.as_deref())
            .is_some_and(|(mine, theirs)| mine == theirs);
        call.direction = if initiated { Direction::Outgoing } else { Direction::Incoming };
        call.response = Some(if initiated { "Initiated" } else { "Joined" }.to_string());
        call.caller = creator;
        call.callee = Some(conversation);
    } else {
        let incoming = details.get("wasIncoming").and_then(Json::as_bool).unwrap_or(false);
        call.response = Some(if call.accepted_at.is_some() { "Answered" } else { "Declined" }.to_string());
        if incoming {
            call.direction = Direction::Incoming;
            call.caller = Some(conversation);
            call.callee = owner_name;
        } else {
            call.direction = Direction::Outgoing;
            call.caller = owner_name;
            call.callee = Some(conversation);
        }
    }
    call
}
