//! Capability trait that lets one manager sync both folders and notes.

use std::fmt;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use libsql::Connection;
use serde_json::{json, Value};

use crate::db::{LibSqlFolderRepository, LibSqlNoteRepository};
use crate::error::{Error, Result};
use crate::models::{Folder, FolderId, Note, NoteId, ProcessingStatus, SyncStatus, UserId};
use crate::remote::{row_i64, row_str, RemoteRow};

/// Syncable record types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Folder,
    Note,
}

impl EntityKind {
    pub const ALL: [Self; 2] = [Self::Folder, Self::Note];

    /// Remote table and local conflict-log entity name.
    pub const fn table(self) -> &'static str {
        match self {
            Self::Folder => "folders",
            Self::Note => "notes",
        }
    }

    /// Kinds that must be synced before this one.
    pub const fn dependencies(self) -> &'static [Self] {
        match self {
            Self::Folder => &[],
            Self::Note => &[Self::Folder],
        }
    }

    /// Every kind, each placed after the kinds it depends on.
    pub fn sync_order() -> Vec<Self> {
        fn visit(kind: EntityKind, order: &mut Vec<EntityKind>) {
            if order.contains(&kind) {
                return;
            }
            for dependency in kind.dependencies() {
                visit(*dependency, order);
            }
            order.push(kind);
        }

        let mut order = Vec::with_capacity(Self::ALL.len());
        for kind in Self::ALL {
            visit(kind, &mut order);
        }
        order
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Folder => "folder",
            Self::Note => "note",
        })
    }
}

/// Whether binary fields travel in this pass, and their size cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PayloadPolicy {
    pub include: bool,
    /// Largest accepted encoded (base64) size per field
    pub max_bytes: usize,
}

impl PayloadPolicy {
    pub const fn metadata_only() -> Self {
        Self {
            include: false,
            max_bytes: 0,
        }
    }
}

/// A converted value plus the binary fields left out of it.
#[derive(Debug, Clone, PartialEq)]
pub struct Transfer<T> {
    pub value: T,
    /// Fields over the size cap
    pub skipped_fields: Vec<&'static str>,
    /// Fields the conversion did not carry; the receiving side keeps its own value
    pub retained_fields: Vec<&'static str>,
}

impl<T> Transfer<T> {
    const fn complete(value: T) -> Self {
        Self {
            value,
            skipped_fields: Vec::new(),
            retained_fields: Vec::new(),
        }
    }
}

/// Serialization and local-store hooks for one record type.
#[async_trait]
pub trait SyncEntity: Clone + Send + Sync + Sized + 'static {
    const KIND: EntityKind;

    fn id_string(&self) -> String;
    fn owner(&self) -> &UserId;
    fn updated_at(&self) -> i64;
    fn deleted_at(&self) -> Option<i64>;
    fn sync_status(&self) -> SyncStatus;
    fn set_sync_status(&mut self, status: SyncStatus);

    /// Remote columns to select for a pass, `None` for all.
    fn remote_columns(policy: &PayloadPolicy) -> Option<&'static [&'static str]>;

    /// Build the remote row. Its `sync_status` is always `synced`.
    fn to_remote_row(&self, policy: &PayloadPolicy) -> Transfer<RemoteRow>;

    /// Parse a remote row into a local record marked `synced`.
    fn from_remote_row(row: &RemoteRow, policy: &PayloadPolicy) -> Result<Transfer<Self>>;

    /// Copy the `retained` binary fields over from the local record.
    fn absorb_local(&mut self, local: &Self, retained: &[&'static str]);

    async fn find_local(conn: &Connection, owner: &UserId, id: &str) -> Result<Option<Self>>;

    /// Records to upload. With payloads in the pass this includes records
    /// whose payloads were held back by an earlier pass.
    async fn pending_local(
        conn: &Connection,
        owner: &UserId,
        policy: &PayloadPolicy,
    ) -> Result<Vec<Self>>;

    async fn save_local(conn: &Connection, record: &Self) -> Result<()>;

    /// Record an accepted upload. `payload_pending` keeps the record queued
    /// for the next pass that carries payloads.
    async fn mark_uploaded_local(
        conn: &Connection,
        owner: &UserId,
        id: &str,
        payload_pending: bool,
    ) -> Result<()>;

    /// Record an applied download. `payload_stale` means the remote payloads
    /// were not pulled and the local ones must not be pushed back.
    async fn mark_downloaded_local(
        _conn: &Connection,
        _owner: &UserId,
        _id: &str,
        _payload_stale: bool,
    ) -> Result<()> {
        Ok(())
    }

    /// Whether the local payloads lag behind the remote copy.
    async fn payload_stale_local(_conn: &Connection, _owner: &UserId, _id: &str) -> Result<bool> {
        Ok(false)
    }

    async fn confirmed_tombstones(conn: &Connection, owner: &UserId) -> Result<Vec<Self>>;
    async fn purge_local(conn: &Connection, owner: &UserId, id: &str) -> Result<()>;
    async fn purge_expired(conn: &Connection, owner: &UserId, cutoff: i64) -> Result<u64>;
}

const FOLDER_COLUMNS: &[&str] = &[
    "id",
    "owner_id",
    "name",
    "color",
    "sort_order",
    "created_at",
    "updated_at",
    "deleted_at",
    "sync_status",
];

const NOTE_METADATA_COLUMNS: &[&str] = &[
    "id",
    "owner_id",
    "title",
    "folder_id",
    "created_at",
    "updated_at",
    "deleted_at",
    "processing_status",
    "sync_status",
];

const ORIGINAL_CONTENT: &str = "original_content";
const AI_CONTENT: &str = "ai_content";

#[async_trait]
impl SyncEntity for Folder {
    const KIND: EntityKind = EntityKind::Folder;

    fn id_string(&self) -> String {
        self.id.as_str()
    }

    fn owner(&self) -> &UserId {
        &self.owner_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }

    fn remote_columns(_policy: &PayloadPolicy) -> Option<&'static [&'static str]> {
        Some(FOLDER_COLUMNS)
    }

    fn to_remote_row(&self, _policy: &PayloadPolicy) -> Transfer<RemoteRow> {
        let row = json!({
            "id": self.id.as_str(),
            "owner_id": self.owner_id.as_str(),
            "name": self.name,
            "color": self.color,
            "sort_order": self.sort_order,
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "deleted_at": self.deleted_at,
            "sync_status": SyncStatus::Synced.as_str(),
        });
        Transfer::complete(into_object(row))
    }

    fn from_remote_row(row: &RemoteRow, _policy: &PayloadPolicy) -> Result<Transfer<Self>> {
        let id: FolderId = parse_id(row, "folder")?;
        let updated_at = required_i64(row, "updated_at")?;
        let folder = Self {
            id,
            owner_id: UserId::new(required_str(row, "owner_id")?),
            name: required_str(row, "name")?.to_string(),
            color: row_str(row, "color")
                .unwrap_or(Self::DEFAULT_COLOR)
                .to_string(),
            sort_order: row_i64(row, "sort_order").unwrap_or_default(),
            created_at: row_i64(row, "created_at").unwrap_or(updated_at),
            updated_at,
            deleted_at: row_i64(row, "deleted_at"),
            sync_status: SyncStatus::Synced,
        };
        Ok(Transfer::complete(folder))
    }

    fn absorb_local(&mut self, _local: &Self, _retained: &[&'static str]) {}

    async fn find_local(conn: &Connection, owner: &UserId, id: &str) -> Result<Option<Self>> {
        LibSqlFolderRepository::new(conn).find_any(owner, id).await
    }

    async fn pending_local(
        conn: &Connection,
        owner: &UserId,
        _policy: &PayloadPolicy,
    ) -> Result<Vec<Self>> {
        LibSqlFolderRepository::new(conn).pending(owner).await
    }

    async fn save_local(conn: &Connection, record: &Self) -> Result<()> {
        LibSqlFolderRepository::new(conn).save(record).await
    }

    async fn mark_uploaded_local(
        conn: &Connection,
        owner: &UserId,
        id: &str,
        _payload_pending: bool,
    ) -> Result<()> {
        LibSqlFolderRepository::new(conn).mark_synced(owner, id).await
    }

    async fn confirmed_tombstones(conn: &Connection, owner: &UserId) -> Result<Vec<Self>> {
        LibSqlFolderRepository::new(conn)
            .confirmed_tombstones(owner)
            .await
    }

    async fn purge_local(conn: &Connection, owner: &UserId, id: &str) -> Result<()> {
        LibSqlFolderRepository::new(conn).purge(owner, id).await
    }

    async fn purge_expired(conn: &Connection, owner: &UserId, cutoff: i64) -> Result<u64> {
        LibSqlFolderRepository::new(conn)
            .purge_expired(owner, cutoff)
            .await
    }
}

#[async_trait]
impl SyncEntity for Note {
    const KIND: EntityKind = EntityKind::Note;

    fn id_string(&self) -> String {
        self.id.as_str()
    }

    fn owner(&self) -> &UserId {
        &self.owner_id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn deleted_at(&self) -> Option<i64> {
        self.deleted_at
    }

    fn sync_status(&self) -> SyncStatus {
        self.sync_status
    }

    fn set_sync_status(&mut self, status: SyncStatus) {
        self.sync_status = status;
    }

    fn remote_columns(policy: &PayloadPolicy) -> Option<&'static [&'static str]> {
        if policy.include {
            None
        } else {
            Some(NOTE_METADATA_COLUMNS)
        }
    }

    fn to_remote_row(&self, policy: &PayloadPolicy) -> Transfer<RemoteRow> {
        let mut row = into_object(json!({
            "id": self.id.as_str(),
            "owner_id": self.owner_id.as_str(),
            "title": self.title,
            "folder_id": self.folder_id.map(|id| id.as_str()),
            "created_at": self.created_at,
            "updated_at": self.updated_at,
            "deleted_at": self.deleted_at,
            "processing_status": self.processing_status.as_str(),
            "sync_status": SyncStatus::Synced.as_str(),
        }));

        let mut skipped_fields = Vec::new();
        let mut retained_fields = Vec::new();
        for (field, payload) in [
            (ORIGINAL_CONTENT, self.original_content.as_deref()),
            (AI_CONTENT, self.ai_content.as_deref()),
        ] {
            if !policy.include {
                retained_fields.push(field);
                continue;
            }
            match encode_payload(payload, policy.max_bytes) {
                Some(value) => {
                    row.insert(field.to_string(), value);
                }
                None => {
                    skipped_fields.push(field);
                    retained_fields.push(field);
                }
            }
        }

        Transfer {
            value: row,
            skipped_fields,
            retained_fields,
        }
    }

    fn from_remote_row(row: &RemoteRow, policy: &PayloadPolicy) -> Result<Transfer<Self>> {
        let id: NoteId = parse_id(row, "note")?;
        let updated_at = required_i64(row, "updated_at")?;
        let folder_id = match row_str(row, "folder_id") {
            Some(raw) => Some(raw.parse::<FolderId>().map_err(|_| {
                Error::Validation(format!("note {id} has invalid folder_id '{raw}'"))
            })?),
            None => None,
        };
        let processing_status = row_str(row, "processing_status")
            .map(str::parse::<ProcessingStatus>)
            .transpose()?
            .unwrap_or_default();

        let mut skipped_fields = Vec::new();
        let mut retained_fields = Vec::new();
        let mut payload = |field: &'static str| -> Result<Option<Vec<u8>>> {
            let decoded = if policy.include {
                decode_payload(row, field, policy.max_bytes)?
            } else {
                Payload::Absent
            };
            Ok(match decoded {
                Payload::Bytes(bytes) => Some(bytes),
                Payload::Cleared => None,
                Payload::Absent => {
                    retained_fields.push(field);
                    None
                }
                Payload::Oversized => {
                    skipped_fields.push(field);
                    retained_fields.push(field);
                    None
                }
            })
        };
        let original_content = payload(ORIGINAL_CONTENT)?;
        let ai_content = payload(AI_CONTENT)?;

        let note = Self {
            id,
            owner_id: UserId::new(required_str(row, "owner_id")?),
            title: row_str(row, "title").unwrap_or_default().to_string(),
            folder_id,
            created_at: row_i64(row, "created_at").unwrap_or(updated_at),
            updated_at,
            deleted_at: row_i64(row, "deleted_at"),
            original_content,
            ai_content,
            processing_status,
            sync_status: SyncStatus::Synced,
        };
        Ok(Transfer {
            value: note,
            skipped_fields,
            retained_fields,
        })
    }

    fn absorb_local(&mut self, local: &Self, retained: &[&'static str]) {
        for field in retained {
            match *field {
                ORIGINAL_CONTENT => self.original_content.clone_from(&local.original_content),
                AI_CONTENT => self.ai_content.clone_from(&local.ai_content),
                _ => {}
            }
        }
    }

    async fn find_local(conn: &Connection, owner: &UserId, id: &str) -> Result<Option<Self>> {
        LibSqlNoteRepository::new(conn).find_any(owner, id).await
    }

    async fn pending_local(
        conn: &Connection,
        owner: &UserId,
        policy: &PayloadPolicy,
    ) -> Result<Vec<Self>> {
        LibSqlNoteRepository::new(conn)
            .upload_candidates(owner, policy.include)
            .await
    }

    async fn save_local(conn: &Connection, record: &Self) -> Result<()> {
        LibSqlNoteRepository::new(conn).save(record).await
    }

    async fn mark_uploaded_local(
        conn: &Connection,
        owner: &UserId,
        id: &str,
        payload_pending: bool,
    ) -> Result<()> {
        LibSqlNoteRepository::new(conn)
            .mark_uploaded(owner, id, payload_pending)
            .await
    }

    async fn mark_downloaded_local(
        conn: &Connection,
        owner: &UserId,
        id: &str,
        payload_stale: bool,
    ) -> Result<()> {
        LibSqlNoteRepository::new(conn)
            .mark_downloaded(owner, id, payload_stale)
            .await
    }

    async fn payload_stale_local(conn: &Connection, owner: &UserId, id: &str) -> Result<bool> {
        LibSqlNoteRepository::new(conn).payload_stale(owner, id).await
    }

    async fn confirmed_tombstones(conn: &Connection, owner: &UserId) -> Result<Vec<Self>> {
        LibSqlNoteRepository::new(conn)
            .confirmed_tombstones(owner)
            .await
    }

    async fn purge_local(conn: &Connection, owner: &UserId, id: &str) -> Result<()> {
        LibSqlNoteRepository::new(conn).purge(owner, id).await
    }

    async fn purge_expired(conn: &Connection, owner: &UserId, cutoff: i64) -> Result<u64> {
        LibSqlNoteRepository::new(conn)
            .purge_expired(owner, cutoff)
            .await
    }
}

fn into_object(value: Value) -> RemoteRow {
    match value {
        Value::Object(map) => map,
        _ => RemoteRow::new(),
    }
}

fn required_str<'a>(row: &'a RemoteRow, column: &str) -> Result<&'a str> {
    row_str(row, column)
        .ok_or_else(|| Error::Validation(format!("remote row is missing '{column}'")))
}

fn required_i64(row: &RemoteRow, column: &str) -> Result<i64> {
    row_i64(row, column)
        .ok_or_else(|| Error::Validation(format!("remote row is missing '{column}'")))
}

fn parse_id<T: std::str::FromStr>(row: &RemoteRow, label: &str) -> Result<T> {
    let raw = required_str(row, "id")?;
    raw.parse()
        .map_err(|_| Error::Validation(format!("invalid {label} id '{raw}'")))
}

/// `None` means the field is over the cap and must be left out.
fn encode_payload(payload: Option<&[u8]>, max_bytes: usize) -> Option<Value> {
    let Some(bytes) = payload else {
        return Some(Value::Null);
    };
    let encoded_len = bytes.len().div_ceil(3) * 4;
    if encoded_len > max_bytes {
        return None;
    }
    Some(Value::String(STANDARD.encode(bytes)))
}

/// One binary column of a remote row.
#[derive(Debug, PartialEq, Eq)]
enum Payload {
    /// Column not in the row
    Absent,
    /// Explicit `null`: the content was removed
    Cleared,
    Oversized,
    Bytes(Vec<u8>),
}

fn decode_payload(row: &RemoteRow, field: &str, max_bytes: usize) -> Result<Payload> {
    match row.get(field) {
        None => Ok(Payload::Absent),
        Some(Value::Null) => Ok(Payload::Cleared),
        Some(Value::String(encoded)) if encoded.len() > max_bytes => Ok(Payload::Oversized),
        Some(Value::String(encoded)) => STANDARD
            .decode(encoded)
            .map(Payload::Bytes)
            .map_err(|error| Error::Validation(format!("invalid base64 in '{field}': {error}"))),
        Some(other) => Err(Error::Validation(format!(
            "expected base64 string in '{field}', found {other}"
        ))),
    }
}
