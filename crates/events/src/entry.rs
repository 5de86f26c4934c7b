use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use uuid::Uuid;

use chronicle_core::StreamId;

use crate::adapter::AdapterError;
use crate::event::Event;

/// An entry ready to be appended to a stream (not yet assigned any position).
///
/// The journal assigns `stream_version`, `global_position`, `entry_id` and
/// `committed_at` during append; the writer only supplies what the fact *is*.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewEntry {
    pub entry_type: String,
    pub type_version: u32,
    pub payload: JsonValue,
}

impl NewEntry {
    pub fn new(entry_type: impl Into<String>, type_version: u32, payload: JsonValue) -> Self {
        Self {
            entry_type: entry_type.into(),
            type_version,
            payload,
        }
    }

    /// Serialize a typed event, capturing its type name and current schema version.
    pub fn from_event<E>(event: &E) -> Result<Self, AdapterError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event).map_err(|e| AdapterError::Encode {
            entry_type: event.event_type().to_string(),
            reason: e.to_string(),
        })?;

        Ok(Self::new(event.event_type(), event.version(), payload))
    }
}

/// One committed, immutable fact.
///
/// Entries are never physically removed; soft-delete, tombstone and truncation
/// only change whether a per-stream read returns them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub entry_id: Uuid,
    pub stream_id: StreamId,

    pub entry_type: String,
    pub type_version: u32,
    pub payload: JsonValue,

    /// 1-based position within this stream.
    pub stream_version: u64,
    /// 0-based position within the whole journal (total commit order).
    pub global_position: u64,

    pub metadata: Metadata,
    pub committed_at: DateTime<Utc>,
}

/// Opaque context stored alongside every entry of one append.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub value: JsonValue,
    pub operation: String,
    pub properties: BTreeMap<String, String>,
}

impl Metadata {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn with_value(mut self, value: JsonValue) -> Self {
        self.value = value;
        self
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = operation.into();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.value.is_null() && self.operation.is_empty() && self.properties.is_empty()
    }
}

/// Latest materialized state of a stream, written together with an append.
///
/// The journal does not check that `version` tracks the stream version; keeping
/// them consistent is the writer's job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: u64,
    pub payload: JsonValue,
}

impl Snapshot {
    pub fn new(version: u64, payload: JsonValue) -> Self {
        Self { version, payload }
    }
}

/// Lifecycle of a stream.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamStatus {
    #[default]
    Active,
    /// Entries hidden; cleared by the next successful append.
    SoftDeleted,
    /// Terminal: no further appends, ever.
    Tombstoned,
}

/// Per-stream read result: the visible history plus the latest snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryStream {
    pub stream_id: StreamId,
    /// The stream's current version, even when every entry is hidden.
    pub stream_version: u64,
    pub entries: Vec<Entry>,
    pub snapshot: Option<Snapshot>,
    pub is_tombstoned: bool,
    pub is_soft_deleted: bool,
}

impl EntryStream {
    /// Read result for a stream that was never appended to.
    pub fn empty(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            stream_version: 0,
            entries: Vec::new(),
            snapshot: None,
            is_tombstoned: false,
            is_soft_deleted: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn has_snapshot(&self) -> bool {
        self.snapshot.is_some()
    }
}

/// Point-in-time view of a stream's bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamInfo {
    pub stream_id: StreamId,
    pub exists: bool,
    pub current_version: u64,
    pub status: StreamStatus,
    pub truncate_before: u64,
    pub visible_entry_count: usize,
}

impl StreamInfo {
    pub fn missing(stream_id: StreamId) -> Self {
        Self {
            stream_id,
            exists: false,
            current_version: 0,
            status: StreamStatus::Active,
            truncate_before: 0,
            visible_entry_count: 0,
        }
    }

    pub fn is_tombstoned(&self) -> bool {
        self.status == StreamStatus::Tombstoned
    }

    pub fn is_soft_deleted(&self) -> bool {
        self.status == StreamStatus::SoftDeleted
    }
}

/// Outcome of a successful append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendResult {
    pub stream_id: StreamId,
    /// The stream's current version after the append.
    pub stream_version: u64,
    /// The committed entries, in stream order.
    pub entries: Vec<Entry>,
}

impl AppendResult {
    pub fn first_version(&self) -> Option<u64> {
        self.entries.first().map(|e| e.stream_version)
    }

    pub fn last_version(&self) -> Option<u64> {
        self.entries.last().map(|e| e.stream_version)
    }

    pub fn global_positions(&self) -> Vec<u64> {
        self.entries.iter().map(|e| e.global_position).collect()
    }
}
