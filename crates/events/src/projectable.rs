//! The unit of work handed to projections.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::entry::Entry;

/// Stable identity of a projectable, used as the confirmation-tracking key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProjectableId {
    pub projectable_type: String,
    pub data_id: String,
    pub data_version: u64,
}

impl core::fmt::Display for ProjectableId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}:{}:{}", self.projectable_type, self.data_id, self.data_version)
    }
}

/// One or more entries (or a materialized state) plus the reasons it should be projected.
///
/// `because_of` drives routing; the identity drives pending/confirmed bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Projectable {
    id: ProjectableId,
    entries: Vec<Entry>,
    state: Option<JsonValue>,
    because_of: Vec<String>,
}

impl Projectable {
    /// Wrap a single committed entry; the only reason is the entry's type.
    pub fn from_entry(entry: Entry) -> Self {
        let id = ProjectableId {
            projectable_type: entry.entry_type.clone(),
            data_id: entry.stream_id.to_string(),
            data_version: entry.stream_version,
        };

        Self {
            id,
            because_of: vec![entry.entry_type.clone()],
            entries: vec![entry],
            state: None,
        }
    }

    /// Wrap several entries of one stream; reasons are their distinct types in order.
    ///
    /// Returns `None` for an empty batch.
    pub fn from_entries(entries: Vec<Entry>) -> Option<Self> {
        let first = entries.first()?;
        let last = entries.last()?;

        let id = ProjectableId {
            projectable_type: "entries".to_string(),
            data_id: first.stream_id.to_string(),
            data_version: last.stream_version,
        };

        let mut because_of: Vec<String> = Vec::new();
        for e in &entries {
            if !because_of.contains(&e.entry_type) {
                because_of.push(e.entry_type.clone());
            }
        }

        Some(Self {
            id,
            entries,
            state: None,
            because_of,
        })
    }

    /// Wrap a materialized state (no entries).
    pub fn from_state(
        state_type: impl Into<String>,
        data_id: impl Into<String>,
        data_version: u64,
        state: JsonValue,
        because_of: Vec<String>,
    ) -> Self {
        Self {
            id: ProjectableId {
                projectable_type: state_type.into(),
                data_id: data_id.into(),
                data_version,
            },
            entries: Vec::new(),
            state: Some(state),
            because_of,
        }
    }

    pub fn id(&self) -> &ProjectableId {
        &self.id
    }

    pub fn because_of(&self) -> &[String] {
        &self.because_of
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn state(&self) -> Option<&JsonValue> {
        self.state.as_ref()
    }

    pub fn data_id(&self) -> &str {
        &self.id.data_id
    }

    pub fn data_version(&self) -> u64 {
        self.id.data_version
    }

    /// Journal position of the first carried entry, if any.
    pub fn global_position(&self) -> Option<u64> {
        self.entries.first().map(|e| e.global_position)
    }
}
