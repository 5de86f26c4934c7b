use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use tracing::debug;
use uuid::Uuid;

use chronicle_core::{ExpectedVersion, JournalError, JournalResult, StreamId};
use chronicle_events::{
    AppendResult, Entry, EntryStream, Metadata, NewEntry, Snapshot, StreamInfo, StreamStatus,
};

use super::reader::{InMemoryJournalReader, InMemoryStreamReader};
use super::r#trait::{Journal, JournalReader, StreamReader};

/// Bookkeeping for one stream. Entries live in the shared global log.
#[derive(Debug, Default)]
pub(crate) struct StreamState {
    status: StreamStatus,
    truncate_before: u64,
    /// Index into the global log for stream versions `1..=positions.len()`.
    positions: Vec<usize>,
    snapshot: Option<Snapshot>,
}

impl StreamState {
    fn current_version(&self) -> u64 {
        self.positions.len() as u64
    }

    fn visible<'a>(&'a self, log: &'a [Entry]) -> impl Iterator<Item = &'a Entry> + 'a {
        let hidden = self.status != StreamStatus::Active;
        self.positions
            .iter()
            .filter_map(move |&idx| log.get(idx))
            .filter(move |e| !hidden && e.stream_version >= self.truncate_before)
    }
}

/// Journal-wide storage shared by the journal and all of its readers.
#[derive(Debug, Default)]
pub(crate) struct JournalState {
    /// Every committed entry; index == global position.
    log: Vec<Entry>,
    streams: HashMap<StreamId, StreamState>,
}

impl JournalState {
    pub(crate) fn len(&self) -> u64 {
        self.log.len() as u64
    }

    pub(crate) fn read_from(&self, position: u64, max: usize) -> Vec<Entry> {
        let start = usize::try_from(position).unwrap_or(usize::MAX).min(self.log.len());
        let end = start.saturating_add(max).min(self.log.len());
        self.log[start..end].to_vec()
    }

    pub(crate) fn entry_stream(&self, stream_id: &StreamId) -> EntryStream {
        let Some(stream) = self.streams.get(stream_id) else {
            return EntryStream::empty(stream_id.clone());
        };

        let visible = stream.status == StreamStatus::Active;
        EntryStream {
            stream_id: stream_id.clone(),
            stream_version: stream.current_version(),
            entries: stream.visible(&self.log).cloned().collect(),
            snapshot: if visible { stream.snapshot.clone() } else { None },
            is_tombstoned: stream.status == StreamStatus::Tombstoned,
            is_soft_deleted: stream.status == StreamStatus::SoftDeleted,
        }
    }

    fn stream_info(&self, stream_id: &StreamId) -> StreamInfo {
        let Some(stream) = self.streams.get(stream_id) else {
            return StreamInfo::missing(stream_id.clone());
        };

        StreamInfo {
            stream_id: stream_id.clone(),
            exists: true,
            current_version: stream.current_version(),
            status: stream.status,
            truncate_before: stream.truncate_before,
            visible_entry_count: stream.visible(&self.log).count(),
        }
    }

    fn commit(
        &mut self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entries: Vec<NewEntry>,
        metadata: Metadata,
        snapshot: Option<Snapshot>,
    ) -> JournalResult<AppendResult> {
        let current = match self.streams.get(stream_id) {
            Some(s) if s.status == StreamStatus::Tombstoned => {
                return Err(JournalError::StreamDeleted(stream_id.clone()));
            }
            Some(s) => s.current_version(),
            None => 0,
        };

        if !expected_version.matches(current) {
            debug!(
                stream_id = %stream_id,
                expected = %expected_version,
                current,
                "append rejected: concurrency violation"
            );
            return Err(JournalError::ConcurrencyViolation {
                stream_id: stream_id.clone(),
                expected: expected_version,
                actual: current,
            });
        }

        // Checks passed; from here on the append cannot fail.
        let log = &mut self.log;
        let stream = self.streams.entry(stream_id.clone()).or_default();
        let committed_at = Utc::now();

        let mut committed = Vec::with_capacity(entries.len());
        let mut next_version = current + 1;
        for e in entries {
            let entry = Entry {
                entry_id: Uuid::now_v7(),
                stream_id: stream_id.clone(),
                entry_type: e.entry_type,
                type_version: e.type_version,
                payload: e.payload,
                stream_version: next_version,
                global_position: log.len() as u64,
                metadata: metadata.clone(),
                committed_at,
            };
            next_version += 1;
            stream.positions.push(log.len());
            log.push(entry.clone());
            committed.push(entry);
        }

        if stream.status == StreamStatus::SoftDeleted {
            debug!(stream_id = %stream_id, "append reopened soft-deleted stream");
            stream.status = StreamStatus::Active;
        }

        if let Some(snapshot) = snapshot {
            stream.snapshot = Some(snapshot);
        }

        Ok(AppendResult {
            stream_id: stream_id.clone(),
            stream_version: stream.current_version(),
            entries: committed,
        })
    }

    fn tombstone(&mut self, stream_id: &StreamId) -> JournalResult<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| JournalError::NotFound(stream_id.clone()))?;

        if stream.status == StreamStatus::Tombstoned {
            return Err(JournalError::AlreadyTombstoned(stream_id.clone()));
        }

        stream.status = StreamStatus::Tombstoned;
        Ok(())
    }

    fn soft_delete(&mut self, stream_id: &StreamId) -> JournalResult<()> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| JournalError::NotFound(stream_id.clone()))?;

        if stream.status != StreamStatus::Active {
            return Err(JournalError::AlreadyDeleted(stream_id.clone()));
        }

        stream.status = StreamStatus::SoftDeleted;
        Ok(())
    }

    fn truncate_before(&mut self, stream_id: &StreamId, version: u64) -> JournalResult<u64> {
        let stream = self
            .streams
            .get_mut(stream_id)
            .ok_or_else(|| JournalError::NotFound(stream_id.clone()))?;

        if stream.status == StreamStatus::Tombstoned {
            return Err(JournalError::Tombstoned(stream_id.clone()));
        }

        stream.truncate_before = stream.truncate_before.max(version);
        Ok(stream.truncate_before)
    }
}

pub(crate) type SharedState = Arc<RwLock<JournalState>>;

pub(crate) fn read_state(state: &SharedState) -> JournalResult<RwLockReadGuard<'_, JournalState>> {
    state
        .read()
        .map_err(|_| JournalError::storage("journal lock poisoned"))
}

fn write_state(state: &SharedState) -> JournalResult<RwLockWriteGuard<'_, JournalState>> {
    state
        .write()
        .map_err(|_| JournalError::storage("journal lock poisoned"))
}

fn validate_stream_id(stream_id: &StreamId) -> JournalResult<()> {
    if stream_id.is_empty() {
        return Err(JournalError::invalid_argument("stream id must not be empty"));
    }
    Ok(())
}

/// In-memory journal.
///
/// All mutations go through one journal-wide write lock, which both serializes
/// appends per stream and keeps global positions gap-free. Intended for tests,
/// dev, and single-process embedding.
#[derive(Debug, Default)]
pub struct InMemoryJournal {
    state: SharedState,
    journal_readers: Mutex<HashMap<String, Arc<InMemoryJournalReader>>>,
    stream_readers: Mutex<HashMap<String, Arc<InMemoryStreamReader>>>,
}

impl InMemoryJournal {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Journal for InMemoryJournal {
    async fn append_entries(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entries: Vec<NewEntry>,
        metadata: Metadata,
        snapshot: Option<Snapshot>,
    ) -> JournalResult<AppendResult> {
        validate_stream_id(stream_id)?;
        if entries.is_empty() {
            return Err(JournalError::invalid_argument(
                "append requires at least one entry",
            ));
        }
        for (idx, e) in entries.iter().enumerate() {
            if e.entry_type.is_empty() {
                return Err(JournalError::invalid_argument(format!(
                    "entry type must not be empty (index {idx})"
                )));
            }
            if e.type_version == 0 {
                return Err(JournalError::invalid_argument(format!(
                    "type version must be >= 1 (index {idx})"
                )));
            }
        }

        let result = write_state(&self.state)?.commit(
            stream_id,
            expected_version,
            entries,
            metadata,
            snapshot,
        )?;

        debug!(
            stream_id = %stream_id,
            stream_version = result.stream_version,
            count = result.entries.len(),
            first_position = ?result.entries.first().map(|e| e.global_position),
            "appended entries"
        );

        Ok(result)
    }

    async fn tombstone(&self, stream_id: &StreamId) -> JournalResult<()> {
        validate_stream_id(stream_id)?;
        write_state(&self.state)?.tombstone(stream_id)?;
        debug!(stream_id = %stream_id, "stream tombstoned");
        Ok(())
    }

    async fn soft_delete(&self, stream_id: &StreamId) -> JournalResult<()> {
        validate_stream_id(stream_id)?;
        write_state(&self.state)?.soft_delete(stream_id)?;
        debug!(stream_id = %stream_id, "stream soft-deleted");
        Ok(())
    }

    async fn truncate_before(&self, stream_id: &StreamId, version: u64) -> JournalResult<()> {
        validate_stream_id(stream_id)?;
        let horizon = write_state(&self.state)?.truncate_before(stream_id, version)?;
        debug!(stream_id = %stream_id, requested = version, horizon, "stream truncated");
        Ok(())
    }

    async fn stream_info(&self, stream_id: &StreamId) -> JournalResult<StreamInfo> {
        validate_stream_id(stream_id)?;
        Ok(read_state(&self.state)?.stream_info(stream_id))
    }

    async fn global_length(&self) -> JournalResult<u64> {
        Ok(read_state(&self.state)?.len())
    }

    async fn journal_reader(&self, name: &str) -> JournalResult<Arc<dyn JournalReader>> {
        if name.is_empty() {
            return Err(JournalError::invalid_argument("reader name must not be empty"));
        }

        let mut readers = self
            .journal_readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let reader = readers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryJournalReader::new(name, self.state.clone())))
            .clone();
        Ok(reader)
    }

    async fn stream_reader(&self, name: &str) -> JournalResult<Arc<dyn StreamReader>> {
        if name.is_empty() {
            return Err(JournalError::invalid_argument("reader name must not be empty"));
        }

        let mut readers = self
            .stream_readers
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let reader = readers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(InMemoryStreamReader::new(name, self.state.clone())))
            .clone();
        Ok(reader)
    }
}
