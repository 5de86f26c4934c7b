use std::sync::Arc;

use async_trait::async_trait;

use chronicle_core::{ExpectedVersion, JournalError, JournalResult, StreamId};
use chronicle_events::{AppendResult, Entry, EntryStream, Metadata, NewEntry, Snapshot, StreamInfo};

/// Append-only journal of per-entity streams with one global commit order.
///
/// The `Journal` is the **single source of truth** for all streams. Every stream
/// is an ordered set of entries sharing a `StreamId`; every entry additionally
/// receives a journal-wide `global_position` at commit time.
///
/// ## Append Semantics
///
/// `append_entries()` (and the four convenience variants built on it):
/// - Rejects misuse (empty stream id, empty batch) with `InvalidArgument`
/// - Rejects any append to a tombstoned stream with `StreamDeleted`
/// - Checks optimistic concurrency via `ExpectedVersion` (`ConcurrencyViolation`)
/// - Assigns `stream_version`s starting at `current_version + 1`
/// - Assigns strictly increasing `global_position`s
/// - Clears a soft-delete (the full history becomes visible again)
/// - Replaces the stream snapshot when one is supplied
/// - Is atomic: a failed append mutates nothing, not even the global position
///
/// ## Lifecycle
///
/// - `tombstone`: permanent; `AlreadyTombstoned` on repeat, `NotFound` if never written
/// - `soft_delete`: reversible hiding; `AlreadyDeleted` if soft- or hard-deleted
/// - `truncate_before`: monotonic hide-horizon; `Tombstoned` on a tombstoned stream
///
/// ## Implementation Requirements
///
/// All mutating operations on one stream must be totally ordered. The in-memory
/// journal serializes through one journal-wide lock; a durable backend must use
/// an equivalent primitive (e.g. a conditional write keyed by expected version).
#[async_trait]
pub trait Journal: Send + Sync {
    /// Commit one or many entries, optionally replacing the stream snapshot.
    async fn append_entries(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entries: Vec<NewEntry>,
        metadata: Metadata,
        snapshot: Option<Snapshot>,
    ) -> JournalResult<AppendResult>;

    async fn append(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entry: NewEntry,
        metadata: Metadata,
    ) -> JournalResult<AppendResult> {
        self.append_entries(stream_id, expected_version, vec![entry], metadata, None)
            .await
    }

    async fn append_with(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entry: NewEntry,
        metadata: Metadata,
        snapshot: Snapshot,
    ) -> JournalResult<AppendResult> {
        self.append_entries(stream_id, expected_version, vec![entry], metadata, Some(snapshot))
            .await
    }

    /// `expected_version` names the version of the *first* new entry.
    async fn append_all(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entries: Vec<NewEntry>,
        metadata: Metadata,
    ) -> JournalResult<AppendResult> {
        self.append_entries(stream_id, expected_version, entries, metadata, None)
            .await
    }

    async fn append_all_with(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entries: Vec<NewEntry>,
        metadata: Metadata,
        snapshot: Snapshot,
    ) -> JournalResult<AppendResult> {
        self.append_entries(stream_id, expected_version, entries, metadata, Some(snapshot))
            .await
    }

    async fn tombstone(&self, stream_id: &StreamId) -> JournalResult<()>;

    async fn soft_delete(&self, stream_id: &StreamId) -> JournalResult<()>;

    /// Hide entries with `stream_version < version`. Never lowers an existing horizon.
    async fn truncate_before(&self, stream_id: &StreamId, version: u64) -> JournalResult<()>;

    /// Point-in-time bookkeeping for a stream (`exists == false` if never written).
    async fn stream_info(&self, stream_id: &StreamId) -> JournalResult<StreamInfo>;

    /// Number of committed entries, i.e. the next global position.
    async fn global_length(&self) -> JournalResult<u64>;

    /// Named global sequential reader. The same name always yields the same reader.
    async fn journal_reader(&self, name: &str) -> JournalResult<Arc<dyn JournalReader>>;

    /// Named per-stream reader. The same name always yields the same reader.
    async fn stream_reader(&self, name: &str) -> JournalResult<Arc<dyn StreamReader>>;
}

#[async_trait]
impl<J> Journal for Arc<J>
where
    J: Journal + ?Sized,
{
    async fn append_entries(
        &self,
        stream_id: &StreamId,
        expected_version: ExpectedVersion,
        entries: Vec<NewEntry>,
        metadata: Metadata,
        snapshot: Option<Snapshot>,
    ) -> JournalResult<AppendResult> {
        (**self)
            .append_entries(stream_id, expected_version, entries, metadata, snapshot)
            .await
    }

    async fn tombstone(&self, stream_id: &StreamId) -> JournalResult<()> {
        (**self).tombstone(stream_id).await
    }

    async fn soft_delete(&self, stream_id: &StreamId) -> JournalResult<()> {
        (**self).soft_delete(stream_id).await
    }

    async fn truncate_before(&self, stream_id: &StreamId, version: u64) -> JournalResult<()> {
        (**self).truncate_before(stream_id, version).await
    }

    async fn stream_info(&self, stream_id: &StreamId) -> JournalResult<StreamInfo> {
        (**self).stream_info(stream_id).await
    }

    async fn global_length(&self) -> JournalResult<u64> {
        (**self).global_length().await
    }

    async fn journal_reader(&self, name: &str) -> JournalResult<Arc<dyn JournalReader>> {
        (**self).journal_reader(name).await
    }

    async fn stream_reader(&self, name: &str) -> JournalResult<Arc<dyn StreamReader>> {
        (**self).stream_reader(name).await
    }
}

/// Cursor over the journal-wide commit order.
///
/// The cursor is a 0-based global position: after reading the entry at global
/// position `p` the cursor is `p + 1`. Positions past the end are legal and
/// simply yield nothing until more is committed.
#[async_trait]
pub trait JournalReader: Send + Sync {
    fn name(&self) -> &str;

    /// Up to `max` entries from the cursor, advancing it by the number returned.
    async fn read_next(&self, max: usize) -> JournalResult<Vec<Entry>>;

    fn seek(&self, position: u64);

    fn rewind(&self) {
        self.seek(0);
    }

    fn position(&self) -> u64;
}

/// Per-stream history view used for replay / rehydration.
#[async_trait]
pub trait StreamReader: Send + Sync {
    fn name(&self) -> &str;

    /// Visible entries in stream order plus the latest snapshot, as of now.
    async fn stream_for(&self, stream_id: &StreamId) -> JournalResult<EntryStream>;

    /// Read several streams; streams that were never written are reported as missing.
    async fn streams_for(&self, stream_ids: &[StreamId]) -> JournalResult<StreamBatch> {
        let mut batch = StreamBatch::default();
        for id in stream_ids {
            let stream = self.stream_for(id).await?;
            if stream.stream_version == 0 {
                batch.missing.push(id.clone());
            } else {
                batch.found.push(stream);
            }
        }
        Ok(batch)
    }
}

/// Result of a multi-stream read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamBatch {
    pub found: Vec<EntryStream>,
    pub missing: Vec<StreamId>,
}

impl StreamBatch {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }

    /// `Err(NotAllFound)` when any requested stream was missing.
    pub fn into_result(self) -> JournalResult<Vec<EntryStream>> {
        if self.missing.is_empty() {
            Ok(self.found)
        } else {
            Err(JournalError::NotAllFound {
                missing: self.missing,
            })
        }
    }
}
