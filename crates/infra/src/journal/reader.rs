//! In-memory readers over the shared journal state.
//!
//! Readers never mutate journal storage; the only state they own is their cursor.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use tracing::trace;

use chronicle_core::{JournalResult, StreamId};
use chronicle_events::{Entry, EntryStream};

use super::in_memory::{SharedState, read_state};
use super::r#trait::{JournalReader, StreamReader};

/// Global sequential reader with its own cursor.
#[derive(Debug)]
pub struct InMemoryJournalReader {
    name: String,
    state: SharedState,
    position: Mutex<u64>,
}

impl InMemoryJournalReader {
    pub(crate) fn new(name: impl Into<String>, state: SharedState) -> Self {
        Self {
            name: name.into(),
            state,
            position: Mutex::new(0),
        }
    }
}

#[async_trait]
impl JournalReader for InMemoryJournalReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read_next(&self, max: usize) -> JournalResult<Vec<Entry>> {
        // Cursor lock first so concurrent reads through one reader never overlap.
        let mut position = self.position.lock().unwrap_or_else(PoisonError::into_inner);
        let entries = read_state(&self.state)?.read_from(*position, max);

        *position += entries.len() as u64;
        trace!(reader = %self.name, read = entries.len(), position = *position, "read next");
        Ok(entries)
    }

    fn seek(&self, position: u64) {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner) = position;
    }

    fn position(&self) -> u64 {
        *self.position.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Per-stream reader: visibility is evaluated at the moment of each call.
#[derive(Debug)]
pub struct InMemoryStreamReader {
    name: String,
    state: SharedState,
}

impl InMemoryStreamReader {
    pub(crate) fn new(name: impl Into<String>, state: SharedState) -> Self {
        Self {
            name: name.into(),
            state,
        }
    }
}

#[async_trait]
impl StreamReader for InMemoryStreamReader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn stream_for(&self, stream_id: &StreamId) -> JournalResult<EntryStream> {
        Ok(read_state(&self.state)?.entry_stream(stream_id))
    }
}
