//! Journal error model.

use thiserror::Error;

use crate::id::StreamId;
use crate::version::ExpectedVersion;

/// Result type used across the journal and its readers.
pub type JournalResult<T> = Result<T, JournalError>;

/// Outcome of a journal operation that did not succeed.
///
/// Most variants are *expected* business outcomes that callers inspect and act on
/// (a stale expected version, a deleted stream). Only `InvalidArgument` signals
/// programmer misuse, and only `Storage` signals that the backend itself failed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JournalError {
    /// The stream has never been appended to.
    #[error("stream not found: {0}")]
    NotFound(StreamId),

    /// The caller's expected version did not match the stream at commit time.
    #[error(
        "concurrency violation on stream {stream_id}: expected {expected}, current version {actual}"
    )]
    ConcurrencyViolation {
        stream_id: StreamId,
        expected: ExpectedVersion,
        actual: u64,
    },

    /// An append was attempted against a tombstoned stream.
    #[error("stream deleted: {0}")]
    StreamDeleted(StreamId),

    /// `tombstone` was called on a stream that is already tombstoned.
    #[error("stream already tombstoned: {0}")]
    AlreadyTombstoned(StreamId),

    /// `soft_delete` was called on a stream that is already soft- or hard-deleted.
    #[error("stream already deleted: {0}")]
    AlreadyDeleted(StreamId),

    /// A lifecycle operation other than append hit a tombstoned stream.
    #[error("stream is tombstoned: {0}")]
    Tombstoned(StreamId),

    /// A batch read could only be partially satisfied.
    #[error("not all streams found (missing: {})", display_ids(.missing))]
    NotAllFound { missing: Vec<StreamId> },

    /// Programmer misuse (empty stream id, empty batch, ...). Never retryable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The storage backend failed (poisoned lock, IO, ...).
    #[error("storage failure: {0}")]
    Storage(String),
}

fn display_ids(ids: &[StreamId]) -> String {
    ids.iter().map(StreamId::as_str).collect::<Vec<_>>().join(", ")
}

impl JournalError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ConcurrencyViolation { .. } | Self::Storage(_))
    }

    /// Idempotency signals: the caller's intent is already satisfied.
    pub fn is_idempotent_signal(&self) -> bool {
        matches!(
            self,
            Self::AlreadyTombstoned(_) | Self::AlreadyDeleted(_) | Self::Tombstoned(_)
        )
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Self::NotFound(_)
            | Self::NotAllFound { .. }
            | Self::StreamDeleted(_)
            | Self::AlreadyTombstoned(_)
            | Self::AlreadyDeleted(_)
            | Self::Tombstoned(_) => FailureKind::Business,
            Self::ConcurrencyViolation { .. } => FailureKind::Concurrency,
            Self::InvalidArgument(_) => FailureKind::Misuse,
            Self::Storage(_) => FailureKind::Storage,
        }
    }
}

/// Coarse classification of a failure, used to pick a supervision directive.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Input failed validation.
    Validation,
    /// An expected business outcome (missing stream, deleted stream, ...).
    Business,
    /// Optimistic concurrency conflict.
    Concurrency,
    /// In-memory state can no longer be trusted.
    Corruption,
    /// A payload could not be (de)serialized.
    Serialization,
    /// The storage backend failed; recovery is managed externally.
    Storage,
    /// The API was used incorrectly.
    Misuse,
}
