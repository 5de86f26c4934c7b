//! Optimistic concurrency expectations for stream appends.

use serde::{Deserialize, Serialize};

/// What the writer expects the stream to look like at commit time.
///
/// A concrete expectation names the version the *first* appended entry will
/// receive, i.e. `current_version + 1`. The three sentinels replace the
/// concrete check:
///
/// - `Any`: skip version checking entirely
/// - `NoStream`: the stream must not have any entries yet
/// - `StreamExists`: the stream must already have at least one entry
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExpectedVersion {
    Any,
    NoStream,
    StreamExists,
    Exact(u64),
}

impl ExpectedVersion {
    /// Check the expectation against the stream's current (highest committed) version.
    pub fn matches(self, current_version: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::NoStream => current_version == 0,
            ExpectedVersion::StreamExists => current_version > 0,
            ExpectedVersion::Exact(v) => current_version.checked_add(1) == Some(v),
        }
    }

    /// The expectation a writer should pass to append right after `current_version`.
    pub fn next_after(current_version: u64) -> Self {
        ExpectedVersion::Exact(current_version + 1)
    }
}

impl core::fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ExpectedVersion::Any => f.write_str("any"),
            ExpectedVersion::NoStream => f.write_str("no stream"),
            ExpectedVersion::StreamExists => f.write_str("stream exists"),
            ExpectedVersion::Exact(v) => write!(f, "{v}"),
        }
    }
}

impl From<u64> for ExpectedVersion {
    fn from(value: u64) -> Self {
        ExpectedVersion::Exact(value)
    }
}
