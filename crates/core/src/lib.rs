//! `chronicle-core`: journal foundation building blocks.
//!
//! This crate contains the identifiers, concurrency expectations and the error
//! taxonomy shared by the journal and the projection pipeline (no storage, no IO).

pub mod error;
pub mod id;
pub mod version;

pub use error::{FailureKind, JournalError, JournalResult};
pub use id::StreamId;
pub use version::ExpectedVersion;
