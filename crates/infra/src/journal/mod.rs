//! Append-only event journal boundary.
//!
//! This module defines the journal protocol (appends, lifecycle, introspection,
//! readers) without making storage assumptions, plus the in-memory reference
//! implementation. A durable backend implements the same traits.

pub mod in_memory;
pub mod reader;
pub mod r#trait;

pub use in_memory::InMemoryJournal;
pub use reader::{InMemoryJournalReader, InMemoryStreamReader};
pub use r#trait::{Journal, JournalReader, StreamBatch, StreamReader};
