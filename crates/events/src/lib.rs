//! Journal entries, typed events and the dispatch unit handed to projections.

pub mod adapter;
pub mod entry;
pub mod event;
pub mod projectable;

pub use adapter::{AdapterError, EntryAdapterRegistry};
pub use entry::{
    AppendResult, Entry, EntryStream, Metadata, NewEntry, Snapshot, StreamInfo, StreamStatus,
};
pub use event::Event;
pub use projectable::{Projectable, ProjectableId};
