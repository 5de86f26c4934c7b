//! Background workers hosting the dispatch pipeline.

pub mod dispatcher_worker;

pub use dispatcher_worker::{DispatchStats, DispatcherHandle, DispatcherWorker};
